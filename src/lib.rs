//! # Deckcast
//!
//! Two-deck live mixing engine whose master bus feeds both the operator's
//! monitor output and an uninterrupted broadcast stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                       AUDIO CALLBACK (EngineProcessor)                     │
//! │                                                                           │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                          │
//! │  │ Mic input  │   │  Deck A    │   │  Deck B    │   <- DeckVoice per deck  │
//! │  │ (FrameQ)   │   │  voice     │   │  voice     │                          │
//! │  └─────┬──────┘   └─────┬──────┘   └─────┬──────┘                          │
//! │        ▼                ▼                ▼                                 │
//! │  ┌───────────────────────────────────────────────────────────────────┐    │
//! │  │  Channel strips: gain -> 3-band EQ -> reverb/delay/distortion      │    │
//! │  └─────┬─────────────────────┬────────────────────┬──────────────────┘    │
//! │        │                     └──── Crossfader ────┘                       │
//! │        │                              │                                   │
//! │        └────────────► Master bus ◄────┘                                   │
//! │                           │                                               │
//! │                  Compressor -> Master gain                                │
//! │                           │                                               │
//! │                  ┌────────┴─────────┐  <- split point                      │
//! │                  ▼                  ▼                                     │
//! │        Monitor volume/mute     Broadcast tap (SPSC ring)                  │
//! │                  │                  │                                     │
//! └──────────────────┼──────────────────┼─────────────────────────────────────┘
//!                    ▼                  ▼
//!             Output device      ┌────────────────────────────────────┐
//!                                │ Stream session (tokio tasks)       │
//!                                │  pump -> ChunkPackager -> Bridge   │
//!                                │  SyncLoop (per-deck bookkeeping)   │
//!                                └──────────────┬─────────────────────┘
//!                                               ▼
//!                                 External encoder -> broadcast server
//! ```
//!
//! Control-side objects (`DeckPlayer`, `MixerControl`, `SplitterControl`)
//! never share locks with the audio callback: parameters travel through
//! lock-free SPSC queues or atomics, and the callback posts events back
//! through queues the control side drains.

pub mod api;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod sync;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default engine sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Internal bus channel count (interleaved stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default device buffer size in frames
    pub const DEFAULT_BUFFER_FRAMES: u32 = 256;

    /// Largest callback the engine pre-allocates scratch space for
    pub const MAX_BLOCK_FRAMES: usize = 8192;

    /// Capacity of each control -> audio command queue
    pub const COMMAND_QUEUE_CAPACITY: usize = 256;

    /// Capacity of each audio -> control event queue
    pub const EVENT_QUEUE_CAPACITY: usize = 64;

    /// Captured mic frames buffered ahead of the mixer
    pub const MIC_QUEUE_CAPACITY: usize = 32;

    /// Broadcast tap ring length in seconds of stereo audio
    pub const TAP_RING_SECONDS: usize = 4;

    /// Default reconciliation cadence
    pub const DEFAULT_SYNC_TICK_MS: u64 = 200;

    /// Default drift tolerance before the sync loop snaps position
    pub const DEFAULT_DRIFT_THRESHOLD_SECS: f64 = 0.08;

    /// Default outbound chunk queue depth
    pub const DEFAULT_BRIDGE_QUEUE_CHUNKS: usize = 200;

    /// Default control API port
    pub const DEFAULT_CONTROL_PORT: u16 = 8080;
}
