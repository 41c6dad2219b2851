//! Mixing engine: decks, mixing graph, dual-output splitter
//!
//! - Deck: one independent playback lane (control half + audio voice)
//! - Mixer: per-lane strips, crossfader, compressor, master gain
//! - Splitter: master bus fork into monitor output and broadcast tap
//! - AudioEngine / EngineProcessor: the control root and the callback side

pub mod command;
pub mod deck;
pub mod dynamics;
pub mod effects;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod eq;
pub mod mixer;
pub mod splitter;

pub use command::{DeckCommand, DeckEvent, MixerCommand};
pub use deck::{DeckId, DeckObserver, DeckPlayer, DeckState, DeckVoice};
pub use effects::{DelaySettings, DistortionSettings, EffectSettings, ReverbSettings};
pub use engine::{AudioEngine, EngineProcessor};
pub use eq::EqBand;
pub use mixer::{CrossfadeCurve, LaneId, MixerControl, MixerSettings};
pub use splitter::{BroadcastTap, LevelMeter, MeterLevels, SharedTap, SplitterControl};
