//! Data shapes exchanged with the control surface

use serde::{Deserialize, Serialize};

use crate::bridge::StreamStatus;
use crate::engine::{DeckState, MeterLevels, MixerSettings};
use crate::sync::NowPlaying;

/// Audio device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Local monitor path
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub volume: f32,
    pub muted: bool,
    pub levels: MeterLevels,
    pub output_running: bool,
}

/// Broadcast tap on the master bus
#[derive(Debug, Clone, Serialize)]
pub struct TapStatus {
    pub attached: bool,
    /// Attachments over the process lifetime
    pub attachments: u64,
    pub frames_tapped: u64,
    pub overruns: u64,
    pub levels: MeterLevels,
}

/// Microphone capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub running: bool,
    pub device_id: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub muted: bool,
    pub volume: f32,
    pub samples_captured: u64,
    pub frames_dropped: usize,
}

/// Auto-advance queues, next track first
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub deck_a: Vec<String>,
    pub deck_b: Vec<String>,
}

/// Everything the control surface shows at once
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub decks: Vec<DeckState>,
    pub mixer: MixerSettings,
    pub gain_reduction_db: f32,
    pub monitor: MonitorStatus,
    pub tap: TapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureStatus>,
    pub queues: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now_playing: Option<NowPlaying>,
    /// Persistent error indicator until dismissed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
