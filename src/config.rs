//! Application configuration
//!
//! Loaded from a TOML file in the platform config directory. Every section
//! has defaults, so a missing or partial file still yields a usable console.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::engine::mixer::CrossfadeCurve;
use crate::error::Error;

/// Identifier meaning "use the host's default device"
pub const SYSTEM_DEFAULT_DEVICE: &str = "default";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
    pub mixer: MixerConfig,
    pub sync: SyncConfig,
    pub broadcast: BroadcastTarget,
    pub bridge: BridgeConfig,
    pub control: ControlConfig,
}

/// Output device and engine clock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device id as reported by `list_devices`, or "default"
    pub output_device: String,
    /// Engine sample rate in Hz
    pub sample_rate: u32,
    /// Requested device buffer size in frames (None = host default)
    pub buffer_frames: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: SYSTEM_DEFAULT_DEVICE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_frames: Some(DEFAULT_BUFFER_FRAMES),
        }
    }
}

/// Microphone acquisition parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    /// Input device id, or "default" for the system default
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: SYSTEM_DEFAULT_DEVICE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: false,
        }
    }
}

/// Mixing graph defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub crossfade_curve: CrossfadeCurve,
    pub compressor: CompressorConfig,
    pub eq_low_hz: f32,
    pub eq_mid_hz: f32,
    pub eq_high_hz: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            crossfade_curve: CrossfadeCurve::ConstantPower,
            compressor: CompressorConfig::default(),
            eq_low_hz: 250.0,
            eq_mid_hz: 1000.0,
            eq_high_hz: 4000.0,
        }
    }
}

/// Master bus compressor settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            ratio: 12.0,
            attack_ms: 3.0,
            release_ms: 250.0,
        }
    }
}

/// Streaming synchronization loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reconciliation cadence in milliseconds
    pub tick_ms: u64,
    /// Drift below this is ignored
    pub drift_threshold_secs: f64,
    /// Consecutive over-threshold ticks before a degraded-sync warning
    pub max_degraded_ticks: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_SYNC_TICK_MS,
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
            max_degraded_ticks: 5,
        }
    }
}

/// Broadcast server target, passed through to the external encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastTarget {
    pub host: String,
    pub port: u16,
    pub mount: String,
    pub username: String,
    pub password: String,
    /// Codec name understood by the encoder (e.g. "libmp3lame", "libopus")
    pub codec: String,
    /// Output container understood by the encoder (e.g. "mp3", "ogg")
    pub container: String,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Encoder executable
    pub encoder_program: String,
}

impl Default for BroadcastTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            mount: "/live".to_string(),
            username: "source".to_string(),
            password: String::new(),
            codec: "libmp3lame".to_string(),
            container: "mp3".to_string(),
            bitrate_kbps: 192,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            encoder_program: "ffmpeg".to_string(),
        }
    }
}

impl BroadcastTarget {
    /// Mount point with a guaranteed leading slash
    pub fn mount_path(&self) -> String {
        if self.mount.starts_with('/') {
            self.mount.clone()
        } else {
            format!("/{}", self.mount)
        }
    }

    /// Target URL for an Icecast-compatible server
    pub fn icecast_url(&self) -> String {
        format!(
            "icecast://{}:{}@{}:{}{}",
            self.username,
            self.password,
            self.host,
            self.port,
            self.mount_path()
        )
    }

    /// Content type announced to the server
    pub fn content_type(&self) -> &'static str {
        match self.container.as_str() {
            "ogg" | "opus" => "audio/ogg",
            "aac" | "adts" => "audio/aac",
            _ => "audio/mpeg",
        }
    }
}

/// Encoder bridge behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Outbound queue capacity in chunks; the oldest chunk is dropped when full
    pub queue_capacity: usize,
    /// Audio duration packed into one chunk
    pub chunk_ms: u32,
    /// How often the tap is drained into chunks
    pub pump_interval_ms: u64,
    /// Upper bound for a single write to the encoder
    pub write_timeout_ms: u64,
    /// Reconnect attempts after a transport failure before giving up
    pub reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_BRIDGE_QUEUE_CHUNKS,
            chunk_ms: 50,
            pump_interval_ms: 20,
            write_timeout_ms: 2000,
            reconnect_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

/// Control API binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_CONTROL_PORT,
        }
    }
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "deckcast").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self, Error> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be > 0".into()));
        }
        if self.capture.sample_rate == 0 {
            return Err(Error::Config("capture.sample_rate must be > 0".into()));
        }
        if self.capture.enabled && self.capture.sample_rate != self.audio.sample_rate {
            return Err(Error::Config(format!(
                "capture.sample_rate ({} Hz) must match audio.sample_rate ({} Hz)",
                self.capture.sample_rate, self.audio.sample_rate
            )));
        }
        if !(1..=2).contains(&self.capture.channels) {
            return Err(Error::Config(format!(
                "capture.channels must be 1 or 2, got {}",
                self.capture.channels
            )));
        }
        if !(1..=2).contains(&self.broadcast.channels) {
            return Err(Error::Config(format!(
                "broadcast.channels must be 1 or 2, got {}",
                self.broadcast.channels
            )));
        }
        if !(50..=1000).contains(&self.sync.tick_ms) {
            return Err(Error::Config(format!(
                "sync.tick_ms must be within 50..=1000, got {}",
                self.sync.tick_ms
            )));
        }
        if self.sync.drift_threshold_secs <= 0.0 {
            return Err(Error::Config("sync.drift_threshold_secs must be > 0".into()));
        }
        if self.bridge.queue_capacity == 0 {
            return Err(Error::Config("bridge.queue_capacity must be > 0".into()));
        }
        if self.bridge.chunk_ms == 0 {
            return Err(Error::Config("bridge.chunk_ms must be > 0".into()));
        }
        Ok(())
    }
}
