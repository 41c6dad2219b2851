//! Error types for the mixing console core

use serde::Serialize;
use thiserror::Error;

/// Main error type for the console
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem setup errors (device lookup, stream construction)
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Command queue full")]
    QueueFull,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// An asset could not be turned into an `AudioSource`
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No playable audio track in {0}")]
    NoAudioTrack(String),

    #[error("Asset is empty")]
    Empty,

    #[error("Failed to read asset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Track not found in library: {0}")]
    NotInLibrary(String),
}

/// A capture or output device became unavailable mid-session
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeviceError {
    #[error("Capture device failed: {0}")]
    Capture(String),

    #[error("Output device failed: {0}")]
    Output(String),
}

/// Why the encoder bridge could not deliver chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportReason {
    /// The encoder process could not be started
    SpawnFailed,
    /// The broadcast server refused or never answered the connection
    Unreachable,
    /// The broadcast server rejected the credentials
    AuthRejected,
    /// The encoder process exited on its own
    EncoderExited,
    /// The pipe to the encoder closed under a write
    BrokenPipe,
    /// A write did not complete within the configured timeout
    WriteTimeout,
    /// The bridge was stopped or never started
    Closed,
}

impl std::fmt::Display for TransportReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TransportReason::SpawnFailed => "spawn failed",
            TransportReason::Unreachable => "server unreachable",
            TransportReason::AuthRejected => "authentication rejected",
            TransportReason::EncoderExited => "encoder exited",
            TransportReason::BrokenPipe => "broken pipe",
            TransportReason::WriteTimeout => "write timeout",
            TransportReason::Closed => "closed",
        };
        f.write_str(text)
    }
}

/// Encoder bridge delivery failure with a reason code
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{reason}: {detail}")]
pub struct TransportError {
    pub reason: TransportReason,
    pub detail: String,
}

impl TransportError {
    pub fn new(reason: TransportReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn closed() -> Self {
        Self::new(TransportReason::Closed, "bridge is not running")
    }
}

/// Synchronization loop conditions
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum SyncError {
    /// Drift stayed above threshold for too many consecutive ticks
    #[error("Drift correction failed on {deck} for {ticks} ticks (last drift {drift_secs:.3}s)")]
    DriftCorrectionFailure {
        deck: String,
        ticks: u32,
        drift_secs: f64,
    },

    #[error("Stream already active")]
    AlreadyActive,

    #[error("Stream not active")]
    NotActive,
}

/// Result type alias for the console
pub type Result<T> = std::result::Result<T, Error>;

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}
