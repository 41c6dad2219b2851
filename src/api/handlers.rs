//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::server::AppState;
use crate::audio::{list_devices, SourceId};
use crate::bridge::TransportConnector;
use crate::engine::{CrossfadeCurve, DeckId, EffectSettings, EqBand, LaneId};
use crate::error::{AudioError, DecodeError, Error, SyncError};
use crate::protocol::{AudioDeviceInfo, StatusSnapshot};

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Decode(DecodeError::NotInLibrary(_)) => StatusCode::NOT_FOUND,
        Error::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Audio(AudioError::InvalidParameter(_)) => StatusCode::BAD_REQUEST,
        Error::Audio(AudioError::QueueFull) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Sync(SyncError::AlreadyActive) | Error::Sync(SyncError::NotActive) => StatusCode::CONFLICT,
        Error::Transport(_) => StatusCode::BAD_GATEWAY,
        Error::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T, E: Into<Error>>(result: Result<T, E>) -> Reply<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))),
        Err(e) => {
            let err = e.into();
            (status_for(&err), Json(ApiResponse::error(err.to_string())))
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Get the full console status
pub async fn get_status<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
) -> Json<ApiResponse<StatusSnapshot>> {
    let console = state.console.lock().await;
    Json(ApiResponse::ok(console.status()))
}

/// Get available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    let devices = list_devices();
    Json(ApiResponse::ok(devices))
}

/// Clear the persistent error indicator
pub async fn dismiss_error<C: TransportConnector>(State(state): State<Arc<AppState<C>>>) -> Reply<()> {
    state.console.lock().await.dismiss_error();
    (StatusCode::OK, Json(ApiResponse::ok(())))
}

// ============================================================================
// Decks
// ============================================================================

#[derive(Deserialize)]
pub struct LoadRequest {
    pub track: String,
}

pub async fn load_track<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
    Json(req): Json<LoadRequest>,
) -> Reply<SourceId> {
    // Decode without holding the console
    let library = state.console.lock().await.library();
    let resolved = tokio::task::spawn_blocking(move || library.resolve(&req.track)).await;
    let source = match resolved {
        Ok(source) => source,
        Err(e) => {
            let err = std::io::Error::new(std::io::ErrorKind::Other, e);
            return reply(Err(Error::Io(err)));
        }
    };

    let mut console = state.console.lock().await;
    reply(source.map_err(Error::from).and_then(|source| console.load_source(deck, source)))
}

pub async fn unload<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().deck_mut(deck).unload())
}

pub async fn play<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().deck_mut(deck).play())
}

pub async fn pause<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().deck_mut(deck).pause())
}

#[derive(Deserialize)]
pub struct SeekRequest {
    pub seconds: f64,
}

/// Seek; replies with the clamped position actually applied
pub async fn seek<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
    Json(req): Json<SeekRequest>,
) -> Reply<f64> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().deck_mut(deck).seek(req.seconds))
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub rate: f64,
}

pub async fn set_rate<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
    Json(req): Json<RateRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().deck_mut(deck).set_playback_rate(req.rate))
}

#[derive(Deserialize)]
pub struct LoopRequest {
    pub enabled: bool,
}

pub async fn set_loop<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
    Json(req): Json<LoopRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().deck_mut(deck).set_loop(req.enabled))
}

/// Set mute state
#[derive(Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

pub async fn set_deck_mute<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
    Json(req): Json<MuteRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().deck_mut(deck).set_muted(req.muted))
}

pub async fn clear_fault<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    console.engine_mut().deck_mut(deck).clear_fault();
    (StatusCode::OK, Json(ApiResponse::ok(())))
}

// ============================================================================
// Queues
// ============================================================================

#[derive(Deserialize)]
pub struct QueueRequest {
    pub track: String,
}

pub async fn get_queue<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
) -> Json<ApiResponse<Vec<String>>> {
    let items = state.console.lock().await.queue(deck);
    Json(ApiResponse::ok(items))
}

pub async fn enqueue<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
    Json(req): Json<QueueRequest>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    state.console.lock().await.enqueue(deck, req.track);
    (StatusCode::CREATED, Json(ApiResponse::ok(())))
}

pub async fn remove_queued<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path((deck, index)): Path<(DeckId, usize)>,
) -> Reply<String> {
    match state.console.lock().await.remove_from_queue(deck, index) {
        Some(track) => (StatusCode::OK, Json(ApiResponse::ok(track))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("No queue entry {} on {}", index, deck))),
        ),
    }
}

pub async fn clear_queue<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(deck): Path<DeckId>,
) -> Reply<()> {
    state.console.lock().await.clear_queue(deck);
    (StatusCode::OK, Json(ApiResponse::ok(())))
}

// ============================================================================
// Mixer
// ============================================================================

#[derive(Deserialize)]
pub struct CrossfaderRequest {
    pub position: f32,
}

pub async fn set_crossfader<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Json(req): Json<CrossfaderRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().mixer_mut().set_crossfader(req.position))
}

#[derive(Deserialize)]
pub struct CurveRequest {
    pub curve: CrossfadeCurve,
}

pub async fn set_curve<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Json(req): Json<CurveRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().mixer_mut().set_crossfade_curve(req.curve))
}

#[derive(Deserialize)]
pub struct GainRequest {
    pub gain: f32,
}

pub async fn set_master_gain<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Json(req): Json<GainRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().mixer_mut().set_master_gain(req.gain))
}

pub async fn set_lane_gain<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(lane): Path<LaneId>,
    Json(req): Json<GainRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().mixer_mut().set_lane_gain(lane, req.gain))
}

pub async fn set_lane_mute<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(lane): Path<LaneId>,
    Json(req): Json<MuteRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    if lane == LaneId::Mic {
        return reply(console.set_mic_muted(req.muted));
    }
    reply(console.engine_mut().mixer_mut().set_lane_muted(lane, req.muted))
}

#[derive(Deserialize)]
pub struct EqRequest {
    pub band: EqBand,
    pub gain_db: f32,
}

pub async fn set_eq<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(lane): Path<LaneId>,
    Json(req): Json<EqRequest>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().mixer_mut().set_eq(lane, req.band, req.gain_db))
}

pub async fn set_effect<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Path(lane): Path<LaneId>,
    Json(settings): Json<EffectSettings>,
) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.engine_mut().mixer_mut().set_effect(lane, settings))
}

// ============================================================================
// Monitor and stream
// ============================================================================

#[derive(Deserialize)]
pub struct MonitorRequest {
    pub volume: Option<f32>,
    pub muted: Option<bool>,
}

/// Local output only; the broadcast feed never sees these
pub async fn set_monitor<C: TransportConnector>(
    State(state): State<Arc<AppState<C>>>,
    Json(req): Json<MonitorRequest>,
) -> Reply<()> {
    let console = state.console.lock().await;
    let splitter = console.engine().splitter();
    if let Some(volume) = req.volume {
        if !volume.is_finite() {
            return reply(Err(AudioError::InvalidParameter(format!(
                "monitor volume {}",
                volume
            ))));
        }
        splitter.set_monitor_volume(volume);
    }
    if let Some(muted) = req.muted {
        splitter.set_monitor_muted(muted);
    }
    (StatusCode::OK, Json(ApiResponse::ok(())))
}

pub async fn start_stream<C: TransportConnector>(State(state): State<Arc<AppState<C>>>) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.start_stream(state.connector.clone()).await)
}

pub async fn stop_stream<C: TransportConnector>(State(state): State<Arc<AppState<C>>>) -> Reply<()> {
    let mut console = state.console.lock().await;
    reply(console.stop_stream())
}
