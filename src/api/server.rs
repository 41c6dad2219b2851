//! Control API server

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::bridge::{ProcessConnector, TransportConnector};
use crate::config::ControlConfig;
use crate::console::Console;
use crate::error::Error;

/// Shared application state
pub struct AppState<C: TransportConnector = ProcessConnector> {
    pub console: Mutex<Console>,
    /// Opens encoder connections when a stream starts
    pub connector: Arc<C>,
}

impl<C: TransportConnector> AppState<C> {
    pub fn new(console: Console, connector: Arc<C>) -> Arc<Self> {
        Arc::new(Self {
            console: Mutex::new(console),
            connector,
        })
    }
}

/// Build the API router
pub fn router<C: TransportConnector>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status::<C>))
        .route("/api/devices", get(handlers::get_devices))
        .route("/api/errors/dismiss", post(handlers::dismiss_error::<C>))
        // Decks
        .route("/api/decks/:deck/load", post(handlers::load_track::<C>))
        .route("/api/decks/:deck/unload", post(handlers::unload::<C>))
        .route("/api/decks/:deck/play", post(handlers::play::<C>))
        .route("/api/decks/:deck/pause", post(handlers::pause::<C>))
        .route("/api/decks/:deck/seek", post(handlers::seek::<C>))
        .route("/api/decks/:deck/rate", post(handlers::set_rate::<C>))
        .route("/api/decks/:deck/loop", post(handlers::set_loop::<C>))
        .route("/api/decks/:deck/mute", post(handlers::set_deck_mute::<C>))
        .route("/api/decks/:deck/clear-fault", post(handlers::clear_fault::<C>))
        // Auto-advance queues
        .route(
            "/api/decks/:deck/queue",
            get(handlers::get_queue::<C>)
                .post(handlers::enqueue::<C>)
                .delete(handlers::clear_queue::<C>),
        )
        .route("/api/decks/:deck/queue/:index", delete(handlers::remove_queued::<C>))
        // Mixer
        .route("/api/mixer/crossfader", post(handlers::set_crossfader::<C>))
        .route("/api/mixer/curve", post(handlers::set_curve::<C>))
        .route("/api/mixer/master", post(handlers::set_master_gain::<C>))
        .route("/api/mixer/lanes/:lane/gain", post(handlers::set_lane_gain::<C>))
        .route("/api/mixer/lanes/:lane/mute", post(handlers::set_lane_mute::<C>))
        .route("/api/mixer/lanes/:lane/eq", post(handlers::set_eq::<C>))
        .route("/api/mixer/lanes/:lane/effects", post(handlers::set_effect::<C>))
        // Monitor and stream
        .route("/api/monitor", post(handlers::set_monitor::<C>))
        .route("/api/stream/start", post(handlers::start_stream::<C>))
        .route("/api/stream/stop", post(handlers::stop_stream::<C>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Control API server
pub struct ControlServer<C: TransportConnector = ProcessConnector> {
    config: ControlConfig,
    state: Arc<AppState<C>>,
}

impl<C: TransportConnector> ControlServer<C> {
    pub fn new(config: ControlConfig, state: Arc<AppState<C>>) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> Arc<AppState<C>> {
        self.state.clone()
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<(), Error> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::Config(format!("control bind address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }

    /// Start in the background
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Control API error: {}", e);
            }
        })
    }
}
