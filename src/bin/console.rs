//! Deckcast console
//!
//! Runs the two-deck engine on the default output device, optionally the
//! mic lane, and the control API. Streaming is started and stopped through
//! the API.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deckcast::{
    api::{AppState, ControlServer},
    audio::list_devices,
    bridge::ProcessConnector,
    config::AppConfig,
    console::Console,
    sync::{AdvanceOutcome, FileLibrary},
};

/// How often deck events and device errors are handled
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Deckcast console");

    // Config path from args, else the platform default
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load_or_default().context("loading default config")?,
    };

    // List available devices
    println!("\n=== Available Audio Devices ===");
    let devices = list_devices();
    for device in &devices {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let library = Arc::new(FileLibrary::new(std::env::current_dir().ok()));
    let mut console = Console::new(config.clone(), library);

    console.open_output().context("opening output device")?;
    tracing::info!("Monitor output running at {} Hz", config.audio.sample_rate);

    if config.capture.enabled {
        match console.start_capture() {
            Ok(()) => tracing::info!("Mic lane live on '{}'", config.capture.device),
            Err(e) => tracing::warn!("Mic capture unavailable: {}", e),
        }
    }

    let connector = Arc::new(ProcessConnector::new(Duration::from_millis(
        config.bridge.write_timeout_ms,
    )));
    let state = AppState::new(console, connector);

    if config.control.enabled {
        let server = ControlServer::new(config.control.clone(), state.clone());
        let _api_handle = server.start_background();
        tracing::info!(
            "Control API available at http://{}:{}",
            config.control.bind_address,
            config.control.port
        );
    }

    tracing::info!("Console running - press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let outcomes = state.console.lock().await.poll();
                for outcome in outcomes {
                    match outcome {
                        AdvanceOutcome::Advanced { deck, track, .. } => {
                            tracing::info!("Auto-advance: {} now on '{}'", deck, track);
                        }
                        AdvanceOutcome::QueueEmpty { deck, .. } => {
                            tracing::info!("Auto-advance: queue for {} is empty", deck);
                        }
                        AdvanceOutcome::Ignored { .. } => {}
                    }
                }
            }
        }
    }

    tracing::info!("Shutting down...");
    state.console.lock().await.shutdown();

    Ok(())
}
