//! Stream session
//!
//! Wires the splitter's broadcast tap to the encoder bridge and runs the
//! sync loop beside it. Starting a session attaches the broadcast sink
//! exactly once; track changes, seeks and auto-advance never touch the
//! tap, the packager or the bridge for as long as the session lives.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bridge::bridge::{BridgeEvent, BridgeStatus, EncoderBridge};
use crate::bridge::packager::ChunkPackager;
use crate::bridge::transport::TransportConnector;
use crate::config::{BridgeConfig, BroadcastTarget, SyncConfig};
use crate::engine::{AudioEngine, DeckObserver, DeckState, SharedTap, SplitterControl};
use crate::error::{Error, SyncError};
use crate::sync::{BroadcastSinkState, MetadataSink, SyncAction, SyncLoop, SyncStats};

/// Latest sync loop figures, published every tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub stats: SyncStats,
    pub sink: BroadcastSinkState,
    pub last_warning: Option<SyncError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub server: String,
    pub mount: String,
    pub bridge: BridgeStatus,
    pub sync: SyncReport,
    pub frames_pumped: u64,
}

/// Moves tapped audio through the packager into the bridge
pub struct TapPump {
    tap: SharedTap,
    packager: ChunkPackager,
    bridge: Arc<EncoderBridge>,
    scratch: Vec<f32>,
    frames_pumped: Arc<AtomicU64>,
    rejected: bool,
}

impl TapPump {
    pub fn new(tap: SharedTap, packager: ChunkPackager, bridge: Arc<EncoderBridge>) -> Self {
        let capacity = packager.frames_per_chunk() * 8;
        Self {
            tap,
            packager,
            bridge,
            scratch: Vec::with_capacity(capacity),
            frames_pumped: Arc::new(AtomicU64::new(0)),
            rejected: false,
        }
    }

    /// Drain the tap once; returns chunks handed to the bridge
    pub fn pump(&mut self) -> usize {
        self.scratch.clear();
        let frames = self.tap.lock().read_into(&mut self.scratch);
        if frames == 0 {
            return 0;
        }
        self.frames_pumped.fetch_add(frames as u64, Ordering::Relaxed);

        let mut written = 0;
        for chunk in self.packager.push(&self.scratch) {
            match self.bridge.write(chunk) {
                Ok(()) => written += 1,
                Err(e) => {
                    // Keep draining so the tap never backs up into the audio thread
                    if !self.rejected {
                        tracing::warn!("Broadcast audio discarded: {}", e);
                        self.rejected = true;
                    }
                }
            }
        }
        written
    }

    pub fn frames_pumped(&self) -> u64 {
        self.frames_pumped.load(Ordering::Relaxed)
    }
}

/// Engine handles a stream session works from
///
/// Taken from the engine up front so a session never borrows it.
#[derive(Clone)]
pub struct StreamEndpoints {
    pub sample_rate: u32,
    pub splitter: SplitterControl,
    pub tap: SharedTap,
    pub observers: [DeckObserver; 2],
}

impl StreamEndpoints {
    pub fn from_engine(engine: &AudioEngine) -> Self {
        Self {
            sample_rate: engine.sample_rate(),
            splitter: engine.splitter().clone(),
            tap: engine.broadcast_tap(),
            observers: engine.deck_observers(),
        }
    }
}

/// Deck state as the sync loop sees it
fn deck_states(observers: &[DeckObserver]) -> Vec<DeckState> {
    observers.iter().map(DeckObserver::snapshot).collect()
}

pub struct StreamSession {
    bridge: Arc<EncoderBridge>,
    splitter: SplitterControl,
    report: Arc<RwLock<SyncReport>>,
    frames_pumped: Arc<AtomicU64>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    started_at: DateTime<Utc>,
    server: String,
    mount: String,
    active: bool,
}

impl StreamSession {
    /// Start streaming the master bus to `target`
    ///
    /// Fails with `SyncError::AlreadyActive` if another session holds the
    /// broadcast sink, or with the bridge's `TransportError` if the encoder
    /// cannot be reached. Either way local monitoring is untouched.
    pub async fn start<C: TransportConnector>(
        endpoints: StreamEndpoints,
        connector: Arc<C>,
        target: BroadcastTarget,
        bridge_config: &BridgeConfig,
        sync_config: &SyncConfig,
        metadata: Arc<dyn MetadataSink>,
    ) -> Result<Self, Error> {
        let StreamEndpoints {
            sample_rate,
            splitter,
            tap,
            observers,
        } = endpoints;
        if splitter.is_broadcast_attached() {
            return Err(SyncError::AlreadyActive.into());
        }

        let stale = tap.lock().discard_pending();
        if stale > 0 {
            tracing::debug!("Discarded {} stale tap frames", stale);
        }

        let packager = ChunkPackager::new(sample_rate, target.channels, bridge_config.chunk_ms);
        let server = format!("{}:{}", target.host, target.port);
        let mount = target.mount_path();
        let bridge = Arc::new(
            EncoderBridge::start(connector, target, bridge_config, packager.header()).await?,
        );

        splitter.attach_broadcast_sink();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let pump = TapPump::new(tap, packager, bridge.clone());
        let frames_pumped = pump.frames_pumped.clone();
        let pump_task = tokio::spawn(run_pump(
            pump,
            Duration::from_millis(bridge_config.pump_interval_ms.max(1)),
            shutdown_rx.clone(),
        ));

        let mut sync = SyncLoop::new(sync_config, metadata);
        sync.activate(&deck_states(&observers));
        let report = Arc::new(RwLock::new(SyncReport {
            stats: sync.stats(),
            sink: sync.state().clone(),
            last_warning: None,
        }));
        let sync_task = tokio::spawn(run_sync(
            sync,
            observers,
            report.clone(),
            Duration::from_millis(sync_config.tick_ms),
            shutdown_rx,
        ));

        tracing::info!("Streaming to {}{}", server, mount);
        Ok(Self {
            bridge,
            splitter,
            report,
            frames_pumped,
            shutdown,
            tasks: vec![pump_task, sync_task],
            started_at: Utc::now(),
            server,
            mount,
            active: true,
        })
    }

    /// Stop streaming; returns immediately
    ///
    /// The tap is detached and the bridge refuses further chunks before this
    /// returns. Background tasks wind down on their own.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.splitter.detach_broadcast_sink();
        self.bridge.stop();
        self.shutdown.send_replace(true);
        self.report.write().sink.is_active = false;
        tracing::info!("Stream to {}{} stopped", self.server, self.mount);
    }

    /// Wait for the background tasks after `stop`
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Stream task panicked: {}", e);
            }
        }
        self.bridge.join().await;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn bridge(&self) -> &EncoderBridge {
        &self.bridge
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bridge.subscribe()
    }

    pub fn sync_report(&self) -> SyncReport {
        self.report.read().clone()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            active: self.active,
            started_at: self.started_at,
            server: self.server.clone(),
            mount: self.mount.clone(),
            bridge: self.bridge.status(),
            sync: self.sync_report(),
            frames_pumped: self.frames_pumped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_pump(mut pump: TapPump, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                pump.pump();
            }
        }
    }
    tracing::debug!("Tap pump finished after {} frames", pump.frames_pumped());
}

async fn run_sync(
    mut sync: SyncLoop,
    observers: [DeckObserver; 2],
    report: Arc<RwLock<SyncReport>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let now = Instant::now();
                let actions = sync.tick(&deck_states(&observers), now - last);
                last = now;

                let warning = actions.into_iter().find_map(|action| match action {
                    SyncAction::Degraded(warning) => Some(warning),
                    _ => None,
                });
                let mut report = report.write();
                report.stats = sync.stats();
                report.sink = sync.state().clone();
                if warning.is_some() {
                    report.last_warning = warning;
                }
            }
        }
    }
    sync.deactivate();
}
