//! Encoder bridge
//!
//! Owns the outbound queue and a transport task that drains it in order.
//! `write` never waits on the transport. When delivery fails the bridge
//! reports a `TransportError`, goes `Disconnected` and reconnects with
//! exponential backoff; after the configured number of attempts it gives up
//! and goes `Failed`. The chunk whose write failed is resent first on the
//! new connection, right after the container header.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::bridge::chunk::EncodedChunk;
use crate::bridge::queue::{OutboundQueue, PushOutcome};
use crate::bridge::transport::{EncoderTransport, TransportConnector};
use crate::config::{BridgeConfig, BroadcastTarget};
use crate::error::TransportError;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BridgeState {
    Connected,
    /// Waiting to retry; `attempt` counts from 1
    Disconnected { attempt: u32 },
    /// Reconnect attempts exhausted; writes are rejected
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub chunks_queued: u64,
    pub chunks_sent: u64,
    pub chunks_dropped: u64,
    pub bytes_sent: u64,
    pub reconnects: u64,
    pub queue_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub stats: BridgeStats,
    pub last_error: Option<TransportError>,
}

/// Notifications for whoever supervises the stream
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    StateChanged(BridgeState),
    Error(TransportError),
    /// Total chunks evicted from the queue so far
    ChunksDropped(u64),
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    attempts: u32,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    fn from_config(config: &BridgeConfig) -> Self {
        let initial = Duration::from_millis(config.initial_backoff_ms.max(1));
        Self {
            attempts: config.reconnect_attempts,
            initial,
            max: Duration::from_millis(config.max_backoff_ms).max(initial),
        }
    }
}

struct BridgeShared {
    queue: OutboundQueue,
    state: RwLock<BridgeState>,
    last_error: Mutex<Option<TransportError>>,
    chunks_queued: AtomicU64,
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    reconnects: AtomicU64,
    events: broadcast::Sender<BridgeEvent>,
}

impl BridgeShared {
    fn state(&self) -> BridgeState {
        *self.state.read()
    }

    /// `Stopped` is terminal
    fn set_state(&self, next: BridgeState) {
        {
            let mut state = self.state.write();
            if *state == next || *state == BridgeState::Stopped {
                return;
            }
            *state = next;
        }
        tracing::info!("Encoder bridge {:?}", next);
        let _ = self.events.send(BridgeEvent::StateChanged(next));
    }

    fn report_error(&self, error: TransportError) {
        tracing::warn!("Encoder transport error: {}", error);
        *self.last_error.lock() = Some(error.clone());
        let _ = self.events.send(BridgeEvent::Error(error));
    }

    fn is_stopping(&self, shutdown: &watch::Receiver<bool>) -> bool {
        *shutdown.borrow() || self.state() == BridgeState::Stopped
    }
}

pub struct EncoderBridge {
    shared: Arc<BridgeShared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EncoderBridge {
    /// Connect to the encoder and start the transport task
    ///
    /// `preamble` (the container header) is sent on every connection before
    /// any chunk. Fails if the first connection cannot be made.
    pub async fn start<C: TransportConnector>(
        connector: Arc<C>,
        target: BroadcastTarget,
        config: &BridgeConfig,
        preamble: Bytes,
    ) -> Result<Self, TransportError> {
        let mut transport = connector.connect(&target).await?;
        if let Err(e) = transport.send(preamble.clone()).await {
            transport.close().await;
            return Err(e);
        }

        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(BridgeShared {
            queue: OutboundQueue::new(config.queue_capacity),
            state: RwLock::new(BridgeState::Connected),
            last_error: Mutex::new(None),
            chunks_queued: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            events,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_transport(
            shared.clone(),
            connector,
            target,
            transport,
            preamble,
            Backoff::from_config(config),
            shutdown_rx,
        ));

        tracing::info!("Encoder bridge started (queue {} chunks)", shared.queue.capacity());
        Ok(Self {
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Queue a chunk for delivery; never waits on the transport
    pub fn write(&self, chunk: EncodedChunk) -> Result<(), TransportError> {
        match self.shared.state() {
            BridgeState::Stopped => return Err(TransportError::closed()),
            BridgeState::Failed => {
                return Err(self.shared.last_error.lock().clone().unwrap_or_else(TransportError::closed))
            }
            _ => {}
        }

        match self.shared.queue.push(chunk) {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest(sequence) => {
                let total = self.shared.queue.dropped_count();
                if total == 1 || total % 100 == 0 {
                    tracing::warn!(
                        "Outbound queue full, dropped chunk {} ({} dropped so far)",
                        sequence,
                        total
                    );
                }
                let _ = self.shared.events.send(BridgeEvent::ChunksDropped(total));
            }
            PushOutcome::Rejected => return Err(TransportError::closed()),
        }
        self.shared.chunks_queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop immediately
    ///
    /// Nothing is accepted after this returns. A write already in flight
    /// may complete; the transport is closed right after it.
    pub fn stop(&self) {
        if self.shared.state() == BridgeState::Stopped {
            return;
        }
        let discarded = self.shared.queue.close();
        self.shared.set_state(BridgeState::Stopped);
        self.shutdown.send_replace(true);
        tracing::info!("Encoder bridge stopped ({} queued chunks discarded)", discarded);
    }

    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.shared.state(),
            BridgeState::Connected | BridgeState::Disconnected { .. }
        )
    }

    pub fn stats(&self) -> BridgeStats {
        let shared = &self.shared;
        BridgeStats {
            chunks_queued: shared.chunks_queued.load(Ordering::Relaxed),
            chunks_sent: shared.chunks_sent.load(Ordering::Relaxed),
            chunks_dropped: shared.queue.dropped_count(),
            bytes_sent: shared.bytes_sent.load(Ordering::Relaxed),
            reconnects: shared.reconnects.load(Ordering::Relaxed),
            queue_depth: shared.queue.len(),
        }
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            state: self.state(),
            stats: self.stats(),
            last_error: self.shared.last_error.lock().clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.shared.events.subscribe()
    }

    /// Wait for the transport task to finish, e.g. after `stop`
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Encoder transport task panicked: {}", e);
            }
        }
    }
}

impl Drop for EncoderBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_transport<C: TransportConnector>(
    shared: Arc<BridgeShared>,
    connector: Arc<C>,
    target: BroadcastTarget,
    mut transport: C::Transport,
    preamble: Bytes,
    backoff: Backoff,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut retry: Option<EncodedChunk> = None;

    loop {
        let chunk = match retry.take() {
            Some(chunk) => chunk,
            None => tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = shared.queue.next() => match next {
                    Some(chunk) => chunk,
                    None => break,
                },
            },
        };

        let len = chunk.len() as u64;
        match transport.send(chunk.bytes.clone()).await {
            Ok(()) => {
                shared.chunks_sent.fetch_add(1, Ordering::Relaxed);
                shared.bytes_sent.fetch_add(len, Ordering::Relaxed);
            }
            Err(error) => {
                if shared.is_stopping(&shutdown) {
                    break;
                }
                shared.report_error(error);
                transport.close().await;
                match reconnect(&shared, connector.as_ref(), &target, &preamble, backoff, &mut shutdown).await {
                    Some(next) => {
                        transport = next;
                        retry = Some(chunk);
                    }
                    None => return,
                }
            }
        }
    }

    transport.close().await;
    tracing::debug!("Encoder transport task finished");
}

/// Retry with exponential backoff; `None` when giving up or stopping
async fn reconnect<C: TransportConnector>(
    shared: &BridgeShared,
    connector: &C,
    target: &BroadcastTarget,
    preamble: &Bytes,
    backoff: Backoff,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<C::Transport> {
    let mut delay = backoff.initial;

    for attempt in 1..=backoff.attempts {
        shared.set_state(BridgeState::Disconnected { attempt });
        tokio::select! {
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        if shared.is_stopping(shutdown) {
            return None;
        }

        tracing::info!("Reconnecting to encoder (attempt {}/{})", attempt, backoff.attempts);
        match connector.connect(target).await {
            Ok(mut transport) => match transport.send(preamble.clone()).await {
                Ok(()) => {
                    shared.reconnects.fetch_add(1, Ordering::Relaxed);
                    shared.set_state(BridgeState::Connected);
                    return Some(transport);
                }
                Err(e) => {
                    shared.report_error(e);
                    transport.close().await;
                }
            },
            Err(e) => shared.report_error(e),
        }
        delay = (delay * 2).min(backoff.max);
    }

    tracing::error!("Encoder unreachable after {} attempts, giving up", backoff.attempts);
    shared.set_state(BridgeState::Failed);
    shared.queue.close();
    None
}
