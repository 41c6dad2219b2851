//! Shared fixtures for the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use deckcast::audio::{AudioSource, TrackInfo};
use deckcast::bridge::{EncoderTransport, TransportConnector};
use deckcast::config::{BridgeConfig, BroadcastTarget, MixerConfig};
use deckcast::engine::{AudioEngine, CrossfadeCurve, EngineProcessor};
use deckcast::error::{DecodeError, TransportError, TransportReason};
use deckcast::sync::TrackLibrary;

/// Engine rate low enough to simulate minutes of audio quickly
pub const TEST_RATE: u32 = 1000;

pub fn engine() -> (AudioEngine, EngineProcessor) {
    let config = MixerConfig {
        crossfade_curve: CrossfadeCurve::Linear,
        ..Default::default()
    };
    AudioEngine::new(TEST_RATE, &config)
}

/// Constant-level stereo track
pub fn tone(title: &str, value: f32, seconds: f64) -> AudioSource {
    let frames = (seconds * TEST_RATE as f64) as usize;
    AudioSource::from_interleaved(
        &vec![value; frames * 2],
        2,
        TEST_RATE,
        TrackInfo {
            title: Some(title.to_string()),
            artist: None,
        },
    )
    .unwrap()
}

/// Run the processor for `seconds` of audio in device-sized callbacks
pub fn render(processor: &mut EngineProcessor, seconds: f64) -> Vec<f32> {
    let frames = (seconds * TEST_RATE as f64).round() as usize;
    let mut out = vec![0.0f32; frames * 2];
    for block in out.chunks_mut(64 * 2) {
        processor.process_stereo(block);
    }
    out
}

pub fn bridge_config() -> BridgeConfig {
    BridgeConfig {
        queue_capacity: 8,
        chunk_ms: 100,
        pump_interval_ms: 5,
        write_timeout_ms: 200,
        reconnect_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 40,
    }
}

pub fn target() -> BroadcastTarget {
    BroadcastTarget {
        sample_rate: TEST_RATE,
        ..Default::default()
    }
}

pub fn chunk(sequence: u64) -> deckcast::bridge::EncodedChunk {
    deckcast::bridge::EncodedChunk::new(sequence, Bytes::from(sequence.to_le_bytes().to_vec()), 1)
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Library of named in-memory tracks; unknown names fail to resolve
#[derive(Default)]
pub struct MemoryLibrary {
    tracks: Mutex<HashMap<String, AudioSource>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, source: AudioSource) {
        self.tracks.lock().insert(name.to_string(), source);
    }
}

impl TrackLibrary for MemoryLibrary {
    fn resolve(&self, track: &str) -> Result<AudioSource, DecodeError> {
        self.tracks
            .lock()
            .get(track)
            .cloned()
            .ok_or_else(|| DecodeError::NotInLibrary(track.to_string()))
    }
}

struct Recorder {
    /// Bytes received, one entry per connection
    connections: Mutex<Vec<Vec<Bytes>>>,
    refuse_connects: AtomicU32,
    refuse_forever: AtomicBool,
    fail_sends: AtomicU32,
    /// Sends wait while this is false
    gate: watch::Sender<bool>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            refuse_connects: AtomicU32::new(0),
            refuse_forever: AtomicBool::new(false),
            fail_sends: AtomicU32::new(0),
            gate: watch::channel(true).0,
        }
    }
}

/// In-memory stand-in for the external encoder
#[derive(Clone, Default)]
pub struct MemoryConnector {
    recorder: Arc<Recorder>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_connects(&self, n: u32) {
        self.recorder.refuse_connects.store(n, Ordering::SeqCst);
    }

    pub fn refuse_forever(&self, refuse: bool) {
        self.recorder.refuse_forever.store(refuse, Ordering::SeqCst);
    }

    /// Fail the next `n` sends on whatever connection is open
    pub fn fail_sends(&self, n: u32) {
        self.recorder.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Park every send until `release`
    pub fn hold(&self) {
        self.recorder.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.recorder.gate.send_replace(true);
    }

    pub fn connections(&self) -> Vec<Vec<Bytes>> {
        self.recorder.connections.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.recorder.connections.lock().len()
    }

    /// Everything received across connections, in arrival order
    pub fn all_bytes(&self) -> Vec<Bytes> {
        self.recorder.connections.lock().iter().flatten().cloned().collect()
    }
}

pub struct MemoryTransport {
    recorder: Arc<Recorder>,
    index: usize,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl EncoderTransport for MemoryTransport {
    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        let mut gate = self.recorder.gate.subscribe();
        let open = gate.wait_for(|open| *open).await.is_ok();
        if !open {
            return Err(TransportError::closed());
        }
        if take_one(&self.recorder.fail_sends) {
            return Err(TransportError::new(TransportReason::BrokenPipe, "simulated"));
        }
        self.recorder.connections.lock()[self.index].push(bytes);
        Ok(())
    }

    async fn close(&mut self) {}
}

impl TransportConnector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, _target: &BroadcastTarget) -> Result<MemoryTransport, TransportError> {
        if self.recorder.refuse_forever.load(Ordering::SeqCst) || take_one(&self.recorder.refuse_connects) {
            return Err(TransportError::new(TransportReason::Unreachable, "simulated"));
        }
        let mut connections = self.recorder.connections.lock();
        connections.push(Vec::new());
        Ok(MemoryTransport {
            recorder: self.recorder.clone(),
            index: connections.len() - 1,
        })
    }
}
