//! Console root
//!
//! Owns the engine control root, the device streams, the auto-advance
//! queues and the stream session, and turns device and bridge failures into
//! a persistent error indicator. `poll` must be called regularly from the
//! control loop; it is where deck events and device errors are handled.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::audio::{ensure_engine_rate, list_devices, AudioSource, MicCapture, OutputStream, SourceId};
use crate::bridge::{BridgeEvent, BridgeState, StreamEndpoints, StreamSession, TransportConnector};
use crate::config::AppConfig;
use crate::engine::{AudioEngine, DeckEvent, DeckId, EngineProcessor, LaneId};
use crate::error::{AudioError, Error, SyncError};
use crate::protocol::{
    AudioDeviceInfo, CaptureStatus, MonitorStatus, QueueStatus, StatusSnapshot, TapStatus,
};
use crate::sync::{AdvanceOutcome, AutoAdvance, NowPlaying, TrackLibrary, WatchMetadataSink};

pub struct Console {
    config: AppConfig,
    engine: AudioEngine,
    /// Held until an output device takes it
    processor: Option<EngineProcessor>,
    output: Option<OutputStream>,
    capture: Option<MicCapture>,
    advance: AutoAdvance,
    metadata: Arc<WatchMetadataSink>,
    stream: Option<StreamSession>,
    bridge_events: Option<broadcast::Receiver<BridgeEvent>>,
    last_error: Option<String>,
}

impl Console {
    pub fn new(config: AppConfig, library: Arc<dyn TrackLibrary>) -> Self {
        let (engine, processor) = AudioEngine::new(config.audio.sample_rate, &config.mixer);
        Self {
            config,
            engine,
            processor: Some(processor),
            output: None,
            capture: None,
            advance: AutoAdvance::new(library),
            metadata: Arc::new(WatchMetadataSink::new()),
            stream: None,
            bridge_events: None,
            last_error: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine {
        &mut self.engine
    }

    /// Hand the callback side to the caller instead of an output device
    ///
    /// Used for offline rendering and tests.
    pub fn take_processor(&mut self) -> Option<EngineProcessor> {
        self.processor.take()
    }

    pub fn metadata(&self) -> Arc<WatchMetadataSink> {
        self.metadata.clone()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.metadata.latest()
    }

    pub fn devices(&self) -> Vec<AudioDeviceInfo> {
        list_devices()
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Start the monitor output; the engine runs from the device clock
    pub fn open_output(&mut self) -> Result<(), Error> {
        let processor = self
            .processor
            .take()
            .ok_or_else(|| AudioError::StreamError("output already opened".to_string()))?;
        match OutputStream::open(&self.config.audio, processor) {
            Ok(output) => {
                self.output = Some(output);
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Start mic capture and route it into the mic lane
    pub fn start_capture(&mut self) -> Result<(), Error> {
        ensure_engine_rate(self.config.capture.sample_rate, self.engine.sample_rate())?;
        self.stop_capture()?;
        let mut capture = MicCapture::new(&self.config.capture)?;
        capture.start()?;
        self.engine.mixer_mut().attach_mic(capture.input())?;
        self.capture = Some(capture);
        Ok(())
    }

    /// Detach the mic lane and release the capture device
    pub fn stop_capture(&mut self) -> Result<(), Error> {
        self.engine.mixer_mut().detach_mic()?;
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        Ok(())
    }

    pub fn set_mic_muted(&mut self, muted: bool) -> Result<(), Error> {
        if let Some(capture) = &self.capture {
            capture.set_muted(muted);
        }
        self.engine.mixer_mut().set_lane_muted(LaneId::Mic, muted)?;
        Ok(())
    }

    // ========================================================================
    // Tracks and queues
    // ========================================================================

    /// Library used for loads and auto-advance
    pub fn library(&self) -> Arc<dyn TrackLibrary> {
        self.advance.library()
    }

    /// Resolve `track` through the library and load it on `deck`
    pub fn load_track(&mut self, deck: DeckId, track: &str) -> Result<SourceId, Error> {
        let source = self.advance.library().resolve(track)?;
        self.load_source(deck, source)
    }

    pub fn load_source(&mut self, deck: DeckId, source: AudioSource) -> Result<SourceId, Error> {
        let id = source.id();
        self.engine.deck_mut(deck).load(source)?;
        Ok(id)
    }

    /// Tracks waiting on `deck`, next first
    pub fn queue(&self, deck: DeckId) -> Vec<String> {
        self.advance.queue(deck).items()
    }

    pub fn enqueue(&mut self, deck: DeckId, track: impl Into<String>) {
        self.advance.enqueue(deck, track);
    }

    pub fn remove_from_queue(&mut self, deck: DeckId, index: usize) -> Option<String> {
        self.advance.queue_mut(deck).remove(index)
    }

    pub fn clear_queue(&mut self, deck: DeckId) {
        self.advance.queue_mut(deck).clear();
    }

    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.advance.set_autoplay(autoplay);
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// Start streaming the master bus to the configured broadcast target
    pub async fn start_stream<C: TransportConnector>(&mut self, connector: Arc<C>) -> Result<(), Error> {
        if self.stream.as_ref().is_some_and(StreamSession::is_active) {
            return Err(SyncError::AlreadyActive.into());
        }
        self.stream = None;

        let endpoints = StreamEndpoints::from_engine(&self.engine);
        let started = StreamSession::start(
            endpoints,
            connector,
            self.config.broadcast.clone(),
            &self.config.bridge,
            &self.config.sync,
            self.metadata.clone(),
        )
        .await;
        let session = match started {
            Ok(session) => session,
            Err(e) => {
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.bridge_events = Some(session.subscribe());
        self.stream = Some(session);
        Ok(())
    }

    /// Stop streaming; local monitoring carries on
    pub fn stop_stream(&mut self) -> Result<(), Error> {
        match self.stream.as_mut() {
            Some(session) if session.is_active() => {
                session.stop();
                self.bridge_events = None;
                Ok(())
            }
            _ => Err(SyncError::NotActive.into()),
        }
    }

    pub fn stream(&self) -> Option<&StreamSession> {
        self.stream.as_ref()
    }

    pub fn stream_mut(&mut self) -> Option<&mut StreamSession> {
        self.stream.as_mut()
    }

    // ========================================================================
    // Supervision
    // ========================================================================

    /// Handle deck events, device errors and bridge events
    ///
    /// Returns what auto-advance did, if anything.
    pub fn poll(&mut self) -> Vec<AdvanceOutcome> {
        let mut outcomes = Vec::new();

        for (deck, event) in self.engine.poll_events() {
            match event {
                DeckEvent::Ended { source_id, pass } => {
                    match self.advance.on_ended(self.engine.deck_mut(deck), source_id, pass) {
                        Ok(AdvanceOutcome::Ignored { .. }) => {}
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => {
                            tracing::error!("Auto-advance on {} failed: {}", deck, e);
                            self.last_error = Some(e.to_string());
                        }
                    }
                }
            }
        }

        if let Some(err) = self.output.as_ref().and_then(OutputStream::check_errors) {
            tracing::error!("{}", err);
            for deck in DeckId::ALL {
                self.engine.deck_mut(deck).fault(err.to_string());
            }
            self.last_error = Some(err.to_string());
        }

        if let Some(err) = self.capture.as_ref().and_then(MicCapture::check_errors) {
            tracing::error!("{}", err);
            if let Err(e) = self.stop_capture() {
                tracing::warn!("Could not detach mic lane: {}", e);
            }
            self.last_error = Some(err.to_string());
        }

        self.drain_bridge_events();
        outcomes
    }

    fn drain_bridge_events(&mut self) {
        let Some(events) = self.bridge_events.as_mut() else {
            return;
        };
        loop {
            match events.try_recv() {
                Ok(BridgeEvent::Error(e)) => self.last_error = Some(e.to_string()),
                Ok(BridgeEvent::StateChanged(BridgeState::Connected)) => {
                    tracing::info!("Broadcast connection restored");
                }
                Ok(BridgeEvent::StateChanged(BridgeState::Failed)) => {
                    tracing::error!("Broadcast connection lost for good");
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} bridge events", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Clear the error indicator
    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    pub fn status(&self) -> StatusSnapshot {
        let splitter = self.engine.splitter();
        let mixer = self.engine.mixer();

        StatusSnapshot {
            decks: DeckId::ALL.iter().map(|d| self.engine.deck(*d).snapshot()).collect(),
            mixer: mixer.settings(),
            gain_reduction_db: mixer.gain_reduction_db(),
            monitor: MonitorStatus {
                volume: splitter.monitor_volume(),
                muted: splitter.is_monitor_muted(),
                levels: splitter.monitor_levels(),
                output_running: self.output.as_ref().is_some_and(OutputStream::is_running),
            },
            tap: TapStatus {
                attached: splitter.is_broadcast_attached(),
                attachments: splitter.attachment_count(),
                frames_tapped: splitter.frames_tapped(),
                overruns: splitter.tap_overruns(),
                levels: splitter.broadcast_levels(),
            },
            stream: self.stream.as_ref().map(StreamSession::status),
            capture: self.capture.as_ref().map(|c| CaptureStatus {
                running: c.is_running(),
                device_id: c.device_id().to_string(),
                sample_rate: c.sample_rate(),
                channels: c.channels(),
                muted: c.is_muted(),
                volume: c.volume(),
                samples_captured: c.samples_captured(),
                frames_dropped: c.frames_dropped(),
            }),
            queues: QueueStatus {
                deck_a: self.queue(DeckId::A),
                deck_b: self.queue(DeckId::B),
            },
            now_playing: self.now_playing(),
            last_error: self.last_error.clone(),
        }
    }

    /// Stop everything that holds a device or a connection
    pub fn shutdown(&mut self) {
        if let Some(session) = self.stream.as_mut() {
            session.stop();
        }
        if let Err(e) = self.stop_capture() {
            tracing::warn!("Mic lane detach failed during shutdown: {}", e);
        }
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
        tracing::info!("Console shut down");
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.shutdown();
    }
}
