//! Playback decks
//!
//! A deck is split in two halves:
//! - `DeckPlayer` lives on the control thread. It validates commands,
//!   keeps a mirror of what it asked for, and drains the deck's events.
//! - `DeckVoice` lives inside the audio callback. It owns the playhead and
//!   renders the current source into its lane buffer.
//!
//! The halves talk only through the deck's own command/event queues and its
//! `DeckAtomics`. Deck A and deck B have no shared state at all.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::{decode_file, AudioSource, SourceId, TrackInfo};
use crate::engine::command::{
    deck_command_channel, deck_event_channel, retire_channel, DeckCommand, DeckCommandConsumer,
    DeckCommandProducer, DeckEvent, DeckMessage,
};
use crate::error::{AudioError, Error};

pub const MIN_PLAYBACK_RATE: f64 = 0.25;
pub const MAX_PLAYBACK_RATE: f64 = 4.0;

/// Deck identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::A, DeckId::B];

    pub fn index(self) -> usize {
        match self {
            DeckId::A => 0,
            DeckId::B => 1,
        }
    }

    pub fn other(self) -> DeckId {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckId::A => f.write_str("deck A"),
            DeckId::B => f.write_str("deck B"),
        }
    }
}

/// Lock-free readback published by the voice after every block
#[derive(Debug)]
pub struct DeckAtomics {
    /// Playhead in seconds (f64 bits)
    position: AtomicU64,
    playing: AtomicBool,
    /// Highest command sequence the voice has applied
    applied_seq: AtomicU64,
    /// Times the playhead wrapped while looping
    loop_wraps: AtomicU64,
}

impl DeckAtomics {
    pub fn new() -> Self {
        Self {
            position: AtomicU64::new(0f64.to_bits()),
            playing: AtomicBool::new(false),
            applied_seq: AtomicU64::new(0),
            loop_wraps: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn applied_seq(&self) -> u64 {
        self.applied_seq.load(Ordering::Acquire)
    }

    pub fn loop_wraps(&self) -> u64 {
        self.loop_wraps.load(Ordering::Relaxed)
    }
}

impl Default for DeckAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// Observable state of one deck
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckState {
    pub deck: DeckId,
    pub source_id: Option<SourceId>,
    pub track: Option<TrackInfo>,
    /// Seconds; 0 when nothing is loaded
    pub duration: f64,
    /// Seconds, within `0..=duration`
    pub current_time: f64,
    pub playback_rate: f64,
    pub is_playing: bool,
    pub loop_enabled: bool,
    pub is_muted: bool,
    /// Set when a device failure paused the deck
    pub fault: Option<String>,
    /// Explicit playhead moves so far (seeks and restarts from the end)
    pub repositions: u64,
}

/// What the control side last asked the voice to do
#[derive(Debug)]
struct DeckControl {
    source: Option<AudioSource>,
    rate: f64,
    looping: bool,
    muted: bool,
    playing: bool,
    /// Sequence of the last command that changed play/pause
    transport_seq: u64,
    /// Sequence and target of the last command that moved the playhead
    time_seq: u64,
    time_value: f64,
    repositions: u64,
    fault: Option<String>,
}

impl DeckControl {
    fn new() -> Self {
        Self {
            source: None,
            rate: 1.0,
            looping: false,
            muted: false,
            playing: false,
            transport_seq: 0,
            time_seq: 0,
            time_value: 0.0,
            repositions: 0,
            fault: None,
        }
    }

    fn duration(&self) -> f64 {
        self.source.as_ref().map(AudioSource::duration).unwrap_or(0.0)
    }
}

/// Read-only view of a deck, cloneable across threads
#[derive(Clone)]
pub struct DeckObserver {
    id: DeckId,
    atomics: Arc<DeckAtomics>,
    control: Arc<RwLock<DeckControl>>,
}

impl DeckObserver {
    pub fn id(&self) -> DeckId {
        self.id
    }

    /// Current state, preferring values the voice has not applied yet
    ///
    /// A command issued but not yet picked up by the audio callback is
    /// already reflected, so readers never see a seek "undo" itself.
    pub fn snapshot(&self) -> DeckState {
        let control = self.control.read();
        let applied = self.atomics.applied_seq();
        let duration = control.duration();

        let current_time = if applied < control.time_seq {
            control.time_value
        } else {
            self.atomics.position()
        };
        let is_playing = if applied < control.transport_seq {
            control.playing
        } else {
            self.atomics.is_playing()
        };

        DeckState {
            deck: self.id,
            source_id: control.source.as_ref().map(AudioSource::id),
            track: control.source.as_ref().map(|s| s.info().clone()),
            duration,
            current_time: current_time.clamp(0.0, duration),
            playback_rate: control.rate,
            is_playing,
            loop_enabled: control.looping,
            is_muted: control.muted,
            fault: control.fault.clone(),
            repositions: control.repositions,
        }
    }

    pub fn loop_wraps(&self) -> u64 {
        self.atomics.loop_wraps()
    }
}

/// Control half of a deck
pub struct DeckPlayer {
    observer: DeckObserver,
    commands: DeckCommandProducer,
    events: rtrb::Consumer<DeckEvent>,
    retired: rtrb::Consumer<AudioSource>,
    next_seq: u64,
}

/// Create the control and audio halves of a deck
pub fn deck_pair(id: DeckId, engine_sample_rate: u32) -> (DeckPlayer, DeckVoice) {
    let (command_tx, command_rx) = deck_command_channel();
    let (event_tx, event_rx) = deck_event_channel();
    let (retire_tx, retire_rx) = retire_channel();
    let atomics = Arc::new(DeckAtomics::new());

    let player = DeckPlayer {
        observer: DeckObserver {
            id,
            atomics: atomics.clone(),
            control: Arc::new(RwLock::new(DeckControl::new())),
        },
        commands: command_tx,
        events: event_rx,
        retired: retire_rx,
        next_seq: 0,
    };
    let voice = DeckVoice::new(engine_sample_rate, command_rx, event_tx, retire_tx, atomics);
    (player, voice)
}

impl DeckPlayer {
    pub fn id(&self) -> DeckId {
        self.observer.id
    }

    pub fn observer(&self) -> DeckObserver {
        self.observer.clone()
    }

    pub fn snapshot(&self) -> DeckState {
        self.observer.snapshot()
    }

    /// Source the deck is bound to (or about to be)
    pub fn source(&self) -> Option<AudioSource> {
        self.observer.control.read().source.clone()
    }

    fn send(
        &mut self,
        command: DeckCommand,
        update: impl FnOnce(&mut DeckControl, u64),
    ) -> Result<(), AudioError> {
        let seq = self.next_seq + 1;
        let mut control = self.observer.control.write();
        self.commands
            .push(DeckMessage { seq, command })
            .map_err(|_| AudioError::QueueFull)?;
        self.next_seq = seq;
        update(&mut control, seq);
        Ok(())
    }

    /// Replace the current source
    ///
    /// Playback stops and time resets to 0; rate and loop carry over.
    pub fn load(&mut self, source: AudioSource) -> Result<(), AudioError> {
        let id = self.id();
        let title = source.info().title.clone().unwrap_or_default();
        let source_for_mirror = source.clone();
        self.send(DeckCommand::Load(source), move |control, seq| {
            control.source = Some(source_for_mirror);
            control.playing = false;
            control.transport_seq = seq;
            control.time_seq = seq;
            control.time_value = 0.0;
        })?;
        tracing::info!("{} loaded '{}'", id, title);
        Ok(())
    }

    /// Decode `path` and load it
    ///
    /// On a decode failure nothing is sent and the deck stays on its
    /// previous source.
    pub fn load_file(&mut self, path: &Path) -> Result<SourceId, Error> {
        let source = decode_file(path)?;
        let id = source.id();
        self.load(source)?;
        Ok(id)
    }

    pub fn unload(&mut self) -> Result<(), AudioError> {
        self.send(DeckCommand::Unload, |control, seq| {
            control.source = None;
            control.playing = false;
            control.transport_seq = seq;
            control.time_seq = seq;
            control.time_value = 0.0;
        })
    }

    /// Start playback; a no-op while already playing
    ///
    /// At the end of a non-looping track, playback restarts from 0.
    pub fn play(&mut self) -> Result<(), AudioError> {
        let state = self.snapshot();
        if state.source_id.is_none() || state.is_playing {
            return Ok(());
        }
        let restart = state.current_time >= state.duration;
        self.send(DeckCommand::Play, move |control, seq| {
            control.playing = true;
            control.transport_seq = seq;
            if restart {
                control.time_seq = seq;
                control.time_value = 0.0;
                control.repositions += 1;
            }
        })
    }

    pub fn pause(&mut self) -> Result<(), AudioError> {
        if !self.snapshot().is_playing {
            return Ok(());
        }
        self.send(DeckCommand::Pause, |control, seq| {
            control.playing = false;
            control.transport_seq = seq;
        })
    }

    /// Move the playhead; returns the clamped target in seconds
    ///
    /// Playback state is untouched, the voice just reads from the new
    /// position on its next block.
    pub fn seek(&mut self, seconds: f64) -> Result<f64, AudioError> {
        if !seconds.is_finite() {
            return Err(AudioError::InvalidParameter(format!("seek to {}", seconds)));
        }
        let duration = self.observer.control.read().duration();
        let target = seconds.clamp(0.0, duration);
        self.send(DeckCommand::Seek(target), move |control, seq| {
            control.time_seq = seq;
            control.time_value = target;
            control.repositions += 1;
        })?;
        Ok(target)
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), AudioError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(AudioError::InvalidParameter(format!("playback rate {}", rate)));
        }
        let rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        self.send(DeckCommand::SetRate(rate), move |control, _| control.rate = rate)
    }

    pub fn set_loop(&mut self, enabled: bool) -> Result<(), AudioError> {
        self.send(DeckCommand::SetLoop(enabled), move |control, _| control.looping = enabled)
    }

    pub fn set_muted(&mut self, muted: bool) -> Result<(), AudioError> {
        self.send(DeckCommand::SetMuted(muted), move |control, _| control.muted = muted)
    }

    /// Pause and flag the deck after a device failure
    pub fn fault(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("{} faulted: {}", self.id(), reason);
        if let Err(e) = self.pause() {
            tracing::error!("{} could not pause after fault: {}", self.id(), e);
        }
        self.observer.control.write().fault = Some(reason);
    }

    pub fn clear_fault(&mut self) {
        self.observer.control.write().fault = None;
    }

    /// Drain pending events and free retired sources
    pub fn poll_events(&mut self) -> Vec<DeckEvent> {
        let mut retired = 0usize;
        while let Ok(source) = self.retired.pop() {
            drop(source);
            retired += 1;
        }
        if retired > 0 {
            tracing::debug!("{} released {} retired source(s)", self.id(), retired);
        }

        std::iter::from_fn(|| self.events.pop().ok()).collect()
    }
}

/// Audio half of a deck
pub struct DeckVoice {
    engine_rate: f64,
    commands: DeckCommandConsumer,
    events: rtrb::Producer<DeckEvent>,
    retired: rtrb::Producer<AudioSource>,
    atomics: Arc<DeckAtomics>,
    source: Option<AudioSource>,
    /// Playhead in source frames
    position: f64,
    rate: f64,
    looping: bool,
    muted: bool,
    playing: bool,
    /// Set once `Ended` has been raised for the current pass
    ended_latched: bool,
    /// Number of `Ended` events raised so far
    passes: u64,
    applied_seq: u64,
}

impl DeckVoice {
    fn new(
        engine_rate: u32,
        commands: DeckCommandConsumer,
        events: rtrb::Producer<DeckEvent>,
        retired: rtrb::Producer<AudioSource>,
        atomics: Arc<DeckAtomics>,
    ) -> Self {
        Self {
            engine_rate: engine_rate as f64,
            commands,
            events,
            retired,
            atomics,
            source: None,
            position: 0.0,
            rate: 1.0,
            looping: false,
            muted: false,
            playing: false,
            ended_latched: false,
            passes: 0,
            applied_seq: 0,
        }
    }

    fn retire(&mut self, source: Option<AudioSource>) {
        if let Some(source) = source {
            // Full only if the control side stopped polling; then it drops here
            let _ = self.retired.push(source);
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(message) = self.commands.pop() {
            match message.command {
                DeckCommand::Load(source) => {
                    let old = self.source.replace(source);
                    self.retire(old);
                    self.position = 0.0;
                    self.playing = false;
                    self.ended_latched = false;
                }
                DeckCommand::Unload => {
                    let old = self.source.take();
                    self.retire(old);
                    self.position = 0.0;
                    self.playing = false;
                    self.ended_latched = false;
                }
                DeckCommand::Play => {
                    if let Some(source) = &self.source {
                        if !self.playing {
                            if self.position >= source.frames() as f64 && !self.looping {
                                self.position = 0.0;
                                self.ended_latched = false;
                            }
                            self.playing = true;
                        }
                    }
                }
                DeckCommand::Pause => self.playing = false,
                DeckCommand::Seek(seconds) => {
                    if let Some(source) = &self.source {
                        let end = source.frames() as f64;
                        self.position = (seconds * source.sample_rate() as f64).clamp(0.0, end);
                        if self.position < end {
                            self.ended_latched = false;
                        }
                    }
                }
                DeckCommand::SetRate(rate) => self.rate = rate,
                DeckCommand::SetLoop(enabled) => self.looping = enabled,
                DeckCommand::SetMuted(muted) => self.muted = muted,
            }
            self.applied_seq = message.seq;
        }
    }

    /// Render one block of interleaved stereo into `out`
    pub fn render(&mut self, out: &mut [f32]) {
        self.apply_commands();
        out.fill(0.0);

        let mut reached_end = None;
        if let (Some(source), true) = (&self.source, self.playing) {
            let end = source.frames() as f64;
            let step = self.rate * source.sample_rate() as f64 / self.engine_rate;
            let gain = if self.muted { 0.0 } else { 1.0 };

            for frame in out.chunks_exact_mut(2) {
                if self.position >= end {
                    if !self.looping {
                        break;
                    }
                    self.position %= end;
                    self.atomics.loop_wraps.fetch_add(1, Ordering::Relaxed);
                }
                let (left, right) = source.sample_at(self.position);
                frame[0] = left * gain;
                frame[1] = right * gain;
                self.position += step;
            }

            if !self.looping && self.position >= end {
                self.position = end;
                reached_end = Some(source.id());
            }
        }

        if let Some(source_id) = reached_end {
            self.playing = false;
            if !self.ended_latched {
                self.ended_latched = true;
                self.passes += 1;
                let _ = self.events.push(DeckEvent::Ended {
                    source_id,
                    pass: self.passes,
                });
            }
        }

        self.publish();
    }

    fn publish(&self) {
        let seconds = match &self.source {
            Some(source) => self.position / source.sample_rate() as f64,
            None => 0.0,
        };
        self.atomics.position.store(seconds.to_bits(), Ordering::Relaxed);
        self.atomics.playing.store(self.playing, Ordering::Relaxed);
        self.atomics.applied_seq.store(self.applied_seq, Ordering::Release);
    }
}
