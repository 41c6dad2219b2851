//! Mixing graph
//!
//! The topology is fixed when the engine is built and never rewired:
//!
//! ```text
//! mic    -> strip ------------------------------+
//! deck A -> strip -> crossfader (A side) --+    |
//! deck B -> strip -> crossfader (B side) --+--> master bus -> compressor -> master gain
//! ```
//!
//! A strip is gain -> 3-band EQ -> effects. Only parameters change at
//! runtime, delivered through `MixerCommand`s.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::MicInput;
use crate::config::MixerConfig;
use crate::engine::command::{mixer_command_channel, retire_channel, MixerCommand};
use crate::engine::deck::DeckId;
use crate::engine::dynamics::Compressor;
use crate::engine::effects::{EffectSettings, EffectsChain, EffectsSnapshot};
use crate::engine::eq::{EqBand, EqFrequencies, EqSettings, ThreeBandEq};
use crate::error::AudioError;

pub const MAX_LANE_GAIN: f32 = 2.0;
pub const MAX_MASTER_GAIN: f32 = 2.0;

/// Mixer input lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneId {
    Mic,
    DeckA,
    DeckB,
}

impl LaneId {
    pub const ALL: [LaneId; 3] = [LaneId::Mic, LaneId::DeckA, LaneId::DeckB];

    pub fn index(self) -> usize {
        match self {
            LaneId::Mic => 0,
            LaneId::DeckA => 1,
            LaneId::DeckB => 2,
        }
    }
}

impl From<DeckId> for LaneId {
    fn from(deck: DeckId) -> Self {
        match deck {
            DeckId::A => LaneId::DeckA,
            DeckId::B => LaneId::DeckB,
        }
    }
}

/// Crossfade law
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeCurve {
    /// cos/sin law; the summed power stays flat through the fade
    #[default]
    ConstantPower,
    Linear,
}

impl CrossfadeCurve {
    /// (deck A gain, deck B gain) for a fader position in 0..=1
    #[inline]
    pub fn gains(self, position: f32) -> (f32, f32) {
        let p = position.clamp(0.0, 1.0);
        match self {
            CrossfadeCurve::ConstantPower => ((p * FRAC_PI_2).cos(), (p * FRAC_PI_2).sin()),
            CrossfadeCurve::Linear => (1.0 - p, p),
        }
    }
}

/// One lane's parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaneSettings {
    pub gain: f32,
    pub muted: bool,
    pub eq: EqSettings,
    pub effects: EffectsSnapshot,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            gain: 1.0,
            muted: false,
            eq: EqSettings::default(),
            effects: EffectsSnapshot::default(),
        }
    }
}

/// Every mixer parameter, as last set from the control side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixerSettings {
    pub mic: LaneSettings,
    pub deck_a: LaneSettings,
    pub deck_b: LaneSettings,
    /// 0.0 is full deck A, 1.0 is full deck B
    pub crossfader: f32,
    pub curve: CrossfadeCurve,
    pub master_gain: f32,
}

impl MixerSettings {
    fn new(curve: CrossfadeCurve) -> Self {
        Self {
            mic: LaneSettings::default(),
            deck_a: LaneSettings::default(),
            deck_b: LaneSettings::default(),
            crossfader: 0.5,
            curve,
            master_gain: 1.0,
        }
    }

    pub fn lane(&self, lane: LaneId) -> &LaneSettings {
        match lane {
            LaneId::Mic => &self.mic,
            LaneId::DeckA => &self.deck_a,
            LaneId::DeckB => &self.deck_b,
        }
    }

    fn lane_mut(&mut self, lane: LaneId) -> &mut LaneSettings {
        match lane {
            LaneId::Mic => &mut self.mic,
            LaneId::DeckA => &mut self.deck_a,
            LaneId::DeckB => &mut self.deck_b,
        }
    }
}

/// Gain, EQ and effects for one lane
pub struct ChannelStrip {
    gain: f32,
    muted: bool,
    eq: ThreeBandEq,
    effects: EffectsChain,
}

impl ChannelStrip {
    fn new(sample_rate: u32, freqs: EqFrequencies) -> Self {
        Self {
            gain: 1.0,
            muted: false,
            eq: ThreeBandEq::new(sample_rate, freqs),
            effects: EffectsChain::new(sample_rate),
        }
    }

    /// Process in place; a muted strip still runs so its state stays warm
    fn process(&mut self, buffer: &mut [f32]) {
        if (self.gain - 1.0).abs() > f32::EPSILON {
            for sample in buffer.iter_mut() {
                *sample *= self.gain;
            }
        }
        self.eq.process(buffer);
        self.effects.process(buffer);
        if self.muted {
            buffer.fill(0.0);
        }
    }
}

/// Values the audio side reports back
#[derive(Debug, Default)]
struct MixerAtomics {
    gain_reduction_db: AtomicU32,
}

/// Audio-thread half of the mixer
pub struct MixerCore {
    strips: [ChannelStrip; 3],
    crossfader: f32,
    curve: CrossfadeCurve,
    compressor: Compressor,
    master_gain: f32,
    mic: Option<Box<MicInput>>,
    commands: rtrb::Consumer<MixerCommand>,
    retired_mics: rtrb::Producer<Box<MicInput>>,
    atomics: Arc<MixerAtomics>,
}

/// Control-thread half of the mixer
pub struct MixerControl {
    commands: rtrb::Producer<MixerCommand>,
    retired_mics: rtrb::Consumer<Box<MicInput>>,
    settings: Arc<RwLock<MixerSettings>>,
    atomics: Arc<MixerAtomics>,
    mic_attached: bool,
}

/// Build both halves of the mixer
pub fn mixer_pair(sample_rate: u32, config: &MixerConfig) -> (MixerControl, MixerCore) {
    let (command_tx, command_rx) = mixer_command_channel();
    let (retire_tx, retire_rx) = retire_channel();
    let atomics = Arc::new(MixerAtomics::default());
    let freqs = EqFrequencies {
        low_hz: config.eq_low_hz,
        mid_hz: config.eq_mid_hz,
        high_hz: config.eq_high_hz,
    };

    let core = MixerCore {
        strips: [
            ChannelStrip::new(sample_rate, freqs),
            ChannelStrip::new(sample_rate, freqs),
            ChannelStrip::new(sample_rate, freqs),
        ],
        crossfader: 0.5,
        curve: config.crossfade_curve,
        compressor: Compressor::new(&config.compressor, sample_rate),
        master_gain: 1.0,
        mic: None,
        commands: command_rx,
        retired_mics: retire_tx,
        atomics: atomics.clone(),
    };
    let control = MixerControl {
        commands: command_tx,
        retired_mics: retire_rx,
        settings: Arc::new(RwLock::new(MixerSettings::new(config.crossfade_curve))),
        atomics,
        mic_attached: false,
    };
    (control, core)
}

impl MixerCore {
    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                MixerCommand::SetLaneGain { lane, gain } => self.strips[lane.index()].gain = gain,
                MixerCommand::SetLaneMuted { lane, muted } => self.strips[lane.index()].muted = muted,
                MixerCommand::SetEq { lane, band, gain_db } => {
                    self.strips[lane.index()].eq.set_band(band, gain_db)
                }
                MixerCommand::SetEffect { lane, settings } => {
                    self.strips[lane.index()].effects.apply(settings)
                }
                MixerCommand::SetCrossfader(position) => self.crossfader = position,
                MixerCommand::SetCrossfadeCurve(curve) => self.curve = curve,
                MixerCommand::SetMasterGain(gain) => self.master_gain = gain,
                MixerCommand::AttachMic(input) => {
                    if let Some(old) = self.mic.replace(input) {
                        let _ = self.retired_mics.push(old);
                    }
                }
                MixerCommand::DetachMic => {
                    if let Some(old) = self.mic.take() {
                        let _ = self.retired_mics.push(old);
                    }
                }
            }
        }
    }

    /// Mix one block
    ///
    /// `deck_a` and `deck_b` hold the rendered deck lanes and are processed
    /// in place; `mic` is scratch space. The result lands in `master`.
    pub fn process(&mut self, deck_a: &mut [f32], deck_b: &mut [f32], mic: &mut [f32], master: &mut [f32]) {
        self.apply_commands();

        match self.mic.as_mut() {
            Some(input) => input.read(mic),
            None => mic.fill(0.0),
        }

        let [mic_strip, a_strip, b_strip] = &mut self.strips;
        mic_strip.process(mic);
        a_strip.process(deck_a);
        b_strip.process(deck_b);

        let (gain_a, gain_b) = self.curve.gains(self.crossfader);
        for (i, out) in master.iter_mut().enumerate() {
            *out = mic[i] + deck_a[i] * gain_a + deck_b[i] * gain_b;
        }

        self.compressor.process(master);
        if (self.master_gain - 1.0).abs() > f32::EPSILON {
            for sample in master.iter_mut() {
                *sample *= self.master_gain;
            }
        }

        self.atomics
            .gain_reduction_db
            .store(self.compressor.status().gain_reduction_db.to_bits(), Ordering::Relaxed);
    }
}

impl MixerControl {
    fn send(&mut self, command: MixerCommand) -> Result<(), AudioError> {
        self.commands.push(command).map_err(|_| AudioError::QueueFull)
    }

    fn check(value: f32, what: &str) -> Result<(), AudioError> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(AudioError::InvalidParameter(format!("{} {}", what, value)))
        }
    }

    pub fn set_lane_gain(&mut self, lane: LaneId, gain: f32) -> Result<(), AudioError> {
        Self::check(gain, "lane gain")?;
        let gain = gain.clamp(0.0, MAX_LANE_GAIN);
        self.send(MixerCommand::SetLaneGain { lane, gain })?;
        self.settings.write().lane_mut(lane).gain = gain;
        Ok(())
    }

    pub fn set_lane_muted(&mut self, lane: LaneId, muted: bool) -> Result<(), AudioError> {
        self.send(MixerCommand::SetLaneMuted { lane, muted })?;
        self.settings.write().lane_mut(lane).muted = muted;
        Ok(())
    }

    pub fn set_eq(&mut self, lane: LaneId, band: EqBand, gain_db: f32) -> Result<(), AudioError> {
        Self::check(gain_db, "EQ gain")?;
        self.send(MixerCommand::SetEq { lane, band, gain_db })?;
        self.settings.write().lane_mut(lane).eq.set(band, gain_db);
        Ok(())
    }

    pub fn set_effect(&mut self, lane: LaneId, settings: EffectSettings) -> Result<(), AudioError> {
        self.send(MixerCommand::SetEffect { lane, settings })?;
        self.settings.write().lane_mut(lane).effects.apply(settings);
        Ok(())
    }

    pub fn set_crossfader(&mut self, position: f32) -> Result<(), AudioError> {
        Self::check(position, "crossfader")?;
        let position = position.clamp(0.0, 1.0);
        self.send(MixerCommand::SetCrossfader(position))?;
        self.settings.write().crossfader = position;
        Ok(())
    }

    pub fn set_crossfade_curve(&mut self, curve: CrossfadeCurve) -> Result<(), AudioError> {
        self.send(MixerCommand::SetCrossfadeCurve(curve))?;
        self.settings.write().curve = curve;
        Ok(())
    }

    pub fn set_master_gain(&mut self, gain: f32) -> Result<(), AudioError> {
        Self::check(gain, "master gain")?;
        let gain = gain.clamp(0.0, MAX_MASTER_GAIN);
        self.send(MixerCommand::SetMasterGain(gain))?;
        self.settings.write().master_gain = gain;
        Ok(())
    }

    /// Route a capture into the mic lane, replacing any previous one
    pub fn attach_mic(&mut self, input: MicInput) -> Result<(), AudioError> {
        self.send(MixerCommand::AttachMic(Box::new(input)))?;
        self.mic_attached = true;
        Ok(())
    }

    pub fn detach_mic(&mut self) -> Result<(), AudioError> {
        if !self.mic_attached {
            return Ok(());
        }
        self.send(MixerCommand::DetachMic)?;
        self.mic_attached = false;
        Ok(())
    }

    pub fn mic_attached(&self) -> bool {
        self.mic_attached
    }

    pub fn settings(&self) -> MixerSettings {
        *self.settings.read()
    }

    /// Compressor gain reduction on the last processed sample, in dB
    pub fn gain_reduction_db(&self) -> f32 {
        f32::from_bits(self.atomics.gain_reduction_db.load(Ordering::Relaxed))
    }

    /// Free mic inputs the audio side has let go of
    pub fn poll(&mut self) {
        while let Ok(input) = self.retired_mics.pop() {
            drop(input);
        }
    }
}
