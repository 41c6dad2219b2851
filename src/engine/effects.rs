//! Per-lane effect stages: reverb send, feedback delay, distortion
//!
//! Every stage allocates its buffers up front and is bypassed by default.
//! A bypassed stage keeps no running state, so enabling it later starts
//! from silence rather than replaying stale tails.

use serde::{Deserialize, Serialize};

/// Longest delay time a lane can be set to
pub const MAX_DELAY_MS: f32 = 2000.0;

const COMB_TUNING: [f32; 4] = [0.0297, 0.0371, 0.0411, 0.0437];
const ALLPASS_TUNING: [f32; 2] = [0.005, 0.0017];
/// Right channel lines are slightly longer to decorrelate the tail
const STEREO_SPREAD: f32 = 0.00052;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub enabled: bool,
    /// Wet level, 0..=1
    pub mix: f32,
    /// Tail length, 0..=1
    pub room_size: f32,
    /// High-frequency damping, 0..=1
    pub damping: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mix: 0.25,
            room_size: 0.6,
            damping: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    pub enabled: bool,
    pub time_ms: f32,
    /// Feedback amount, kept below 0.95 so the loop always decays
    pub feedback: f32,
    pub mix: f32,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            time_ms: 375.0,
            feedback: 0.35,
            mix: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionSettings {
    pub enabled: bool,
    /// Pre-gain into the shaper, 1..=50
    pub drive: f32,
    pub mix: f32,
}

impl Default for DistortionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            drive: 4.0,
            mix: 1.0,
        }
    }
}

/// One effect's full parameter set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EffectSettings {
    Reverb(ReverbSettings),
    Delay(DelaySettings),
    Distortion(DistortionSettings),
}

impl EffectSettings {
    fn sanitized(self) -> Self {
        match self {
            EffectSettings::Reverb(s) => EffectSettings::Reverb(ReverbSettings {
                enabled: s.enabled,
                mix: s.mix.clamp(0.0, 1.0),
                room_size: s.room_size.clamp(0.0, 1.0),
                damping: s.damping.clamp(0.0, 1.0),
            }),
            EffectSettings::Delay(s) => EffectSettings::Delay(DelaySettings {
                enabled: s.enabled,
                time_ms: s.time_ms.clamp(1.0, MAX_DELAY_MS),
                feedback: s.feedback.clamp(0.0, 0.95),
                mix: s.mix.clamp(0.0, 1.0),
            }),
            EffectSettings::Distortion(s) => EffectSettings::Distortion(DistortionSettings {
                enabled: s.enabled,
                drive: s.drive.clamp(1.0, 50.0),
                mix: s.mix.clamp(0.0, 1.0),
            }),
        }
    }
}

/// Snapshot of a lane's effect parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectsSnapshot {
    pub reverb: ReverbSettings,
    pub delay: DelaySettings,
    pub distortion: DistortionSettings,
}

impl EffectsSnapshot {
    pub fn apply(&mut self, settings: EffectSettings) {
        match settings.sanitized() {
            EffectSettings::Reverb(s) => self.reverb = s,
            EffectSettings::Delay(s) => self.delay = s,
            EffectSettings::Distortion(s) => self.distortion = s,
        }
    }
}

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    filter_store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            filter_store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * (1.0 - damping) + self.filter_store * damping;
        self.buffer[self.index] = input + self.filter_store * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_store = 0.0;
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        let output = buffered - input;
        self.buffer[self.index] = input + buffered * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Schroeder-style reverb: parallel combs into series allpasses
#[derive(Debug, Clone)]
struct Reverb {
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<Allpass>; 2],
    active: bool,
}

impl Reverb {
    fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let lines = |spread: f32| {
            let combs = COMB_TUNING
                .iter()
                .map(|t| Comb::new(((t + spread) * sr) as usize))
                .collect::<Vec<_>>();
            let allpasses = ALLPASS_TUNING
                .iter()
                .map(|t| Allpass::new(((t + spread) * sr) as usize))
                .collect::<Vec<_>>();
            (combs, allpasses)
        };
        let (combs_l, allpasses_l) = lines(0.0);
        let (combs_r, allpasses_r) = lines(STEREO_SPREAD);
        Self {
            combs: [combs_l, combs_r],
            allpasses: [allpasses_l, allpasses_r],
            active: false,
        }
    }

    fn process(&mut self, buffer: &mut [f32], settings: &ReverbSettings) {
        if !settings.enabled {
            if self.active {
                self.clear();
            }
            return;
        }
        self.active = true;

        let feedback = 0.7 + settings.room_size * 0.28;
        let damping = settings.damping * 0.4;
        let wet = settings.mix;
        let dry = 1.0 - wet * 0.5;

        for frame in buffer.chunks_exact_mut(2) {
            let input = (frame[0] + frame[1]) * 0.5 * 0.3;
            for ch in 0..2 {
                let mut acc = 0.0;
                for comb in self.combs[ch].iter_mut() {
                    acc += comb.process(input, feedback, damping);
                }
                for allpass in self.allpasses[ch].iter_mut() {
                    acc = allpass.process(acc);
                }
                frame[ch] = frame[ch] * dry + acc * wet;
            }
        }
    }

    fn clear(&mut self) {
        self.combs.iter_mut().flatten().for_each(Comb::clear);
        self.allpasses.iter_mut().flatten().for_each(Allpass::clear);
        self.active = false;
    }
}

/// Stereo feedback delay
///
/// The feedback path is the one cycle the mixing graph allows.
#[derive(Debug, Clone)]
struct Delay {
    buffer: Vec<f32>,
    write: usize,
    sample_rate: f32,
    active: bool,
}

impl Delay {
    fn new(sample_rate: u32) -> Self {
        let frames = (sample_rate as f32 * MAX_DELAY_MS / 1000.0) as usize + 1;
        Self {
            buffer: vec![0.0; frames * 2],
            write: 0,
            sample_rate: sample_rate as f32,
            active: false,
        }
    }

    fn process(&mut self, buffer: &mut [f32], settings: &DelaySettings) {
        if !settings.enabled {
            if self.active {
                self.buffer.fill(0.0);
                self.write = 0;
                self.active = false;
            }
            return;
        }
        self.active = true;

        let capacity = self.buffer.len() / 2;
        let delay_frames = ((settings.time_ms / 1000.0 * self.sample_rate) as usize).clamp(1, capacity - 1);

        for frame in buffer.chunks_exact_mut(2) {
            let read = (self.write + capacity - delay_frames) % capacity;
            for ch in 0..2 {
                let delayed = self.buffer[read * 2 + ch];
                self.buffer[self.write * 2 + ch] = frame[ch] + delayed * settings.feedback;
                frame[ch] += delayed * settings.mix;
            }
            self.write = (self.write + 1) % capacity;
        }
    }
}

/// Normalized tanh waveshaper
fn distort(buffer: &mut [f32], settings: &DistortionSettings) {
    if !settings.enabled {
        return;
    }
    let norm = settings.drive.tanh();
    let wet = settings.mix;
    for sample in buffer.iter_mut() {
        let shaped = (*sample * settings.drive).tanh() / norm;
        *sample = *sample * (1.0 - wet) + shaped * wet;
    }
}

/// Reverb, delay and distortion for one lane
#[derive(Debug, Clone)]
pub struct EffectsChain {
    settings: EffectsSnapshot,
    reverb: Reverb,
    delay: Delay,
}

impl EffectsChain {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            settings: EffectsSnapshot::default(),
            reverb: Reverb::new(sample_rate),
            delay: Delay::new(sample_rate),
        }
    }

    pub fn apply(&mut self, settings: EffectSettings) {
        self.settings.apply(settings);
    }

    pub fn settings(&self) -> EffectsSnapshot {
        self.settings
    }

    /// Distortion, then delay, then reverb, in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        distort(buffer, &self.settings.distortion);
        self.delay.process(buffer, &self.settings.delay);
        self.reverb.process(buffer, &self.settings.reverb);
    }
}
