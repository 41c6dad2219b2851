//! Three-band equalizer built from RBJ biquads
//!
//! Low shelf, mid peak and high shelf, each set in dB. 0 dB bypasses the
//! band entirely so a flat EQ is bit-transparent.

use serde::{Deserialize, Serialize};

/// Stereo biquad history
#[derive(Debug, Clone, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, left: f32, right: f32, c: &BiquadCoeffs) -> (f32, f32) {
        let out_l = c.b0 * left + c.b1 * self.x1_l + c.b2 * self.x2_l - c.a1 * self.y1_l - c.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = left;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = c.b0 * right + c.b1 * self.x1_r + c.b2 * self.x2_r - c.a1 * self.y1_r - c.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = right;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

impl BiquadCoeffs {
    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    fn is_passthrough(&self) -> bool {
        *self == Self::passthrough()
    }

    /// Shelf slope S = 1
    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / 2.0 * std::f32::consts::SQRT_2;
        let sqrt_a = a.sqrt();

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
        Self {
            b0: a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha) / a0,
            b1: 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0) / a0,
            b2: a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
            a1: -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
        }
    }

    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / 2.0 * std::f32::consts::SQRT_2;
        let sqrt_a = a.sqrt();

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
        Self {
            b0: a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha) / a0,
            b1: -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0) / a0,
            b2: a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
            a1: 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
        }
    }
}

/// EQ band selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

/// Per-band gains in dB
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EqSettings {
    pub low_db: f32,
    pub mid_db: f32,
    pub high_db: f32,
}

impl EqSettings {
    pub fn set(&mut self, band: EqBand, gain_db: f32) {
        let gain_db = gain_db.clamp(MIN_EQ_DB, MAX_EQ_DB);
        match band {
            EqBand::Low => self.low_db = gain_db,
            EqBand::Mid => self.mid_db = gain_db,
            EqBand::High => self.high_db = gain_db,
        }
    }
}

/// Deepest cut; treated as a kill
pub const MIN_EQ_DB: f32 = -40.0;
pub const MAX_EQ_DB: f32 = 12.0;
const MID_Q: f32 = 0.7;

/// Corner frequencies for the three bands
#[derive(Debug, Clone, Copy)]
pub struct EqFrequencies {
    pub low_hz: f32,
    pub mid_hz: f32,
    pub high_hz: f32,
}

/// Stereo 3-band EQ with cached coefficients
#[derive(Debug, Clone)]
pub struct ThreeBandEq {
    sample_rate: f32,
    freqs: EqFrequencies,
    settings: EqSettings,
    coeffs: [BiquadCoeffs; 3],
    states: [BiquadState; 3],
    dirty: bool,
}

impl ThreeBandEq {
    pub fn new(sample_rate: u32, freqs: EqFrequencies) -> Self {
        let nyquist_guard = sample_rate as f32 * 0.45;
        let freqs = EqFrequencies {
            low_hz: freqs.low_hz.min(nyquist_guard),
            mid_hz: freqs.mid_hz.min(nyquist_guard),
            high_hz: freqs.high_hz.min(nyquist_guard),
        };
        Self {
            sample_rate: sample_rate as f32,
            freqs,
            settings: EqSettings::default(),
            coeffs: [BiquadCoeffs::passthrough(); 3],
            states: Default::default(),
            dirty: false,
        }
    }

    pub fn set_band(&mut self, band: EqBand, gain_db: f32) {
        self.settings.set(band, gain_db);
        self.dirty = true;
    }

    pub fn settings(&self) -> EqSettings {
        self.settings
    }

    fn update_coeffs(&mut self) {
        if !self.dirty {
            return;
        }
        let sr = self.sample_rate;
        let s = self.settings;
        self.coeffs[0] = if s.low_db.abs() > 0.01 {
            BiquadCoeffs::low_shelf(self.freqs.low_hz, s.low_db, sr)
        } else {
            BiquadCoeffs::passthrough()
        };
        self.coeffs[1] = if s.mid_db.abs() > 0.01 {
            BiquadCoeffs::peaking(self.freqs.mid_hz, s.mid_db, MID_Q, sr)
        } else {
            BiquadCoeffs::passthrough()
        };
        self.coeffs[2] = if s.high_db.abs() > 0.01 {
            BiquadCoeffs::high_shelf(self.freqs.high_hz, s.high_db, sr)
        } else {
            BiquadCoeffs::passthrough()
        };
        self.dirty = false;
    }

    /// Filter interleaved stereo in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        self.update_coeffs();
        if self.coeffs.iter().all(BiquadCoeffs::is_passthrough) {
            return;
        }
        for frame in buffer.chunks_exact_mut(2) {
            let (mut left, mut right) = (frame[0], frame[1]);
            for (state, coeffs) in self.states.iter_mut().zip(self.coeffs.iter()) {
                if !coeffs.is_passthrough() {
                    (left, right) = state.process(left, right, coeffs);
                }
            }
            frame[0] = left;
            frame[1] = right;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn freqs() -> EqFrequencies {
        EqFrequencies { low_hz: 250.0, mid_hz: 1000.0, high_hz: 4000.0 }
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = ThreeBandEq::new(48000, freqs());
        let mut buffer: Vec<f32> = (0..64).map(|i| (i as f32 * 0.1).sin()).collect();
        let original = buffer.clone();
        eq.process(&mut buffer);
        assert_eq!(buffer, original);
    }

    #[test]
    fn test_low_cut_attenuates_dc() {
        let mut eq = ThreeBandEq::new(48000, freqs());
        eq.set_band(EqBand::Low, -24.0);

        let mut buffer = vec![0.5f32; 48000 * 2];
        eq.process(&mut buffer);

        // DC sits fully inside the low shelf, so it settles at the shelf gain
        let settled = buffer[buffer.len() - 2].abs();
        let expected = 0.5 * 10f32.powf(-24.0 / 20.0);
        assert!((settled - expected).abs() < 0.01, "settled at {}", settled);
    }

    #[test]
    fn test_gain_is_clamped() {
        let mut eq = ThreeBandEq::new(48000, freqs());
        eq.set_band(EqBand::High, 99.0);
        assert_eq!(eq.settings().high_db, MAX_EQ_DB);
    }
}
