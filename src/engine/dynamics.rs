//! Master bus compressor

use serde::{Deserialize, Serialize};

use crate::config::CompressorConfig;

/// Feed-forward, stereo-linked peak compressor with a hard knee
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Smoothed detector level in dB
    envelope_db: f32,
    /// Gain reduction applied to the most recent sample, in dB (<= 0)
    last_reduction_db: f32,
}

/// Compressor readback for status reporting
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CompressorStatus {
    pub threshold_db: f32,
    pub ratio: f32,
    pub gain_reduction_db: f32,
}

const SILENCE_DB: f32 = -120.0;

impl Compressor {
    pub fn new(config: &CompressorConfig, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            threshold_db: config.threshold_db,
            ratio: config.ratio.max(1.0),
            attack_coeff: time_coeff(config.attack_ms, sr),
            release_coeff: time_coeff(config.release_ms, sr),
            envelope_db: SILENCE_DB,
            last_reduction_db: 0.0,
        }
    }

    /// Static gain curve: dB of reduction for a detector level
    #[inline]
    fn reduction_for(&self, level_db: f32) -> f32 {
        if level_db <= self.threshold_db {
            0.0
        } else {
            let over = level_db - self.threshold_db;
            -(over - over / self.ratio)
        }
    }

    /// Compress interleaved stereo in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let peak = frame[0].abs().max(frame[1].abs());
            let level_db = if peak > 1e-6 { 20.0 * peak.log10() } else { SILENCE_DB };

            let coeff = if level_db > self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = level_db + coeff * (self.envelope_db - level_db);

            let reduction_db = self.reduction_for(self.envelope_db);
            self.last_reduction_db = reduction_db;
            if reduction_db < 0.0 {
                let gain = 10f32.powf(reduction_db / 20.0);
                frame[0] *= gain;
                frame[1] *= gain;
            }
        }
    }

    pub fn status(&self) -> CompressorStatus {
        CompressorStatus {
            threshold_db: self.threshold_db,
            ratio: self.ratio,
            gain_reduction_db: self.last_reduction_db,
        }
    }
}

fn time_coeff(ms: f32, sample_rate: f32) -> f32 {
    if ms <= 0.0 {
        0.0
    } else {
        (-1.0 / (ms / 1000.0 * sample_rate)).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressor(sample_rate: u32) -> Compressor {
        Compressor::new(&CompressorConfig::default(), sample_rate)
    }

    #[test]
    fn test_quiet_signal_passes_untouched() {
        let mut comp = compressor(48000);
        // -40 dBFS, well under the -24 dB threshold
        let mut buffer = vec![0.01f32; 512];
        comp.process(&mut buffer);
        assert!(buffer.iter().all(|s| *s == 0.01));
    }

    #[test]
    fn test_loud_signal_settles_near_ratio() {
        let mut comp = compressor(48000);
        // 0 dBFS held for one second
        let mut buffer = vec![1.0f32; 48000 * 2];
        comp.process(&mut buffer);

        let out_db = 20.0 * buffer[buffer.len() - 1].log10();
        // 24 dB over the threshold at 12:1 leaves 2 dB over
        assert!((out_db - (-22.0)).abs() < 0.5, "settled at {} dB", out_db);
        assert!(comp.status().gain_reduction_db < -20.0);
    }
}
