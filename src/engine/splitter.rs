//! Dual-output splitter
//!
//! The master bus forks here. The broadcast tap copies the master signal
//! before anything else touches it; the monitor path applies local volume
//! and mute to its own buffer afterwards. `SplitterCore::process` takes the
//! master block by shared reference, so nothing on the monitor side can
//! write to what the tap reads.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::constants::TAP_RING_SECONDS;

/// RMS and peak of the most recent block, lock-free readable
#[derive(Debug)]
pub struct LevelMeter {
    rms: AtomicU32,
    peak: AtomicU32,
}

/// Meter reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MeterLevels {
    pub rms: f32,
    pub peak: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            rms: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }

    pub fn measure(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut sum = 0.0f32;
        let mut peak = 0.0f32;
        for &s in samples {
            sum += s * s;
            peak = peak.max(s.abs());
        }
        let rms = (sum / samples.len() as f32).sqrt();
        self.rms.store(rms.to_bits(), Ordering::Relaxed);
        self.peak.store(peak.to_bits(), Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.rms.store(0, Ordering::Relaxed);
        self.peak.store(0, Ordering::Relaxed);
    }

    pub fn levels(&self) -> MeterLevels {
        MeterLevels {
            rms: f32::from_bits(self.rms.load(Ordering::Relaxed)),
            peak: f32::from_bits(self.peak.load(Ordering::Relaxed)),
        }
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SplitterShared {
    monitor_volume: AtomicU32,
    monitor_muted: AtomicBool,
    tap_attached: AtomicBool,
    attachments: AtomicU64,
    frames_tapped: AtomicU64,
    /// Frames the tap could not take because the ring was full
    tap_overruns: AtomicU64,
    monitor_meter: LevelMeter,
    broadcast_meter: LevelMeter,
}

/// Audio-thread half of the splitter
pub struct SplitterCore {
    shared: Arc<SplitterShared>,
    tap: rtrb::Producer<f32>,
}

/// Control-thread half of the splitter
#[derive(Clone)]
pub struct SplitterControl {
    shared: Arc<SplitterShared>,
}

/// Consumer end of the broadcast tap
///
/// Holds unmodified master-bus samples, interleaved stereo.
pub struct BroadcastTap {
    ring: rtrb::Consumer<f32>,
}

/// Tap consumer shared between the engine and stream sessions
///
/// Only control-side tasks lock it; the audio thread writes through its
/// own producer.
pub type SharedTap = Arc<Mutex<BroadcastTap>>;

/// Build the splitter; the tap ring holds a few seconds of stereo audio
pub fn splitter(sample_rate: u32) -> (SplitterControl, SplitterCore, BroadcastTap) {
    let capacity = sample_rate as usize * 2 * TAP_RING_SECONDS;
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    let shared = Arc::new(SplitterShared {
        monitor_volume: AtomicU32::new(1.0f32.to_bits()),
        monitor_muted: AtomicBool::new(false),
        tap_attached: AtomicBool::new(false),
        attachments: AtomicU64::new(0),
        frames_tapped: AtomicU64::new(0),
        tap_overruns: AtomicU64::new(0),
        monitor_meter: LevelMeter::new(),
        broadcast_meter: LevelMeter::new(),
    });
    (
        SplitterControl { shared: shared.clone() },
        SplitterCore { shared, tap: producer },
        BroadcastTap { ring: consumer },
    )
}

impl SplitterCore {
    /// Fork one master block into the tap and the monitor buffer
    pub fn process(&mut self, master: &[f32], monitor: &mut [f32]) {
        let shared = &self.shared;

        if shared.tap_attached.load(Ordering::Acquire) {
            let frames = (master.len() / 2) as u64;
            // Whole blocks only, so the ring never goes out of stereo alignment
            if self.tap.slots() >= master.len() {
                for &sample in master {
                    let _ = self.tap.push(sample);
                }
                shared.frames_tapped.fetch_add(frames, Ordering::Relaxed);
            } else {
                shared.tap_overruns.fetch_add(frames, Ordering::Relaxed);
            }
            shared.broadcast_meter.measure(master);
        }

        let gain = if shared.monitor_muted.load(Ordering::Relaxed) {
            0.0
        } else {
            f32::from_bits(shared.monitor_volume.load(Ordering::Relaxed))
        };
        for (out, &sample) in monitor.iter_mut().zip(master.iter()) {
            *out = sample * gain;
        }
        shared.monitor_meter.measure(monitor);
    }
}

impl SplitterControl {
    /// Local output volume, 0..=1
    pub fn set_monitor_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
        self.shared.monitor_volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn monitor_volume(&self) -> f32 {
        f32::from_bits(self.shared.monitor_volume.load(Ordering::Relaxed))
    }

    pub fn set_monitor_muted(&self, muted: bool) {
        self.shared.monitor_muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_monitor_muted(&self) -> bool {
        self.shared.monitor_muted.load(Ordering::Relaxed)
    }

    /// Start feeding the broadcast tap; returns false if it already was
    pub fn attach_broadcast_sink(&self) -> bool {
        let was_attached = self.shared.tap_attached.swap(true, Ordering::AcqRel);
        if !was_attached {
            self.shared.attachments.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Broadcast sink attached");
        }
        !was_attached
    }

    /// Stop feeding the broadcast tap; monitoring is unaffected
    pub fn detach_broadcast_sink(&self) {
        if self.shared.tap_attached.swap(false, Ordering::AcqRel) {
            self.shared.broadcast_meter.clear();
            tracing::info!("Broadcast sink detached");
        }
    }

    pub fn is_broadcast_attached(&self) -> bool {
        self.shared.tap_attached.load(Ordering::Acquire)
    }

    /// Attachments made over the splitter's lifetime
    pub fn attachment_count(&self) -> u64 {
        self.shared.attachments.load(Ordering::Relaxed)
    }

    pub fn frames_tapped(&self) -> u64 {
        self.shared.frames_tapped.load(Ordering::Relaxed)
    }

    pub fn tap_overruns(&self) -> u64 {
        self.shared.tap_overruns.load(Ordering::Relaxed)
    }

    pub fn monitor_levels(&self) -> MeterLevels {
        self.shared.monitor_meter.levels()
    }

    pub fn broadcast_levels(&self) -> MeterLevels {
        self.shared.broadcast_meter.levels()
    }
}

impl BroadcastTap {
    /// Append every whole stereo frame available to `out`; returns frames read
    pub fn read_into(&mut self, out: &mut Vec<f32>) -> usize {
        let available = self.ring.slots();
        let samples = available - available % 2;
        if samples == 0 {
            return 0;
        }
        match self.ring.read_chunk(samples) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                out.extend_from_slice(first);
                out.extend_from_slice(second);
                chunk.commit_all();
                samples / 2
            }
            Err(_) => 0,
        }
    }

    /// Drop anything buffered, e.g. audio left over from a previous session
    pub fn discard_pending(&mut self) -> usize {
        let available = self.ring.slots();
        match self.ring.read_chunk(available) {
            Ok(chunk) => {
                chunk.commit_all();
                available / 2
            }
            Err(_) => 0,
        }
    }

    pub fn pending_frames(&self) -> usize {
        self.ring.slots() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_tap_receives_nothing() {
        let (_control, mut core, mut tap) = splitter(100);
        let mut monitor = vec![0.0; 8];
        core.process(&[0.5; 8], &mut monitor);

        let mut out = Vec::new();
        assert_eq!(tap.read_into(&mut out), 0);
        assert_eq!(monitor, vec![0.5; 8]);
    }

    #[test]
    fn test_monitor_volume_never_reaches_tap() {
        let (control, mut core, mut tap) = splitter(100);
        assert!(control.attach_broadcast_sink());
        control.set_monitor_volume(0.25);
        control.set_monitor_muted(true);

        let master = [0.5f32, -0.5, 0.25, -0.25];
        let mut monitor = vec![1.0; 4];
        core.process(&master, &mut monitor);

        let mut out = Vec::new();
        assert_eq!(tap.read_into(&mut out), 2);
        assert_eq!(out, master.to_vec());
        assert!(monitor.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_attach_is_counted_once() {
        let (control, _core, _tap) = splitter(100);
        assert!(control.attach_broadcast_sink());
        assert!(!control.attach_broadcast_sink());
        control.detach_broadcast_sink();
        assert_eq!(control.attachment_count(), 1);
        assert!(!control.is_broadcast_attached());
    }

    #[test]
    fn test_full_ring_drops_whole_blocks() {
        let (control, mut core, mut tap) = splitter(1);
        control.attach_broadcast_sink();
        // Ring holds 2 * TAP_RING_SECONDS samples at 1 Hz
        let block = vec![0.1f32; 2 * TAP_RING_SECONDS];
        let mut monitor = vec![0.0; block.len()];
        core.process(&block, &mut monitor);
        core.process(&block, &mut monitor);

        assert_eq!(control.tap_overruns(), TAP_RING_SECONDS as u64);
        assert_eq!(tap.pending_frames(), TAP_RING_SECONDS);
        assert_eq!(tap.discard_pending(), TAP_RING_SECONDS);
        assert_eq!(tap.pending_frames(), 0);
    }

    #[test]
    fn test_meter_reads_block_levels() {
        let meter = LevelMeter::new();
        meter.measure(&[0.5, -0.5, 0.5, -0.5]);
        let levels = meter.levels();
        assert!((levels.rms - 0.5).abs() < 1e-6);
        assert_eq!(levels.peak, 0.5);
    }
}
