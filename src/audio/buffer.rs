//! Lock-free frame queue between capture callbacks and the mixer
//!
//! The capture callback runs on the input device's clock and the mixer on
//! the output device's clock. `FrameQueue` sits between them: when the
//! consumer falls behind, the oldest frame is discarded so latency stays
//! bounded instead of growing.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Block of interleaved samples as delivered by a device callback
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in microseconds since capture start
    pub timestamp: u64,
    /// Callback sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            timestamp,
            sequence,
        }
    }

    /// Number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / sample_rate as u64
    }
}

/// Bounded SPSC-style queue of frames with drop-oldest overflow
pub struct FrameQueue {
    queue: ArrayQueue<AudioFrame>,
    dropped: AtomicUsize,
    underruns: AtomicUsize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicUsize::new(0),
            underruns: AtomicUsize::new(0),
        }
    }

    /// Push a frame, evicting the oldest one when full
    ///
    /// Returns true when nothing had to be evicted.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.force_push(frame) {
            None => true,
            Some(_evicted) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Discard everything queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames evicted because the consumer fell behind
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reads that found the queue empty
    pub fn underrun_count(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    fn note_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;

pub fn create_frame_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}

/// Pulls exact-size stereo blocks out of a `FrameQueue`
///
/// Device callbacks rarely line up with the mixer's block size, so the
/// reader keeps the unread tail of the last frame between calls. Mono input
/// is duplicated to both channels; extra channels beyond two are ignored.
pub struct FrameReader {
    queue: SharedFrameQueue,
    pending: Vec<f32>,
    pending_channels: u16,
    cursor: usize,
}

impl FrameReader {
    pub fn new(queue: SharedFrameQueue) -> Self {
        Self {
            queue,
            pending: Vec::new(),
            pending_channels: 2,
            cursor: 0,
        }
    }

    /// Fill `out` (interleaved stereo) completely; missing audio is silence
    ///
    /// Returns the number of stereo frames that came from real input.
    pub fn read_stereo(&mut self, out: &mut [f32]) -> usize {
        let wanted = out.len() / 2;
        let mut written = 0;

        while written < wanted {
            let channels = self.pending_channels.max(1) as usize;
            let available = (self.pending.len() - self.cursor.min(self.pending.len())) / channels;

            if available == 0 {
                match self.queue.pop() {
                    Some(frame) => {
                        self.pending = frame.samples;
                        self.pending_channels = frame.channels;
                        self.cursor = 0;
                        continue;
                    }
                    None => {
                        self.queue.note_underrun();
                        break;
                    }
                }
            }

            let take = available.min(wanted - written);
            for i in 0..take {
                let base = self.cursor + i * channels;
                let left = self.pending[base];
                let right = if channels > 1 { self.pending[base + 1] } else { left };
                out[(written + i) * 2] = left;
                out[(written + i) * 2 + 1] = right;
            }
            self.cursor += take * channels;
            written += take;
        }

        for sample in &mut out[written * 2..] {
            *sample = 0.0;
        }
        written
    }

    /// Drop buffered input so the next read starts from fresh audio
    pub fn reset(&mut self) {
        self.pending.clear();
        self.cursor = 0;
        self.queue.clear();
    }
}
