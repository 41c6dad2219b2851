//! PCM chunk packager
//!
//! Turns tapped master-bus samples into fixed-duration chunks of 16-bit
//! little-endian PCM. Every connection to the encoder starts with a
//! streaming WAV header whose size fields are left at the unknown-length
//! marker, so the encoder reads until the pipe closes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::bridge::chunk::EncodedChunk;

/// Size field value for "length unknown"
const STREAMING_SIZE: u32 = 0xFFFF_FFFF;

const BITS_PER_SAMPLE: u16 = 16;

/// Packager statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct PackagerStats {
    pub chunks_produced: u64,
    pub frames_packaged: u64,
    pub bytes_produced: u64,
}

pub struct ChunkPackager {
    sample_rate: u32,
    channels: u16,
    frames_per_chunk: usize,
    /// Interleaved stereo waiting for a full chunk
    pending: Vec<f32>,
    next_sequence: u64,
    stats: PackagerStats,
}

impl ChunkPackager {
    /// `channels` is the output layout (1 downmixes, 2 passes through)
    pub fn new(sample_rate: u32, channels: u16, chunk_ms: u32) -> Self {
        let frames_per_chunk = ((sample_rate as u64 * chunk_ms.max(1) as u64) / 1000).max(1) as usize;
        Self {
            sample_rate,
            channels: channels.clamp(1, 2),
            frames_per_chunk,
            pending: Vec::with_capacity(frames_per_chunk * 4),
            next_sequence: 0,
            stats: PackagerStats::default(),
        }
    }

    pub fn frames_per_chunk(&self) -> usize {
        self.frames_per_chunk
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn stats(&self) -> PackagerStats {
        self.stats
    }

    /// Frames buffered but not yet packaged
    pub fn pending_frames(&self) -> usize {
        self.pending.len() / 2
    }

    /// Streaming WAV header sent at the start of every encoder connection
    pub fn header(&self) -> Bytes {
        let block_align = self.channels * (BITS_PER_SAMPLE / 8);
        let byte_rate = self.sample_rate * block_align as u32;

        let mut buf = BytesMut::with_capacity(44);
        buf.put_slice(b"RIFF");
        buf.put_u32_le(STREAMING_SIZE);
        buf.put_slice(b"WAVE");
        buf.put_slice(b"fmt ");
        buf.put_u32_le(16);
        buf.put_u16_le(1); // PCM
        buf.put_u16_le(self.channels);
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(byte_rate);
        buf.put_u16_le(block_align);
        buf.put_u16_le(BITS_PER_SAMPLE);
        buf.put_slice(b"data");
        buf.put_u32_le(STREAMING_SIZE);
        buf.freeze()
    }

    /// Buffer interleaved stereo and return every chunk now complete
    pub fn push(&mut self, stereo: &[f32]) -> Vec<EncodedChunk> {
        let whole = stereo.len() - stereo.len() % 2;
        self.pending.extend_from_slice(&stereo[..whole]);

        let chunk_samples = self.frames_per_chunk * 2;
        let mut chunks = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= chunk_samples {
            let chunk = self.package(offset, chunk_samples);
            chunks.push(chunk);
            offset += chunk_samples;
        }
        self.pending.drain(..offset);
        chunks
    }

    /// Package whatever is left as a short chunk
    pub fn flush(&mut self) -> Option<EncodedChunk> {
        if self.pending.is_empty() {
            return None;
        }
        let len = self.pending.len();
        let chunk = self.package(0, len);
        self.pending.clear();
        Some(chunk)
    }

    /// Drop buffered audio without packaging it
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn package(&mut self, offset: usize, len: usize) -> EncodedChunk {
        let frames = len / 2;
        let samples = &self.pending[offset..offset + len];
        let mut buf = BytesMut::with_capacity(frames * self.channels as usize * 2);

        for frame in samples.chunks_exact(2) {
            if self.channels == 1 {
                buf.put_i16_le(to_i16((frame[0] + frame[1]) * 0.5));
            } else {
                buf.put_i16_le(to_i16(frame[0]));
                buf.put_i16_le(to_i16(frame[1]));
            }
        }

        let bytes = buf.freeze();
        let chunk = EncodedChunk::new(self.next_sequence, bytes, frames);
        self.next_sequence += 1;
        self.stats.chunks_produced += 1;
        self.stats.frames_packaged += frames as u64;
        self.stats.bytes_produced += chunk.len() as u64;
        chunk
    }
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
