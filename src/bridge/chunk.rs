//! Unit of data handed to the external encoder

use bytes::Bytes;

/// One packaged block of broadcast audio
///
/// Chunks are numbered in production order; the bridge delivers them in
/// that order and never reorders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub sequence: u64,
    pub bytes: Bytes,
    /// Audio frames carried by this chunk
    pub frames: usize,
}

impl EncodedChunk {
    pub fn new(sequence: u64, bytes: Bytes, frames: usize) -> Self {
        Self {
            sequence,
            bytes,
            frames,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
