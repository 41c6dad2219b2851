//! Outbound chunk queue
//!
//! Bounded, drop-oldest. Writers never wait: when the queue is full the
//! oldest chunk is discarded to make room, so the freshest audio always
//! reaches the encoder first after a stall. A single transport task drains
//! it in order.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::bridge::chunk::EncodedChunk;

/// What happened to a pushed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the chunk with this sequence number
    DroppedOldest(u64),
    /// The queue is closed
    Rejected,
}

struct QueueInner {
    chunks: VecDeque<EncodedChunk>,
    accepting: bool,
}

pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::with_capacity(capacity),
                accepting: true,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking
    pub fn push(&self, chunk: EncodedChunk) -> PushOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if !inner.accepting {
                return PushOutcome::Rejected;
            }
            let evicted = if inner.chunks.len() >= self.capacity {
                inner.chunks.pop_front()
            } else {
                None
            };
            inner.chunks.push_back(chunk);
            match evicted {
                Some(old) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::DroppedOldest(old.sequence)
                }
                None => PushOutcome::Queued,
            }
        };
        self.notify.notify_one();
        outcome
    }

    pub fn pop(&self) -> Option<EncodedChunk> {
        self.inner.lock().chunks.pop_front()
    }

    /// Wait for the next chunk; `None` once the queue is closed
    ///
    /// Meant for a single consumer.
    pub async fn next(&self) -> Option<EncodedChunk> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(chunk) = inner.chunks.pop_front() {
                    return Some(chunk);
                }
                if !inner.accepting {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting chunks and discard anything queued
    ///
    /// Returns the number of chunks discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            inner.accepting = false;
            let n = inner.chunks.len();
            inner.chunks.clear();
            n
        };
        self.notify.notify_one();
        discarded
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.lock().accepting
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks evicted because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(sequence: u64) -> EncodedChunk {
        EncodedChunk::new(sequence, Bytes::from(vec![sequence as u8; 4]), 1)
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = OutboundQueue::new(3);
        for seq in 0..3 {
            assert_eq!(queue.push(chunk(seq)), PushOutcome::Queued);
        }
        assert_eq!(queue.push(chunk(3)), PushOutcome::DroppedOldest(0));
        assert_eq!(queue.push(chunk(4)), PushOutcome::DroppedOldest(1));
        assert_eq!(queue.dropped_count(), 2);

        let remaining: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|c| c.sequence).collect();
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let queue = OutboundQueue::new(4);
        queue.push(chunk(0));
        queue.push(chunk(1));
        assert_eq!(queue.close(), 2);
        assert_eq!(queue.push(chunk(2)), PushOutcome::Rejected);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_wakes_on_push_and_close() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(c) = queue.next().await {
                    seen.push(c.sequence);
                }
                seen
            })
        };

        for seq in 0..3 {
            queue.push(chunk(seq));
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.close();

        let seen = consumer.await.unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
