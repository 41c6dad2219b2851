//! Auto-advance: load the next queued track when a deck ends
//!
//! Each deck has its own FIFO queue. Each end of playback advances a deck at
//! most once: repeated reports of an end already acted on, and ends of a
//! source the deck no longer holds, are ignored. Tracks that fail to
//! decode are skipped and the next one is tried.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::{decode_file, AudioSource, SourceId};
use crate::engine::{DeckId, DeckPlayer};
use crate::error::{DecodeError, Error};

/// Supplies decoded sources by track reference
pub trait TrackLibrary: Send + Sync {
    fn resolve(&self, track: &str) -> Result<AudioSource, DecodeError>;
}

/// Library over the local filesystem
///
/// Relative references resolve against `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileLibrary {
    root: Option<PathBuf>,
}

impl FileLibrary {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn path_for(&self, track: &str) -> PathBuf {
        let path = Path::new(track);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl TrackLibrary for FileLibrary {
    fn resolve(&self, track: &str) -> Result<AudioSource, DecodeError> {
        let path = self.path_for(track);
        if !path.is_file() {
            return Err(DecodeError::NotInLibrary(path.display().to_string()));
        }
        decode_file(&path)
    }
}

/// FIFO of track references for one deck
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackQueue {
    items: VecDeque<String>,
}

impl TrackQueue {
    pub fn push(&mut self, track: impl Into<String>) {
        self.items.push_back(track.into());
    }

    fn push_front(&mut self, track: String) {
        self.items.push_front(track);
    }

    pub fn pop_next(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        self.items.remove(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }
}

/// Result of handling one `Ended` event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Advanced {
        deck: DeckId,
        track: String,
        source_id: SourceId,
        /// Tracks skipped on the way, with the reason
        skipped: Vec<(String, String)>,
    },
    QueueEmpty {
        deck: DeckId,
        skipped: Vec<(String, String)>,
    },
    /// Duplicate or stale event
    Ignored { deck: DeckId },
}

pub struct AutoAdvance {
    queues: [TrackQueue; 2],
    /// Last end pass each deck acted on
    handled: [Option<u64>; 2],
    library: Arc<dyn TrackLibrary>,
    autoplay: bool,
}

impl AutoAdvance {
    pub fn new(library: Arc<dyn TrackLibrary>) -> Self {
        Self {
            queues: Default::default(),
            handled: [None; 2],
            library,
            autoplay: true,
        }
    }

    /// Whether the next track starts playing right after it loads
    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    pub fn queue(&self, deck: DeckId) -> &TrackQueue {
        &self.queues[deck.index()]
    }

    pub fn queue_mut(&mut self, deck: DeckId) -> &mut TrackQueue {
        &mut self.queues[deck.index()]
    }

    pub fn enqueue(&mut self, deck: DeckId, track: impl Into<String>) {
        self.queues[deck.index()].push(track);
    }

    pub fn library(&self) -> Arc<dyn TrackLibrary> {
        self.library.clone()
    }

    /// React to the `pass`-th end of `source_id` on `player`
    ///
    /// An end is handled once it advances the deck or finds the queue empty.
    /// If loading the next track fails, the track goes back to the head of the
    /// queue and the same end may be retried.
    pub fn on_ended(
        &mut self,
        player: &mut DeckPlayer,
        source_id: SourceId,
        pass: u64,
    ) -> Result<AdvanceOutcome, Error> {
        let deck = player.id();
        let slot = deck.index();

        let current = player.source().map(|s| s.id());
        let repeated = matches!(self.handled[slot], Some(handled) if handled >= pass);
        if repeated || current != Some(source_id) {
            tracing::debug!("Ignoring repeated or stale end of {} on {}", source_id, deck);
            return Ok(AdvanceOutcome::Ignored { deck });
        }

        let mut skipped = Vec::new();
        while let Some(track) = self.queues[slot].pop_next() {
            let source = match self.library.resolve(&track) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!("Skipping '{}' on {}: {}", track, deck, e);
                    skipped.push((track, e.to_string()));
                    continue;
                }
            };
            let next_id = source.id();
            if let Err(e) = player.load(source) {
                self.queues[slot].push_front(track);
                return Err(e.into());
            }
            self.handled[slot] = Some(pass);
            if self.autoplay {
                player.play()?;
            }
            tracing::info!("{} advanced to '{}'", deck, track);
            return Ok(AdvanceOutcome::Advanced {
                deck,
                track,
                source_id: next_id,
                skipped,
            });
        }

        self.handled[slot] = Some(pass);
        tracing::info!("{} reached the end of its queue", deck);
        Ok(AdvanceOutcome::QueueEmpty { deck, skipped })
    }
}
