//! Now-playing side channel
//!
//! Published on every track change, fire-and-forget. Nothing waits for a
//! reader and nothing is retried.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::audio::{SourceId, TrackInfo};
use crate::engine::DeckId;

/// Track now bound on a deck
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub deck: DeckId,
    pub source_id: SourceId,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub at: DateTime<Utc>,
}

impl NowPlaying {
    pub fn new(deck: DeckId, source_id: SourceId, track: Option<&TrackInfo>) -> Self {
        Self {
            deck,
            source_id,
            title: track.and_then(|t| t.title.clone()),
            artist: track.and_then(|t| t.artist.clone()),
            at: Utc::now(),
        }
    }

    /// "Artist - Title", or whichever half is known
    pub fn display_text(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.clone(),
            (Some(artist), None) => artist.clone(),
            (None, None) => String::from("Unknown"),
        }
    }
}

/// Receiver of now-playing updates
pub trait MetadataSink: Send + Sync {
    fn publish(&self, now_playing: NowPlaying);
}

/// Sink backed by a `watch` channel; readers see the latest update
pub struct WatchMetadataSink {
    tx: watch::Sender<Option<NowPlaying>>,
}

impl WatchMetadataSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NowPlaying>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<NowPlaying> {
        self.tx.borrow().clone()
    }
}

impl Default for WatchMetadataSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataSink for WatchMetadataSink {
    fn publish(&self, now_playing: NowPlaying) {
        tracing::info!("Now playing on {}: {}", now_playing.deck, now_playing.display_text());
        // send_replace never fails, with or without subscribers
        self.tx.send_replace(Some(now_playing));
    }
}
