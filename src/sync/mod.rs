//! Broadcast-side bookkeeping: sync loop, auto-advance, now-playing

pub mod advance;
pub mod metadata;
pub mod reconciler;
pub mod state;

pub use advance::{AdvanceOutcome, AutoAdvance, FileLibrary, TrackLibrary, TrackQueue};
pub use metadata::{MetadataSink, NowPlaying, WatchMetadataSink};
pub use reconciler::{SyncAction, SyncLoop, SyncStats};
pub use state::{BroadcastSinkState, SinkBinding};
