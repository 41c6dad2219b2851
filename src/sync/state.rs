//! What the broadcast side believes each deck is doing

use serde::Serialize;

use crate::audio::{SourceId, TrackInfo};
use crate::engine::{DeckId, DeckState};

/// Broadcast-side binding for one deck
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkBinding {
    pub deck: DeckId,
    pub source_id: Option<SourceId>,
    pub track: Option<TrackInfo>,
    pub duration: f64,
    /// Believed playhead in seconds, extrapolated between ticks
    pub time: f64,
    pub rate: f64,
    pub looping: bool,
    pub playing: bool,
    /// Deck's reposition count at the last snap or bind
    pub repositions: u64,
}

impl SinkBinding {
    pub fn unbound(deck: DeckId) -> Self {
        Self {
            deck,
            source_id: None,
            track: None,
            duration: 0.0,
            time: 0.0,
            rate: 1.0,
            looping: false,
            playing: false,
            repositions: 0,
        }
    }

    /// Take everything from the deck, resetting the baseline
    pub fn bind(&mut self, deck: &DeckState) {
        self.source_id = deck.source_id;
        self.track = deck.track.clone();
        self.duration = deck.duration;
        self.time = deck.current_time;
        self.rate = deck.playback_rate;
        self.looping = deck.loop_enabled;
        self.playing = deck.is_playing;
        self.repositions = deck.repositions;
    }

    /// Advance the believed playhead by `elapsed` seconds of wall time
    pub fn extrapolate(&mut self, elapsed: f64) {
        if !self.playing {
            return;
        }
        self.time += elapsed * self.rate;
        if self.looping && self.duration > 0.0 {
            self.time %= self.duration;
        } else {
            self.time = self.time.min(self.duration);
        }
    }
}

/// The sync loop's view of the broadcast sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastSinkState {
    pub is_active: bool,
    pub lanes: [SinkBinding; 2],
}

impl BroadcastSinkState {
    pub fn new() -> Self {
        Self {
            is_active: false,
            lanes: [SinkBinding::unbound(DeckId::A), SinkBinding::unbound(DeckId::B)],
        }
    }

    pub fn lane(&self, deck: DeckId) -> &SinkBinding {
        &self.lanes[deck.index()]
    }

    pub fn lane_mut(&mut self, deck: DeckId) -> &mut SinkBinding {
        &mut self.lanes[deck.index()]
    }
}

impl Default for BroadcastSinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(duration: f64, looping: bool) -> SinkBinding {
        SinkBinding {
            duration,
            looping,
            playing: true,
            rate: 2.0,
            ..SinkBinding::unbound(DeckId::A)
        }
    }

    #[test]
    fn test_extrapolation_scales_with_rate() {
        let mut b = binding(100.0, false);
        b.extrapolate(0.5);
        assert!((b.time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_extrapolation_stops_at_end_or_wraps() {
        let mut b = binding(10.0, false);
        b.time = 9.5;
        b.extrapolate(1.0);
        assert_eq!(b.time, 10.0);

        let mut b = binding(10.0, true);
        b.time = 9.5;
        b.extrapolate(1.0);
        assert!((b.time - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_paused_binding_holds_position() {
        let mut b = binding(10.0, false);
        b.playing = false;
        b.time = 3.0;
        b.extrapolate(5.0);
        assert_eq!(b.time, 3.0);
    }
}
