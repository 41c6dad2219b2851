//! Streaming synchronization loop
//!
//! Both decks already reach the broadcast tap through the master bus, so
//! this loop never reroutes audio. Each tick it compares every deck's state
//! with the broadcast-side binding for that deck and:
//! - rebinds on a track change (new source id) and publishes now-playing,
//!   leaving the splitter tap and encoder bridge alone;
//! - hard-snaps the believed position when drift exceeds the threshold;
//! - carries rate and loop changes over on the tick they are seen.
//!
//! Explicit seeks and restarts are followed at once. Any other drift that
//! stays over threshold for `max_degraded_ticks` consecutive ticks raises one
//! `DriftCorrectionFailure` warning per episode.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::SourceId;
use crate::config::SyncConfig;
use crate::engine::{DeckId, DeckState};
use crate::error::SyncError;
use crate::sync::metadata::{MetadataSink, NowPlaying};
use crate::sync::state::BroadcastSinkState;

/// What a tick did
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Rebound {
        deck: DeckId,
        from: Option<SourceId>,
        to: Option<SourceId>,
    },
    Nudged {
        deck: DeckId,
        drift_secs: f64,
    },
    RateChanged {
        deck: DeckId,
        rate: f64,
    },
    LoopChanged {
        deck: DeckId,
        enabled: bool,
    },
    Degraded(SyncError),
}

/// Counters for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub ticks: u64,
    pub rebinds: u64,
    pub nudges: u64,
    pub degraded_warnings: u64,
    /// Largest drift seen on the last tick, in seconds
    pub last_drift_secs: f64,
}

pub struct SyncLoop {
    state: BroadcastSinkState,
    drift_threshold: f64,
    max_degraded_ticks: u32,
    over_threshold: [u32; 2],
    stats: SyncStats,
    metadata: Arc<dyn MetadataSink>,
}

impl SyncLoop {
    pub fn new(config: &SyncConfig, metadata: Arc<dyn MetadataSink>) -> Self {
        Self {
            state: BroadcastSinkState::new(),
            drift_threshold: config.drift_threshold_secs,
            max_degraded_ticks: config.max_degraded_ticks.max(1),
            over_threshold: [0; 2],
            stats: SyncStats::default(),
            metadata,
        }
    }

    /// Enter the active state with the decks' current state as baseline
    pub fn activate(&mut self, decks: &[DeckState]) {
        self.state = BroadcastSinkState::new();
        for deck in decks {
            let lane = self.state.lane_mut(deck.deck);
            lane.bind(deck);
            if let Some(source_id) = deck.source_id {
                self.metadata
                    .publish(NowPlaying::new(deck.deck, source_id, deck.track.as_ref()));
            }
        }
        self.state.is_active = true;
        self.over_threshold = [0; 2];
        tracing::info!("Sync loop active");
    }

    /// Back to idle; ticks do nothing until the next `activate`
    pub fn deactivate(&mut self) {
        if self.state.is_active {
            self.state.is_active = false;
            tracing::info!("Sync loop idle after {} ticks", self.stats.ticks);
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    pub fn state(&self) -> &BroadcastSinkState {
        &self.state
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Reconcile once; `elapsed` is the wall time since the previous tick
    pub fn tick(&mut self, decks: &[DeckState], elapsed: Duration) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        if !self.state.is_active {
            return actions;
        }
        self.stats.ticks += 1;
        self.stats.last_drift_secs = 0.0;
        let elapsed = elapsed.as_secs_f64();

        for deck in decks {
            let id = deck.deck;
            let slot = id.index();
            let lane = self.state.lane_mut(id);

            if deck.source_id != lane.source_id {
                let from = lane.source_id;
                lane.bind(deck);
                self.over_threshold[slot] = 0;
                self.stats.rebinds += 1;
                tracing::info!("Broadcast binding for {} moved to a new source", id);
                if let Some(source_id) = deck.source_id {
                    self.metadata
                        .publish(NowPlaying::new(id, source_id, deck.track.as_ref()));
                }
                actions.push(SyncAction::Rebound {
                    deck: id,
                    from,
                    to: deck.source_id,
                });
                continue;
            }

            lane.extrapolate(elapsed);

            if lane.rate != deck.playback_rate {
                lane.rate = deck.playback_rate;
                actions.push(SyncAction::RateChanged { deck: id, rate: lane.rate });
            }
            if lane.looping != deck.loop_enabled {
                lane.looping = deck.loop_enabled;
                actions.push(SyncAction::LoopChanged { deck: id, enabled: lane.looping });
            }
            lane.playing = deck.is_playing;
            lane.duration = deck.duration;

            let drift = (lane.time - deck.current_time).abs();
            if deck.repositions != lane.repositions {
                // Operator seek or restart: follow it without counting a failure
                lane.repositions = deck.repositions;
                lane.time = deck.current_time;
                self.over_threshold[slot] = 0;
                self.stats.nudges += 1;
                tracing::debug!("{} repositioned to {:.3}s", id, deck.current_time);
                actions.push(SyncAction::Nudged { deck: id, drift_secs: drift });
                continue;
            }

            self.stats.last_drift_secs = self.stats.last_drift_secs.max(drift);
            if drift <= self.drift_threshold {
                self.over_threshold[slot] = 0;
                continue;
            }

            lane.time = deck.current_time;
            self.stats.nudges += 1;
            tracing::debug!("{} drifted {:.3}s, snapped to {:.3}s", id, drift, deck.current_time);
            actions.push(SyncAction::Nudged { deck: id, drift_secs: drift });

            self.over_threshold[slot] += 1;
            if self.over_threshold[slot] == self.max_degraded_ticks {
                let warning = SyncError::DriftCorrectionFailure {
                    deck: id.to_string(),
                    ticks: self.over_threshold[slot],
                    drift_secs: drift,
                };
                tracing::warn!("Degraded sync: {}", warning);
                self.stats.degraded_warnings += 1;
                actions.push(SyncAction::Degraded(warning));
            }
        }

        actions
    }
}
