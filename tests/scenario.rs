//! Seek, track end and auto-advance driven through the real engine and
//! sync loop, one simulated device callback at a time

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine, render, tone, MemoryLibrary, TEST_RATE};
use deckcast::config::SyncConfig;
use deckcast::engine::{AudioEngine, DeckEvent, DeckId, DeckState, EngineProcessor, SharedTap};
use deckcast::sync::{AdvanceOutcome, AutoAdvance, SyncAction, SyncLoop, WatchMetadataSink};

const TICK: Duration = Duration::from_millis(200);

struct Rig {
    engine: AudioEngine,
    processor: EngineProcessor,
    tap: SharedTap,
    tapped: Vec<f32>,
    rendered_frames: usize,
    sync: SyncLoop,
    advance: AutoAdvance,
    ended: Vec<(DeckId, DeckEvent)>,
    outcomes: Vec<AdvanceOutcome>,
}

impl Rig {
    fn states(&self) -> Vec<DeckState> {
        DeckId::ALL.iter().map(|d| self.engine.deck(*d).snapshot()).collect()
    }

    /// One reconciliation period: audio, then events, then a sync tick
    fn step(&mut self) -> Vec<SyncAction> {
        let block = render(&mut self.processor, TICK.as_secs_f64());
        self.rendered_frames += block.len() / 2;
        self.tap.lock().read_into(&mut self.tapped);

        for (deck, event) in self.engine.poll_events() {
            let DeckEvent::Ended { source_id, pass } = event;
            self.ended.push((deck, event));
            let outcome = self
                .advance
                .on_ended(self.engine.deck_mut(deck), source_id, pass)
                .unwrap();
            self.outcomes.push(outcome);
        }

        let states = self.states();
        self.sync.tick(&states, TICK)
    }
}

#[test]
fn test_seek_then_end_advances_without_a_gap() {
    let (mut engine, processor) = engine();
    let library = Arc::new(MemoryLibrary::new());
    let track2 = tone("Track2", 0.2, 60.0);
    let track2_id = track2.id();
    library.insert("track2", track2);
    library.insert("track3", tone("Track3", 0.1, 60.0));

    let mut advance = AutoAdvance::new(library);
    advance.enqueue(DeckId::A, "track2");
    advance.enqueue(DeckId::A, "track3");

    let track1 = tone("Track1", 0.3, 120.0);
    let track1_id = track1.id();
    engine.deck_mut(DeckId::A).load(track1).unwrap();
    engine.deck_mut(DeckId::A).play().unwrap();
    assert!(engine.splitter().attach_broadcast_sink());

    let metadata = Arc::new(WatchMetadataSink::new());
    let mut sync = SyncLoop::new(&SyncConfig::default(), metadata.clone());
    let tap = engine.broadcast_tap();
    let initial: Vec<DeckState> = DeckId::ALL.iter().map(|d| engine.deck(*d).snapshot()).collect();
    sync.activate(&initial);

    let mut rig = Rig {
        engine,
        processor,
        tap,
        tapped: Vec::new(),
        rendered_frames: 0,
        sync,
        advance,
        ended: Vec::new(),
        outcomes: Vec::new(),
    };

    // t = 10 s
    for _ in 0..50 {
        rig.step();
    }
    let deck_time = rig.engine.deck(DeckId::A).snapshot().current_time;
    assert!((deck_time - 10.0).abs() < 1e-6);

    rig.engine.deck_mut(DeckId::A).seek(30.0).unwrap();
    let actions = rig.step();
    assert!(rig.ended.is_empty(), "seek must never look like an end");
    assert!(actions
        .iter()
        .any(|a| matches!(a, SyncAction::Nudged { deck: DeckId::A, .. })));
    let believed = rig.sync.state().lane(DeckId::A).time;
    assert!((believed - (30.0 + TICK.as_secs_f64())).abs() <= 0.1, "believed {}", believed);
    assert_eq!(rig.sync.state().lane(DeckId::A).source_id, Some(track1_id));

    // Ordinary playback only drifts within tolerance
    for _ in 0..48 {
        let actions = rig.step();
        assert!(!actions.iter().any(|a| matches!(a, SyncAction::Nudged { .. })));
    }

    // t = 20 s: run Track1 into its end
    rig.engine.deck_mut(DeckId::A).seek(120.0).unwrap();
    let actions = rig.step();

    assert_eq!(rig.ended.len(), 1);
    assert!(matches!(
        &rig.outcomes[0],
        AdvanceOutcome::Advanced { deck: DeckId::A, track, source_id, .. }
            if track == "track2" && *source_id == track2_id
    ));

    // Boundary jitter: the same end reported again changes nothing
    for _ in 0..3 {
        let repeat = rig
            .advance
            .on_ended(rig.engine.deck_mut(DeckId::A), track1_id, 1)
            .unwrap();
        assert_eq!(repeat, AdvanceOutcome::Ignored { deck: DeckId::A });
    }
    assert_eq!(rig.advance.queue(DeckId::A).items(), vec!["track3"]);

    let deck = rig.engine.deck(DeckId::A).snapshot();
    assert_eq!(deck.source_id, Some(track2_id));
    assert_eq!(deck.current_time, 0.0);
    assert!(deck.is_playing);

    // Rebound on the same tick the deck changed tracks
    assert!(actions.iter().any(|a| matches!(
        a,
        SyncAction::Rebound { deck: DeckId::A, from: Some(from), to: Some(to) }
            if *from == track1_id && *to == track2_id
    )));
    assert_eq!(rig.sync.state().lane(DeckId::A).source_id, Some(track2_id));
    assert_eq!(
        metadata.latest().and_then(|n| n.title).as_deref(),
        Some("Track2")
    );

    rig.step();
    assert_eq!(rig.ended.len(), 1);

    // The tap saw every rendered frame: no gap, one attachment
    let splitter = rig.engine.splitter();
    assert_eq!(rig.tapped.len() / 2, rig.rendered_frames);
    assert_eq!(splitter.frames_tapped() as usize, rig.rendered_frames);
    assert_eq!(splitter.tap_overruns(), 0);
    assert_eq!(splitter.attachment_count(), 1);
    assert_eq!(rig.rendered_frames, 101 * TICK.as_millis() as usize * TEST_RATE as usize / 1000);

    // Track2 is what the broadcast carries now
    let tail = &rig.tapped[rig.tapped.len() - 64..];
    assert!(tail.iter().all(|s| s.abs() > 1e-3), "tail {:?}", &tail[..4]);
}
