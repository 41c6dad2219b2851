//! Monitor/broadcast isolation and deck independence

mod common;

use proptest::prelude::*;

use common::{engine, render, tone};
use deckcast::engine::{AudioEngine, DeckId, DeckState, EngineProcessor};

/// Two playing decks with the broadcast tap attached
fn playing_rig() -> (AudioEngine, EngineProcessor) {
    let (mut engine, processor) = engine();
    engine.deck_mut(DeckId::A).load(tone("A", 0.4, 30.0)).unwrap();
    engine.deck_mut(DeckId::B).load(tone("B", -0.25, 30.0)).unwrap();
    for deck in DeckId::ALL {
        engine.deck_mut(deck).play().unwrap();
    }
    engine.splitter().attach_broadcast_sink();
    (engine, processor)
}

fn drain_tap(engine: &AudioEngine) -> Vec<f32> {
    let mut out = Vec::new();
    engine.broadcast_tap().lock().read_into(&mut out);
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_monitor_settings_never_reach_the_tap(
        changes in prop::collection::vec((0.0f32..=1.0, any::<bool>()), 1..8)
    ) {
        let (reference_engine, mut reference) = playing_rig();
        let (engine, mut processor) = playing_rig();

        for (volume, muted) in changes {
            engine.splitter().set_monitor_volume(volume);
            engine.splitter().set_monitor_muted(muted);

            let expected_monitor = if muted { 0.0 } else { volume };
            let reference_out = render(&mut reference, 0.1);
            let out = render(&mut processor, 0.1);
            for (o, r) in out.iter().zip(reference_out.iter()) {
                prop_assert!((o - r * expected_monitor).abs() < 1e-6);
            }

            let expected = drain_tap(&reference_engine);
            let tapped = drain_tap(&engine);
            prop_assert_eq!(tapped.len(), expected.len());
            for (t, e) in tapped.iter().zip(expected.iter()) {
                prop_assert!((t - e).abs() < 1e-6);
            }
            let levels = engine.splitter().broadcast_levels();
            let reference_levels = reference_engine.splitter().broadcast_levels();
            prop_assert!((levels.rms - reference_levels.rms).abs() < 1e-6);
        }
    }
}

#[test]
fn test_fixed_monitor_volumes_leave_broadcast_level_alone() {
    for volume in [0.0, 0.01, 0.5, 1.0] {
        for muted in [false, true] {
            let (engine, mut processor) = playing_rig();
            render(&mut processor, 0.2);
            let before = engine.splitter().broadcast_levels();

            engine.splitter().set_monitor_volume(volume);
            engine.splitter().set_monitor_muted(muted);
            render(&mut processor, 0.2);
            let after = engine.splitter().broadcast_levels();

            assert!((before.rms - after.rms).abs() < 1e-6, "volume {} muted {}", volume, muted);
            assert!((before.peak - after.peak).abs() < 1e-6);
        }
    }
}

#[derive(Debug, Clone)]
enum DeckOp {
    Seek(f64),
    Play,
    Pause,
    Rate(f64),
    Loop(bool),
    Mute(bool),
    Reload,
}

fn deck_op() -> impl Strategy<Value = DeckOp> {
    prop_oneof![
        (0.0f64..200.0).prop_map(DeckOp::Seek),
        Just(DeckOp::Play),
        Just(DeckOp::Pause),
        (0.25f64..4.0).prop_map(DeckOp::Rate),
        any::<bool>().prop_map(DeckOp::Loop),
        any::<bool>().prop_map(DeckOp::Mute),
        Just(DeckOp::Reload),
    ]
}

fn apply(engine: &mut AudioEngine, deck: DeckId, op: &DeckOp) {
    let player = engine.deck_mut(deck);
    match op {
        DeckOp::Seek(t) => {
            player.seek(*t).unwrap();
        }
        DeckOp::Play => player.play().unwrap(),
        DeckOp::Pause => player.pause().unwrap(),
        DeckOp::Rate(r) => player.set_playback_rate(*r).unwrap(),
        DeckOp::Loop(on) => player.set_loop(*on).unwrap(),
        DeckOp::Mute(on) => player.set_muted(*on).unwrap(),
        DeckOp::Reload => player.load(tone("again", 0.1, 20.0)).unwrap(),
    }
}

/// Everything about `b` except the playhead
fn identity(state: &DeckState) -> (Option<deckcast::audio::SourceId>, f64, bool, bool, bool) {
    (
        state.source_id,
        state.playback_rate,
        state.is_playing,
        state.loop_enabled,
        state.is_muted,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_operations_on_one_deck_leave_the_other_alone(
        ops in prop::collection::vec(deck_op(), 1..24),
        target in prop_oneof![Just(DeckId::A), Just(DeckId::B)],
    ) {
        let (mut engine, mut processor) = common::engine();
        let other = target.other();
        engine.deck_mut(other).load(tone("steady", 0.2, 300.0)).unwrap();
        engine.deck_mut(other).seek(45.0).unwrap();
        engine.deck_mut(other).play().unwrap();
        engine.deck_mut(target).load(tone("busy", 0.3, 120.0)).unwrap();

        render(&mut processor, 0.05);
        let baseline = engine.deck(other).snapshot();
        let mut last_time = baseline.current_time;

        for op in &ops {
            apply(&mut engine, target, op);
            render(&mut processor, 0.05);

            let now = engine.deck(other).snapshot();
            prop_assert_eq!(identity(&now), identity(&baseline));
            prop_assert!((now.current_time - (last_time + 0.05)).abs() < 1e-6);
            last_time = now.current_time;
        }
    }
}

#[test]
fn test_seeking_a_leaves_b_advancing_from_45() {
    let (mut engine, mut processor) = common::engine();
    engine.deck_mut(DeckId::A).load(tone("A", 0.3, 180.0)).unwrap();
    engine.deck_mut(DeckId::B).load(tone("B", 0.3, 180.0)).unwrap();
    engine.deck_mut(DeckId::B).seek(45.0).unwrap();
    for deck in DeckId::ALL {
        engine.deck_mut(deck).play().unwrap();
    }

    let mut last = engine.deck(DeckId::B).snapshot().current_time;
    assert_eq!(last, 45.0);
    for step in 0..20 {
        if step == 5 {
            assert_eq!(engine.deck_mut(DeckId::A).seek(90.0).unwrap(), 90.0);
        }
        render(&mut processor, 0.1);
        let b = engine.deck(DeckId::B).snapshot().current_time;
        assert!(b > last, "B went from {} to {}", last, b);
        last = b;
    }
    assert!((last - 47.0).abs() < 1e-6);
    assert!((engine.deck(DeckId::A).snapshot().current_time - 91.5).abs() < 1e-6);
}
