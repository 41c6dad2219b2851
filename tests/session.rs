//! Stream sessions driven through the console root

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bridge_config, render, target, tone, wait_until, MemoryConnector, MemoryLibrary, TEST_RATE};
use deckcast::bridge::BridgeState;
use deckcast::config::{AppConfig, SyncConfig};
use deckcast::console::Console;
use deckcast::engine::{DeckId, EngineProcessor};
use deckcast::error::{AudioError, Error, SyncError, TransportReason};

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.sample_rate = TEST_RATE;
    config.broadcast = target();
    config.bridge = bridge_config();
    config.sync = SyncConfig {
        tick_ms: 50,
        ..Default::default()
    };
    config
}

fn console() -> (Console, EngineProcessor) {
    let mut console = Console::new(config(), Arc::new(MemoryLibrary::new()));
    let processor = console.take_processor().unwrap();
    (console, processor)
}

fn play(console: &mut Console, title: &str) {
    console.load_source(DeckId::A, tone(title, 0.3, 30.0)).unwrap();
    console.engine_mut().deck_mut(DeckId::A).play().unwrap();
}

/// 100 ms chunks of stereo s16le at the test rate
const CHUNK_BYTES: usize = 100 * 2 * 2;
const WAV_HEADER_BYTES: usize = 44;

#[tokio::test]
async fn test_track_changes_keep_one_attachment_and_one_connection() {
    let (mut console, mut processor) = console();
    let connector = Arc::new(MemoryConnector::new());

    play(&mut console, "first");
    console.start_stream(connector.clone()).await.unwrap();

    for n in 0..10 {
        render(&mut processor, 0.1);
        play(&mut console, &format!("t{}", n));
        tokio::time::sleep(Duration::from_millis(10)).await;
        console.poll();
    }
    render(&mut processor, 0.5);

    let session = console.stream().unwrap();
    wait_until(|| session.bridge().stats().chunks_sent == 15).await;
    wait_until(|| console.now_playing().and_then(|n| n.title).as_deref() == Some("t9")).await;

    assert_eq!(console.engine().splitter().attachment_count(), 1);
    assert_eq!(connector.connection_count(), 1);

    let received = connector.connections().remove(0);
    assert_eq!(received[0].len(), WAV_HEADER_BYTES);
    assert_eq!(&received[0][..4], b"RIFF");
    assert_eq!(received.len(), 16);
    assert!(received[1..].iter().all(|chunk| chunk.len() == CHUNK_BYTES));

    let status = console.status();
    let stream = status.stream.unwrap();
    assert!(stream.active);
    assert_eq!(stream.bridge.state, BridgeState::Connected);
    assert_eq!(stream.frames_pumped, 1500);
    assert!(stream.sync.stats.rebinds >= 1);
}

#[tokio::test]
async fn test_stop_detaches_tap_and_keeps_monitoring() {
    let (mut console, mut processor) = console();
    let connector = Arc::new(MemoryConnector::new());

    play(&mut console, "live");
    console.start_stream(connector.clone()).await.unwrap();
    render(&mut processor, 0.3);
    wait_until(|| console.stream().unwrap().bridge().stats().chunks_sent == 3).await;

    console.stop_stream().unwrap();
    let splitter = console.engine().splitter().clone();
    assert!(!splitter.is_broadcast_attached());
    assert_eq!(console.stream().unwrap().bridge().state(), BridgeState::Stopped);

    let tapped = splitter.frames_tapped();
    let out = render(&mut processor, 0.3);
    assert!(out.iter().all(|s| s.abs() > 1e-3), "monitor went quiet");
    assert_eq!(splitter.frames_tapped(), tapped);

    let err = console.stop_stream().unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::NotActive)));

    // A new session attaches once more and opens a fresh connection
    console.start_stream(connector.clone()).await.unwrap();
    assert_eq!(splitter.attachment_count(), 2);
    assert_eq!(connector.connection_count(), 2);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let (mut console, _processor) = console();
    let connector = Arc::new(MemoryConnector::new());

    console.start_stream(connector.clone()).await.unwrap();
    let err = console.start_stream(connector.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::AlreadyActive)));
    assert_eq!(connector.connection_count(), 1);
    assert_eq!(console.engine().splitter().attachment_count(), 1);
}

#[tokio::test]
async fn test_unreachable_server_leaves_monitoring_alone() {
    let (mut console, mut processor) = console();
    let connector = Arc::new(MemoryConnector::new());
    connector.refuse_connects(1);

    play(&mut console, "local");
    let err = console.start_stream(connector.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(ref e) if e.reason == TransportReason::Unreachable));
    assert!(!console.engine().splitter().is_broadcast_attached());
    assert!(console.last_error().is_some());

    let out = render(&mut processor, 0.1);
    assert!(out.iter().all(|s| s.abs() > 1e-3));

    console.dismiss_error();
    assert!(console.status().last_error.is_none());
}

#[tokio::test]
async fn test_lost_connection_is_reported_until_dismissed() {
    let (mut console, mut processor) = console();
    let connector = Arc::new(MemoryConnector::new());

    play(&mut console, "on air");
    console.start_stream(connector.clone()).await.unwrap();
    connector.refuse_forever(true);
    connector.fail_sends(1);

    render(&mut processor, 0.2);
    wait_until(|| console.stream().unwrap().bridge().state() == BridgeState::Failed).await;

    console.poll();
    let status = console.status();
    assert!(status.last_error.unwrap().contains("server unreachable"));
    assert!(status.decks[0].is_playing);
    assert!(status.decks[0].fault.is_none());

    let out = render(&mut processor, 0.1);
    assert!(out.iter().all(|s| s.abs() > 1e-3));

    console.dismiss_error();
    assert!(console.last_error().is_none());
}

#[test]
fn test_mic_at_another_rate_is_refused() {
    let (mut console, _processor) = console();
    assert_ne!(config().capture.sample_rate, TEST_RATE);

    let err = console.start_capture().unwrap_err();
    assert!(matches!(err, Error::Audio(AudioError::UnsupportedFormat(_))));
}
