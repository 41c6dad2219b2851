//! Encoder bridge delivery, backpressure, stop and reconnect behavior

mod common;

use bytes::Bytes;
use std::sync::Arc;

use common::{bridge_config, chunk, target, wait_until, MemoryConnector};
use deckcast::bridge::{BridgeEvent, BridgeState, EncoderBridge};
use deckcast::error::TransportReason;

fn preamble() -> Bytes {
    Bytes::from_static(b"RIFF-HEADER")
}

fn payload(sequence: u64) -> Bytes {
    chunk(sequence).bytes
}

async fn started(connector: &MemoryConnector) -> EncoderBridge {
    EncoderBridge::start(Arc::new(connector.clone()), target(), &bridge_config(), preamble())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_chunks_arrive_in_order_after_preamble() {
    let connector = MemoryConnector::new();
    let bridge = started(&connector).await;

    for seq in 0..6 {
        bridge.write(chunk(seq)).unwrap();
    }
    wait_until(|| bridge.stats().chunks_sent == 6).await;

    let mut expected = vec![preamble()];
    expected.extend((0..6).map(payload));
    assert_eq!(connector.connections(), vec![expected]);
    assert_eq!(bridge.state(), BridgeState::Connected);
    assert_eq!(bridge.stats().chunks_dropped, 0);
}

#[tokio::test]
async fn test_full_queue_drops_oldest_and_reports_it() {
    let connector = MemoryConnector::new();
    let bridge = started(&connector).await;
    let mut events = bridge.subscribe();

    // Park chunk 0 in the transport so the queue backs up behind it
    connector.hold();
    bridge.write(chunk(0)).unwrap();
    wait_until(|| bridge.stats().queue_depth == 0).await;

    // Capacity 8: chunks 1 and 2 get evicted by 9 and 10
    for seq in 1..=10 {
        bridge.write(chunk(seq)).unwrap();
    }
    let stats = bridge.stats();
    assert_eq!(stats.chunks_dropped, 2);
    assert_eq!(stats.queue_depth, 8);
    assert_eq!(events.try_recv().unwrap(), BridgeEvent::ChunksDropped(1));
    assert_eq!(events.try_recv().unwrap(), BridgeEvent::ChunksDropped(2));

    connector.release();
    wait_until(|| bridge.stats().chunks_sent == 9).await;

    let mut expected = vec![preamble(), payload(0)];
    expected.extend((3..=10).map(payload));
    assert_eq!(connector.connections(), vec![expected]);
}

#[tokio::test]
async fn test_stop_rejects_writes_immediately() {
    let connector = MemoryConnector::new();
    let bridge = started(&connector).await;

    connector.hold();
    bridge.write(chunk(0)).unwrap();
    bridge.write(chunk(1)).unwrap();
    bridge.stop();

    let err = bridge.write(chunk(2)).unwrap_err();
    assert_eq!(err.reason, TransportReason::Closed);
    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert!(!bridge.is_running());

    connector.release();
    bridge.join().await;

    // Whatever was in flight may land; nothing written after stop does
    let received = connector.all_bytes();
    assert!(!received.contains(&payload(2)));
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[tokio::test]
async fn test_failed_chunk_is_resent_after_reconnect() {
    let connector = MemoryConnector::new();
    let bridge = started(&connector).await;
    let mut events = bridge.subscribe();

    connector.fail_sends(1);
    bridge.write(chunk(0)).unwrap();
    bridge.write(chunk(1)).unwrap();
    wait_until(|| bridge.stats().chunks_sent == 2).await;

    let connections = connector.connections();
    assert_eq!(connections.len(), 2);
    assert_eq!(connections[0], vec![preamble()]);
    assert_eq!(connections[1], vec![preamble(), payload(0), payload(1)]);
    assert_eq!(bridge.stats().reconnects, 1);
    assert_eq!(bridge.state(), BridgeState::Connected);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(&seen[0], BridgeEvent::Error(e) if e.reason == TransportReason::BrokenPipe));
    assert_eq!(seen[1], BridgeEvent::StateChanged(BridgeState::Disconnected { attempt: 1 }));
    assert_eq!(seen[2], BridgeEvent::StateChanged(BridgeState::Connected));
}

#[tokio::test]
async fn test_gives_up_after_configured_attempts() {
    let connector = MemoryConnector::new();
    let bridge = started(&connector).await;

    connector.refuse_forever(true);
    connector.fail_sends(1);
    bridge.write(chunk(0)).unwrap();
    wait_until(|| bridge.state() == BridgeState::Failed).await;

    let err = bridge.write(chunk(1)).unwrap_err();
    assert_eq!(err.reason, TransportReason::Unreachable);
    let status = bridge.status();
    assert_eq!(status.last_error.map(|e| e.reason), Some(TransportReason::Unreachable));
    assert_eq!(status.stats.reconnects, 0);
    assert_eq!(connector.connection_count(), 1);
    bridge.join().await;
}

#[tokio::test]
async fn test_unreachable_target_fails_start() {
    let connector = MemoryConnector::new();
    connector.refuse_connects(1);

    let result = EncoderBridge::start(Arc::new(connector.clone()), target(), &bridge_config(), preamble()).await;
    let err = result.err().unwrap();
    assert_eq!(err.reason, TransportReason::Unreachable);
    assert_eq!(connector.connection_count(), 0);
}
