//! Tests for the background dispatch and prune loops.

use sexton_core::{
    Clock, EntityId, MemorySessionRegistry, MonotonicClock, SessionId, SessionRegistry, SystemClock,
};
use sexton_server::{ChannelTransport, DeletionConfigBuilder, DeletionService};
use sexton_wire::DeletionPacket;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

type LiveService =
    DeletionService<MemorySessionRegistry, ChannelTransport, MonotonicClock<SystemClock>>;

fn live_service(
    registry: Arc<MemorySessionRegistry>,
    transport: Arc<ChannelTransport>,
) -> Arc<LiveService> {
    let config = DeletionConfigBuilder::new()
        .dispatch_interval(5)
        .prune_interval(10)
        .build()
        .unwrap();
    Arc::new(DeletionService::new(config, registry, transport, MonotonicClock::system()).unwrap())
}

#[tokio::test]
async fn test_dispatch_loop_delivers_deletions() {
    let registry = Arc::new(MemorySessionRegistry::new());
    let transport = Arc::new(ChannelTransport::new());
    let service = live_service(registry.clone(), transport.clone());

    let viewer = SessionId::new("viewer");
    registry.attach(viewer.clone(), SystemClock.now());
    let mut rx = transport.register(viewer.clone(), 64);

    let handle = service.clone().spawn();
    service.record_deletion_now(EntityId::from_u128(7));

    let bytes = assert_ok!(timeout(Duration::from_secs(2), rx.recv()).await)
        .expect("transport queue closed");
    let packet = DeletionPacket::decode(&bytes).unwrap();
    assert_eq!(packet.ids, vec![EntityId::from_u128(7)]);

    handle.shutdown().await;
    assert!(registry.stats_of(&viewer).unwrap().packets_sent >= 1);
}

#[tokio::test]
async fn test_prune_loop_collects_once_sessions_are_told() {
    let registry = Arc::new(MemorySessionRegistry::new());
    let transport = Arc::new(ChannelTransport::new());
    let service = live_service(registry.clone(), transport.clone());

    let viewer = SessionId::new("viewer");
    registry.attach(viewer.clone(), SystemClock.now());
    let _rx = transport.register(viewer.clone(), 64);

    let handle = service.clone().spawn();
    service.record_deletion_now(EntityId::from_u128(1));

    let drained = timeout(Duration::from_secs(2), async {
        while service.ledger().read().has_any() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_ok!(drained);
    assert!(registry.cursor_of(&viewer).is_some());
    assert!(service.prune_stats().records_pruned >= 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_both_loops() {
    let registry = Arc::new(MemorySessionRegistry::new());
    let transport = Arc::new(ChannelTransport::new());
    let service = live_service(registry, transport);

    let handle = service.clone().spawn();
    sleep(Duration::from_millis(20)).await;
    handle.shutdown().await;

    let ticks = service.prune_stats().ticks;
    sleep(Duration::from_millis(40)).await;
    assert_eq!(service.prune_stats().ticks, ticks);
}
