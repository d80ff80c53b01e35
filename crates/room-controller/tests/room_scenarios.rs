//! End-to-end room scenarios over in-memory connections.
//!
//! Each connection is a real `PeerSession` driven by a `SignalingClient`,
//! so requests, acks and notifications go through the JSON codec.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use common::types::{PeerId, ProducerId, RoomId, TransportId};
use rc_test_utils::{
    dtls_params, media_params, router_capabilities, InMemoryConnection, MockEngine, TestRig,
};
use room_client::ClientError;
use room_controller::engine::SimulatedEngine;
use signaling_protocol::{MediaKind, Notification, ProducerClosed, ProducerInfo, TransportDirection};

// ============================================================================
// Helpers
// ============================================================================

async fn next_notification(conn: &mut InMemoryConnection) -> Notification {
    tokio::time::timeout(Duration::from_secs(2), conn.notifications.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("connection closed")
}

async fn assert_no_notification(conn: &mut InMemoryConnection) {
    let result = tokio::time::timeout(Duration::from_millis(100), conn.notifications.recv()).await;
    assert!(result.is_err(), "unexpected notification: {result:?}");
}

/// Create and connect a transport; returns its id.
async fn open_transport(conn: &InMemoryConnection, direction: TransportDirection) -> TransportId {
    let params = conn.client.create_transport(direction).await.unwrap();
    conn.client
        .connect_transport(params.id, dtls_params())
        .await
        .unwrap();
    params.id
}

/// Join `room`, open a send transport and publish one producer per kind.
async fn join_and_publish(
    conn: &InMemoryConnection,
    room: &str,
    name: &str,
    kinds: &[MediaKind],
) -> Vec<ProducerId> {
    conn.client.join(&RoomId::from(room), name).await.unwrap();
    if kinds.is_empty() {
        return Vec::new();
    }
    let send = open_transport(conn, TransportDirection::Send).await;
    let mut producers = Vec::new();
    for kind in kinds {
        producers.push(
            conn.client
                .publish(send, *kind, media_params(*kind))
                .await
                .unwrap(),
        );
    }
    producers
}

fn simulated_rig() -> TestRig {
    TestRig::new(Arc::new(SimulatedEngine::default()))
}

// ============================================================================
// Scenario: publish, list, subscribe, leave
// ============================================================================

#[tokio::test]
async fn test_publish_list_subscribe_leave() {
    let rig = simulated_rig();
    let alice = rig.connect();
    let mut bob = rig.connect();

    let alice_id = alice.client.join(&RoomId::from("r1"), "alice").await.unwrap();
    assert_eq!(alice_id, alice.peer_id);
    let send = open_transport(&alice, TransportDirection::Send).await;
    let a1 = alice
        .client
        .publish(send, MediaKind::Audio, media_params(MediaKind::Audio))
        .await
        .unwrap();

    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();
    let producers = bob.client.list_producers().await.unwrap();
    assert_eq!(
        producers,
        vec![ProducerInfo {
            producer_id: a1,
            peer_id: alice_id,
            kind: MediaKind::Audio,
            name: "alice".to_string(),
        }]
    );

    open_transport(&bob, TransportDirection::Recv).await;
    let consumer = bob
        .client
        .subscribe(a1, router_capabilities())
        .await
        .unwrap();
    assert_eq!(consumer.producer_id, a1);
    assert_eq!(consumer.peer_id, alice_id);
    assert_eq!(consumer.name, "alice");
    assert_eq!(consumer.kind, MediaKind::Audio);

    let room = rig.registry.ensure_room(RoomId::from("r1")).await.unwrap();
    assert_eq!(room.get_state().await.unwrap().peer(&bob.peer_id).unwrap().consumers, 1);

    alice.client.leave().await.unwrap();

    let notification = next_notification(&mut bob).await;
    assert_eq!(
        notification,
        Notification::ProducerClosed(ProducerClosed { producer_id: a1 })
    );

    let state = room.get_state().await.unwrap();
    assert!(state.peer(&alice_id).is_none());
    assert!(state.producers.is_empty());
    assert_eq!(state.peer(&bob.peer_id).unwrap().consumers, 0);
}

#[tokio::test]
async fn test_new_producer_reaches_other_peers_only() {
    let rig = simulated_rig();
    let mut alice = rig.connect();
    let mut bob = rig.connect();
    alice.client.join(&RoomId::from("r1"), "alice").await.unwrap();
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();

    let send = open_transport(&alice, TransportDirection::Send).await;
    let producer_id = alice
        .client
        .publish(send, MediaKind::Video, media_params(MediaKind::Video))
        .await
        .unwrap();

    match next_notification(&mut bob).await {
        Notification::NewProducer(event) => {
            assert_eq!(event.producer_id, producer_id);
            assert_eq!(event.peer_id, alice.peer_id);
            assert_eq!(event.kind, MediaKind::Video);
            assert_eq!(event.name, "alice");
        }
        other => panic!("expected newProducer, got {other:?}"),
    }
    assert_no_notification(&mut alice).await;
}

#[tokio::test]
async fn test_list_producers_excludes_own_and_includes_all_others() {
    let rig = simulated_rig();
    let alice = rig.connect();
    let bob = rig.connect();
    let carol = rig.connect();

    let alice_producers =
        join_and_publish(&alice, "r1", "alice", &[MediaKind::Audio, MediaKind::Video]).await;
    let bob_producers = join_and_publish(&bob, "r1", "bob", &[MediaKind::Audio]).await;
    carol.client.join(&RoomId::from("r1"), "carol").await.unwrap();

    let seen_by_bob: Vec<ProducerId> = bob
        .client
        .list_producers()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.producer_id)
        .collect();
    assert_eq!(seen_by_bob.len(), 2);
    assert!(alice_producers.iter().all(|p| seen_by_bob.contains(p)));
    assert!(!seen_by_bob.contains(&bob_producers[0]));

    let seen_by_carol = carol.client.list_producers().await.unwrap();
    assert_eq!(seen_by_carol.len(), 3);
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let rig = simulated_rig();
    let alice = rig.connect();
    let mut bob = rig.connect();

    join_and_publish(&alice, "r1", "alice", &[MediaKind::Audio]).await;
    bob.client.join(&RoomId::from("r2"), "bob").await.unwrap();

    assert!(bob.client.list_producers().await.unwrap().is_empty());
    assert_no_notification(&mut bob).await;
}

// ============================================================================
// Subscribe failures create nothing
// ============================================================================

#[tokio::test]
async fn test_subscribe_to_unknown_producer_fails_with_state_error() {
    let engine = Arc::new(MockEngine::builder().build());
    let rig = TestRig::new(engine.clone());
    let bob = rig.connect();
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();
    open_transport(&bob, TransportDirection::Recv).await;

    let err = bob
        .client
        .subscribe(ProducerId::new(), router_capabilities())
        .await
        .unwrap_err();

    assert_eq!(err.server_message(), Some("producer not found"));
    assert_eq!(engine.consumers_created(), 0);
}

#[tokio::test]
async fn test_subscribe_with_incompatible_capabilities_creates_no_consumer() {
    let engine = Arc::new(MockEngine::builder().incompatible().build());
    let rig = TestRig::new(engine.clone());
    let alice = rig.connect();
    let bob = rig.connect();
    let producers = join_and_publish(&alice, "r1", "alice", &[MediaKind::Audio]).await;
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();
    open_transport(&bob, TransportDirection::Recv).await;

    let err = bob
        .client
        .subscribe(producers[0], router_capabilities())
        .await
        .unwrap_err();

    assert_eq!(err.server_message(), Some("incompatible rtpCapabilities"));
    assert_eq!(engine.consumers_created(), 0);
    let room = rig.registry.ensure_room(RoomId::from("r1")).await.unwrap();
    assert_eq!(room.get_state().await.unwrap().peer(&bob.peer_id).unwrap().consumers, 0);
}

#[tokio::test]
async fn test_engine_rejection_is_passed_through() {
    let engine = Arc::new(MockEngine::builder().reject_produce().build());
    let rig = TestRig::new(engine.clone());
    let mut bob = rig.connect();
    let alice = rig.connect();
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();
    alice.client.join(&RoomId::from("r1"), "alice").await.unwrap();
    let send = open_transport(&alice, TransportDirection::Send).await;

    let err = alice
        .client
        .publish(send, MediaKind::Audio, media_params(MediaKind::Audio))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Rejected { method: "publish", ref message } if message == "mock engine rejected produce"
    ));
    assert_no_notification(&mut bob).await;
}

// ============================================================================
// Leave and disconnect
// ============================================================================

#[tokio::test]
async fn test_leave_then_disconnect_notifies_once() {
    let rig = simulated_rig();
    let alice = rig.connect();
    let mut bob = rig.connect();
    let producers =
        join_and_publish(&alice, "r1", "alice", &[MediaKind::Audio, MediaKind::Video]).await;
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();

    alice.client.leave().await.unwrap();
    // A second leave finds the connection already closing
    let _ = alice.client.leave().await;
    alice.disconnect().await;

    let mut closed = Vec::new();
    for _ in 0..2 {
        match next_notification(&mut bob).await {
            Notification::ProducerClosed(event) => closed.push(event.producer_id),
            other => panic!("expected producerClosed, got {other:?}"),
        }
    }
    closed.sort();
    let mut expected = producers.clone();
    expected.sort();
    assert_eq!(closed, expected);
    assert_no_notification(&mut bob).await;
}

#[tokio::test]
async fn test_disconnect_cleans_up_like_leave() {
    let engine = Arc::new(MockEngine::builder().build());
    let rig = TestRig::new(engine.clone());
    let alice = rig.connect();
    let mut bob = rig.connect();
    let producers = join_and_publish(&alice, "r1", "alice", &[MediaKind::Audio]).await;
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();
    let alice_id: PeerId = alice.peer_id;

    alice.disconnect().await;

    assert_eq!(
        next_notification(&mut bob).await,
        Notification::ProducerClosed(ProducerClosed {
            producer_id: producers[0]
        })
    );
    let room = rig.registry.ensure_room(RoomId::from("r1")).await.unwrap();
    let state = room.get_state().await.unwrap();
    assert!(state.peer(&alice_id).is_none());
    assert!(state.producers.is_empty());
    assert_eq!(engine.live_transports(), 0);
    assert!(bob.client.list_producers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_leave_drops_consumers_without_engine_echo() {
    let engine = Arc::new(MockEngine::builder().build());
    let rig = TestRig::new(engine.clone());
    let alice = rig.connect();
    let mut bob = rig.connect();
    let producers =
        join_and_publish(&alice, "r1", "alice", &[MediaKind::Audio, MediaKind::Video]).await;
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();
    open_transport(&bob, TransportDirection::Recv).await;
    for producer_id in &producers {
        bob.client
            .subscribe(*producer_id, router_capabilities())
            .await
            .unwrap();
    }
    let room = rig.registry.ensure_room(RoomId::from("r1")).await.unwrap();
    assert_eq!(room.get_state().await.unwrap().peer(&bob.peer_id).unwrap().consumers, 2);

    alice.client.leave().await.unwrap();
    for _ in 0..2 {
        assert!(matches!(
            next_notification(&mut bob).await,
            Notification::ProducerClosed(_)
        ));
    }

    let state = room.get_state().await.unwrap();
    assert!(state.producers.is_empty());
    assert_eq!(state.peer(&bob.peer_id).unwrap().consumers, 0);
    assert_eq!(engine.consumers_closed(), 2);
    // Bob's recv transport is untouched
    assert_eq!(engine.live_transports(), 1);
}

#[tokio::test]
async fn test_leave_closes_connection_and_fails_later_requests() {
    let rig = simulated_rig();
    let alice = rig.connect();
    alice.client.join(&RoomId::from("r1"), "alice").await.unwrap();

    alice.client.leave().await.unwrap();

    let err = alice.client.list_producers().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));
}

#[tokio::test]
async fn test_room_reaped_after_last_peer_and_recreated_on_join() {
    let rig = simulated_rig();
    let alice = rig.connect();
    alice.client.join(&RoomId::from("r1"), "alice").await.unwrap();
    let first = rig.registry.ensure_room(RoomId::from("r1")).await.unwrap();

    alice.disconnect().await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while !first.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room was not reaped");

    let bob = rig.connect();
    bob.client.join(&RoomId::from("r1"), "bob").await.unwrap();
    assert!(bob.client.list_producers().await.unwrap().is_empty());
}
