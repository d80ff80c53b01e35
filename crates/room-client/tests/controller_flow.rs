//! Session controller tests against an in-process room controller.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use common::types::RoomId;
use rc_test_utils::{MockEngine, TestPeer, TestRig};
use room_client::{ClientError, ClientEvent, SessionController, SimulatedDevice};
use room_controller::engine::SimulatedEngine;
use signaling_protocol::MediaKind;

fn device() -> Arc<SimulatedDevice> {
    Arc::new(SimulatedDevice::new())
}

async fn next_event(controller: &mut SessionController) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), controller.next_event())
        .await
        .expect("no event within 2s")
        .expect("connection closed")
}

// ============================================================================
// Join sequence
// ============================================================================

#[tokio::test]
async fn test_join_publishes_and_subscribes_to_existing_producers() {
    let rig = TestRig::new(Arc::new(SimulatedEngine::default()));
    let room = TestPeer::new("alice").in_random_room().room_id;

    let mut alice = rig.controller(device());
    let alice_summary = alice.controller.join(room.clone(), "alice").await.unwrap();
    assert_eq!(alice_summary.peer_id, alice.peer_id);
    let kinds: Vec<MediaKind> = alice_summary.published.iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);
    assert_eq!(alice_summary.subscribed, 0);

    let mut bob = rig.controller(device());
    let bob_summary = bob.controller.join(room.clone(), "bob").await.unwrap();
    assert_eq!(bob_summary.subscribed, 2);
    for track in &alice_summary.published {
        assert!(bob.controller.is_consuming(&track.producer_id));
    }
    assert_eq!(bob.controller.room_id(), Some(&room));

    let streams = bob.controller.remote_streams().unwrap();
    assert_eq!(streams.len(), 1);
    let stream = streams.get(&alice.peer_id).unwrap();
    assert_eq!(stream.name(), "alice");
    assert_eq!(stream.kinds(), vec![MediaKind::Audio, MediaKind::Video]);
}

#[tokio::test]
async fn test_device_without_video_publishes_audio_only() {
    let rig = TestRig::new(Arc::new(SimulatedEngine::default()));
    let audio_only = Arc::new(SimulatedDevice::new().with_codecs(["audio/opus"]));

    let mut alice = rig.controller(audio_only);
    let summary = alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap();

    assert_eq!(summary.published.len(), 1);
    assert_eq!(summary.published[0].kind, MediaKind::Audio);
}

#[tokio::test]
async fn test_late_joiner_is_announced_to_earlier_peer() {
    let rig = TestRig::new(Arc::new(SimulatedEngine::default()));
    let mut alice = rig.controller(device());
    alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap();

    let mut bob = rig.controller(device());
    let bob_summary = bob.controller.join(RoomId::from("r1"), "bob").await.unwrap();

    for _ in 0..2 {
        let event = next_event(&mut alice.controller).await;
        assert!(matches!(event, ClientEvent::Subscribed { .. }), "{event:?}");
    }
    for track in &bob_summary.published {
        assert!(alice.controller.is_consuming(&track.producer_id));
    }
    assert_eq!(
        alice
            .controller
            .remote_streams()
            .unwrap()
            .get(&bob.peer_id)
            .unwrap()
            .name(),
        "bob"
    );
}

// ============================================================================
// Failure teardown
// ============================================================================

#[tokio::test]
async fn test_failed_publish_tears_down_server_side_state() {
    let engine = Arc::new(MockEngine::builder().reject_produce().build());
    let rig = TestRig::new(engine.clone());

    let mut alice = rig.controller(device());
    let err = alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Rejected { method: "publish", .. }), "{err:?}");
    assert!(!alice.controller.is_joined());
    assert!(alice.controller.published().is_empty());

    // The leave sent during teardown ends the session and closes both transports
    let controller = alice.wait_session_end().await;
    assert!(!controller.is_joined());
    assert_eq!(engine.transports_created(), 2);
    assert_eq!(engine.live_transports(), 0);
    assert_eq!(rig.registry.get_status().await.unwrap().peer_count, 0);
}

#[tokio::test]
async fn test_failed_connect_leaves_no_transport_behind() {
    let engine = Arc::new(MockEngine::builder().reject_connect().build());
    let rig = TestRig::new(engine.clone());

    let mut alice = rig.controller(device());
    let err = alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap_err();

    assert_eq!(err.server_message(), Some("mock engine rejected connect"));
    alice.wait_session_end().await;
    assert_eq!(engine.transports_created(), 1);
    assert_eq!(engine.live_transports(), 0);
}

#[tokio::test]
async fn test_failed_subscribe_does_not_disturb_other_peers() {
    let engine = Arc::new(MockEngine::builder().reject_consume().build());
    let rig = TestRig::new(engine.clone());

    let mut alice = rig.controller(device());
    alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap();

    let mut bob = rig.controller(device());
    let err = bob
        .controller
        .join(RoomId::from("r1"), "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected { method: "subscribe", .. }), "{err:?}");
    bob.wait_session_end().await;

    // Only alice's two transports remain
    assert_eq!(engine.live_transports(), 2);
    assert_eq!(engine.live_producers(), 2);
    assert!(alice.controller.is_joined());

    // Alice saw bob's producers come and go; subscribing to them failed
    let mut closed = 0;
    while closed < 2 {
        match next_event(&mut alice.controller).await {
            ClientEvent::SubscribeFailed { .. } => {}
            ClientEvent::ProducerClosed {
                consumers_removed, ..
            } => {
                assert_eq!(consumers_removed, 0);
                closed += 1;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(alice.controller.consumer_count(), 0);
}

// ============================================================================
// Producer closure and leave
// ============================================================================

#[tokio::test]
async fn test_closed_producer_removes_only_its_track() {
    let engine = Arc::new(SimulatedEngine::default());
    let rig = TestRig::new(engine.clone());

    let mut alice = rig.controller(device());
    let alice_summary = alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap();
    let mut bob = rig.controller(device());
    bob.controller.join(RoomId::from("r1"), "bob").await.unwrap();

    let video = alice_summary
        .published
        .iter()
        .find(|p| p.kind == MediaKind::Video)
        .unwrap()
        .producer_id;
    engine.close_producer(&video);

    let event = next_event(&mut bob.controller).await;
    assert_eq!(
        event,
        ClientEvent::ProducerClosed {
            producer_id: video,
            consumers_removed: 1,
        }
    );
    let stream = bob
        .controller
        .remote_streams()
        .unwrap()
        .get(&alice.peer_id)
        .unwrap();
    assert_eq!(stream.kinds(), vec![MediaKind::Audio]);
    assert!(stream.tracks()[0].track.is_live());
    assert!(!bob.controller.is_consuming(&video));
}

#[tokio::test]
async fn test_leave_is_idempotent_and_notifies_once() {
    let rig = TestRig::new(Arc::new(SimulatedEngine::default()));
    let mut alice = rig.controller(device());
    alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap();
    let mut bob = rig.controller(device());
    bob.controller.join(RoomId::from("r1"), "bob").await.unwrap();
    // Drain alice's subscriptions to bob
    for _ in 0..2 {
        next_event(&mut alice.controller).await;
    }

    alice.controller.leave().await;
    alice.controller.leave().await;
    assert!(!alice.controller.is_joined());
    assert_eq!(alice.controller.peer_id(), None);

    for _ in 0..2 {
        let event = next_event(&mut bob.controller).await;
        assert!(matches!(event, ClientEvent::ProducerClosed { .. }), "{event:?}");
    }
    assert!(bob.controller.remote_streams().unwrap().is_empty());

    // The server closed alice's connection after leave
    let mut alice = alice.wait_session_end().await;
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), alice.next_event())
            .await
            .unwrap(),
        None
    );
    assert!(alice.is_disconnected());
}

#[tokio::test]
async fn test_disconnect_removes_peer_from_room() {
    let rig = TestRig::new(Arc::new(SimulatedEngine::default()));
    let mut alice = rig.controller(device());
    alice
        .controller
        .join(RoomId::from("r1"), "alice")
        .await
        .unwrap();
    let mut bob = rig.controller(device());
    bob.controller.join(RoomId::from("r1"), "bob").await.unwrap();

    alice.disconnect().await;

    for _ in 0..2 {
        let event = next_event(&mut bob.controller).await;
        assert!(matches!(event, ClientEvent::ProducerClosed { .. }), "{event:?}");
    }
    assert_eq!(bob.controller.consumer_count(), 0);
    assert_eq!(rig.registry.get_status().await.unwrap().peer_count, 1);
}
