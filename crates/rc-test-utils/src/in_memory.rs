//! In-memory client/server pairing.
//!
//! Connects a [`SignalingClient`] to a real [`PeerSession`] over channels,
//! with the same JSON framing the WebSocket adapter uses. Dropping the
//! client side is a disconnect.

use common::types::PeerId;
use room_client::{MediaDevice, NotificationReceiver, SessionController, SignalingClient};
use room_controller::actors::{ActorMetrics, PeerSession, RoomRegistryHandle, RoomSettings};
use room_controller::engine::MediaEngine;
use signaling_protocol::{encode_server_message, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outbound queue capacity of in-memory sessions.
pub const IN_MEMORY_BUFFER: usize = 64;

/// Registry, metrics and engine shared by the connections of one test.
pub struct TestRig {
    pub registry: RoomRegistryHandle,
    pub metrics: Arc<ActorMetrics>,
}

impl TestRig {
    /// Rig with default room settings (empty rooms are reaped).
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self::with_settings(engine, RoomSettings::default())
    }

    #[must_use]
    pub fn with_settings(engine: Arc<dyn MediaEngine>, settings: RoomSettings) -> Self {
        let metrics = ActorMetrics::new();
        let registry =
            RoomRegistryHandle::new("rc-test".to_string(), settings, engine, Arc::clone(&metrics));
        Self { registry, metrics }
    }

    /// Open a connection to a fresh peer session.
    #[must_use]
    pub fn connect(&self) -> InMemoryConnection {
        connect_in_memory(&self.registry, &self.metrics)
    }

    /// Open a connection and wrap it in a session controller.
    #[must_use]
    pub fn controller(&self, device: Arc<dyn MediaDevice>) -> InMemoryController {
        self.connect().into_controller(device)
    }
}

impl Drop for TestRig {
    fn drop(&mut self) {
        self.registry.cancel();
    }
}

/// One client connection served by an in-process peer session.
pub struct InMemoryConnection {
    pub client: SignalingClient,
    pub notifications: NotificationReceiver,
    /// Peer id the server assigned to the session.
    pub peer_id: PeerId,
    session: JoinHandle<()>,
}

impl InMemoryConnection {
    /// Drop the client side and wait until the session finished cleanup.
    pub async fn disconnect(self) {
        drop(self.client);
        drop(self.notifications);
        let _ = self.session.await;
    }

    /// Whether the server-side session has ended.
    #[must_use]
    pub fn session_finished(&self) -> bool {
        self.session.is_finished()
    }

    #[must_use]
    pub fn into_controller(self, device: Arc<dyn MediaDevice>) -> InMemoryController {
        InMemoryController {
            controller: SessionController::new(self.client, self.notifications, device),
            peer_id: self.peer_id,
            session: self.session,
        }
    }
}

/// A session controller served by an in-process peer session.
pub struct InMemoryController {
    pub controller: SessionController,
    pub peer_id: PeerId,
    session: JoinHandle<()>,
}

impl InMemoryController {
    /// Drop the controller and wait until the session finished cleanup.
    pub async fn disconnect(self) {
        drop(self.controller);
        let _ = self.session.await;
    }

    /// Wait until the server-side session has ended.
    pub async fn wait_session_end(self) -> SessionController {
        let _ = self.session.await;
        self.controller
    }
}

/// Pair a signaling client with a new peer session on `registry`.
#[must_use]
pub fn connect_in_memory(
    registry: &RoomRegistryHandle,
    metrics: &Arc<ActorMetrics>,
) -> InMemoryConnection {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(IN_MEMORY_BUFFER);
    let (request_tx, request_rx) = mpsc::channel::<String>(IN_MEMORY_BUFFER);
    let (frame_tx, frame_rx) = mpsc::channel::<String>(IN_MEMORY_BUFFER);

    let session = PeerSession::new(
        registry.clone(),
        outbound_tx,
        Arc::clone(metrics),
        registry.child_token(),
    );
    let peer_id = session.peer_id();
    let session = tokio::spawn(session.run(request_rx));

    // Same encoding the WebSocket writer applies
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let frame = encode_server_message(&message).expect("server message encodes");
            if frame_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let (client, notifications) = SignalingClient::from_channels(request_tx, frame_rx);
    InMemoryConnection {
        client,
        notifications,
        peer_id,
        session,
    }
}
