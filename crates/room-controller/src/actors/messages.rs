//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use super::room::RoomActorHandle;
use crate::errors::RcError;
use common::types::{PeerId, ProducerId, RoomId, TransportId};
use signaling_protocol::{
    Capabilities, ConsumerParams, DtlsParameters, MediaKind, MediaParameters, ProducerInfo,
    ServerMessage, TransportDirection, TransportParams,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Outbound queue of one signaling connection.
///
/// Acks and notifications share it, so a client sees them in the order they
/// were produced. Rooms only ever `try_send` on it.
pub type OutboundSender = mpsc::Sender<ServerMessage>;

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the live room for `room_id`, creating it if needed.
    EnsureRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Get information about a registered room.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomInfo, RcError>>,
    },

    /// Get registry status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and cancel all room actors.
    Shutdown {
        /// How long to wait for room actors to stop.
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add a peer to the room.
    Join {
        peer_id: PeerId,
        name: String,
        outbound: OutboundSender,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Create the peer's transport for one direction.
    CreateTransport {
        peer_id: PeerId,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportParams, RcError>>,
    },

    /// Connect one of the peer's transports.
    ConnectTransport {
        peer_id: PeerId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Create a producer on the peer's send transport.
    Publish {
        peer_id: PeerId,
        transport_id: TransportId,
        kind: MediaKind,
        media_parameters: MediaParameters,
        respond_to: oneshot::Sender<Result<ProducerId, RcError>>,
    },

    /// List the room's producers not owned by the peer.
    ListProducers {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Result<Vec<ProducerInfo>, RcError>>,
    },

    /// Create a consumer of `producer_id` on the peer's recv transport.
    Subscribe {
        peer_id: PeerId,
        producer_id: ProducerId,
        capabilities: Capabilities,
        respond_to: oneshot::Sender<Result<ConsumerParams, RcError>>,
    },

    /// Remove a peer and everything it owns. Answers whether the peer was present.
    RemovePeer {
        peer_id: PeerId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Get current room state (for debugging/health).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Information about a room returned by `GetRoom`.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub peer_count: usize,
    pub producer_count: usize,
    /// Room creation timestamp.
    pub created_at: i64,
}

/// Status of the `RoomRegistryActor`.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Registered rooms, including any that stopped but were not yet swept.
    pub room_count: usize,
    /// Peers joined across all rooms.
    pub peer_count: usize,
    /// Open signaling connections.
    pub session_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Bookkeeping summary of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub name: String,
    pub transports: Vec<(TransportDirection, TransportId)>,
    pub producers: Vec<ProducerId>,
    pub consumers: usize,
    pub has_capabilities: bool,
}

/// Current state of a room (for debugging and tests).
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    pub peers: Vec<PeerSummary>,
    pub producers: Vec<ProducerInfo>,
    pub mailbox_depth: usize,
}

impl RoomState {
    /// Summary of one peer, if joined.
    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<&PeerSummary> {
        self.peers.iter().find(|p| &p.peer_id == peer_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_state_peer_lookup() {
        let peer_id = PeerId::new();
        let state = RoomState {
            room_id: RoomId::from("r1"),
            peers: vec![PeerSummary {
                peer_id,
                name: "alice".to_string(),
                transports: vec![],
                producers: vec![],
                consumers: 0,
                has_capabilities: false,
            }],
            producers: vec![],
            mailbox_depth: 0,
        };

        assert_eq!(state.peer(&peer_id).map(|p| p.name.as_str()), Some("alice"));
        assert!(state.peer(&PeerId::new()).is_none());
    }
}
