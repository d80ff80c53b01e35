//! Room Controller error types.
//!
//! Every failed request is answered with a failure ack carrying
//! [`RcError::client_message`]. [`RcError::error_code`] groups errors into the
//! categories used for metric labels and logs. Internal details are logged
//! server-side but not exposed to clients.

use signaling_protocol::{Method, ProtocolError, TransportDirection};
use thiserror::Error;

/// Room Controller error type.
///
/// Categories returned by `error_code()`:
/// - `validation`: missing or malformed request fields
/// - `state`: operation against a peer/room/transport/producer that does not exist
/// - `capability`: subscribe with incompatible media capabilities
/// - `engine`: the media engine rejected the operation
/// - `internal`: actor failures, shutdown
#[derive(Debug, Error)]
pub enum RcError {
    /// Request failed boundary validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request needs a joined session.
    #[error("not in room")]
    NotInRoom,

    /// Session already joined a room.
    #[error("already joined")]
    AlreadyJoined,

    /// Transport id does not belong to the requesting peer.
    #[error("transport not found")]
    TransportNotFound,

    /// Publish named a transport that is not the peer's send transport.
    #[error("send transport not found")]
    SendTransportNotFound,

    /// Peer already owns a transport in this direction.
    #[error("{0} transport already exists")]
    TransportExists(TransportDirection),

    /// Operation needs a connected transport.
    #[error("transport not connected")]
    TransportNotConnected,

    /// Room is not registered.
    #[error("room not found")]
    RoomNotFound,

    /// Subscribe target is not in the room's producer map.
    #[error("producer not found")]
    ProducerNotFound,

    /// Subscribe before a recv transport exists.
    #[error("recv transport missing")]
    RecvTransportMissing,

    /// Engine compatibility check failed.
    #[error("incompatible rtpCapabilities")]
    IncompatibleCapabilities,

    /// Media engine rejected an operation.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Room actor stopped (reaped) while the request was in flight.
    #[error("Room closed")]
    RoomClosed,

    /// Controller is shutting down.
    #[error("Room controller is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the error category label for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            RcError::Validation(_) => "validation",
            RcError::NotInRoom
            | RcError::AlreadyJoined
            | RcError::TransportNotFound
            | RcError::SendTransportNotFound
            | RcError::TransportExists(_)
            | RcError::TransportNotConnected
            | RcError::RoomNotFound
            | RcError::ProducerNotFound
            | RcError::RecvTransportMissing => "state",
            RcError::IncompatibleCapabilities => "capability",
            RcError::Engine(_) => "engine",
            RcError::RoomClosed | RcError::Draining | RcError::Internal(_) => "internal",
        }
    }

    /// Returns the message sent to the client in the failure ack.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Validation(msg) | RcError::Engine(msg) => msg.clone(),
            RcError::RoomClosed | RcError::Internal(_) => "An internal error occurred".to_string(),
            RcError::Draining => "Server is shutting down, please reconnect".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ProtocolError> for RcError {
    fn from(err: ProtocolError) -> Self {
        match err {
            // An id the server never issued is looked up and missed like any other
            ProtocolError::UnknownId { method, .. } => match method {
                Method::ConnectTransport => RcError::TransportNotFound,
                Method::Publish => RcError::SendTransportNotFound,
                Method::Subscribe => RcError::ProducerNotFound,
                _ => RcError::Validation(err.to_string()),
            },
            other => RcError::Validation(other.to_string()),
        }
    }
}
