//! Room client error types.

use signaling_protocol::ProtocolError;
use thiserror::Error;

/// Client-side error.
///
/// `Rejected` carries the server's failure string untouched; every other
/// variant is raised locally.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Server answered a request with `ok: false`.
    #[error("{method} rejected: {message}")]
    Rejected {
        method: &'static str,
        message: String,
    },

    /// Frame could not be encoded or an ack payload had the wrong shape.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local media device refused the operation.
    #[error("media device error: {0}")]
    Device(String),

    /// Connection closed before the request was acked.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation needs a step of the join sequence that has not happened yet.
    #[error("not ready: {0}")]
    NotReady(&'static str),

    /// Controller already joined a room.
    #[error("already joined")]
    AlreadyJoined,
}

impl ClientError {
    /// Server failure string, if the server rejected the request.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}
