//! Codec for encoding and decoding signaling frames.

use crate::message::{Method, Request, RequestEnvelope, ServerMessage};
use serde::Deserialize;
use serde_json::Value;

/// Error type for protocol operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object of the expected shape
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Request method is not part of the protocol
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Request payload has missing or mistyped fields
    #[error("invalid {method} request: {reason}")]
    InvalidRequest {
        method: &'static str,
        reason: String,
    },

    /// Request fields are present but violate a constraint
    #[error("{0}")]
    Validation(String),

    /// Well-formed id that this server never issued
    #[error("{}", .method.unknown_id_message())]
    UnknownId {
        method: Method,
        field: &'static str,
        value: String,
    },

    /// Peer answered a request with `ok: false`
    #[error("{0}")]
    Rejected(String),

    /// Successful ack payload has the wrong shape
    #[error("invalid response payload: {0}")]
    InvalidResponse(String),

    /// Value could not be turned into JSON
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// A request frame that could not be decoded.
///
/// `id` is set when the correlation id was recovered, in which case the
/// server answers with a failure ack; otherwise the frame is dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct DecodeError {
    pub id: Option<u64>,
    pub error: ProtocolError,
}

#[derive(Deserialize)]
struct RawEnvelope {
    id: u64,
    method: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Encode a request with its correlation id.
///
/// # Errors
///
/// Returns an error if the request cannot be serialized
pub fn encode_request(id: u64, request: &Request) -> Result<String, ProtocolError> {
    serde_json::to_string(&RequestEnvelope {
        id,
        request: request.clone(),
    })
    .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Decode a client request frame.
///
/// Decoding runs in two stages so that a request with a valid envelope but
/// a bad payload can still be answered on its correlation id.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing the failure
pub fn decode_request(text: &str) -> Result<RequestEnvelope, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError {
        id: None,
        error: ProtocolError::Malformed(e.to_string()),
    })?;

    let id = value.get("id").and_then(Value::as_u64);

    let raw: RawEnvelope = serde_json::from_value(value).map_err(|e| DecodeError {
        id,
        error: ProtocolError::Malformed(e.to_string()),
    })?;

    let request = Request::from_parts(&raw.method, raw.data).map_err(|error| DecodeError {
        id: Some(raw.id),
        error,
    })?;

    Ok(RequestEnvelope {
        id: raw.id,
        request,
    })
}

/// Encode a server frame.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized
pub fn encode_server_message(message: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Decode a server frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the frame is not a known message
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
