//! Signaling protocol for Conclave rooms.
//!
//! Clients talk to the room controller over one persistent, ordered
//! connection carrying JSON text frames:
//!
//! - requests: `{"id": 7, "method": "publish", "data": {...}}`
//! - acks: `{"type": "response", "id": 7, "ok": true, "data": {...}}` or
//!   `{"type": "response", "id": 7, "ok": false, "error": "..."}`
//! - notifications: `{"type": "notification", "method": "newProducer", "data": {...}}`
//!
//! An `ok: false` ack is terminal for that request. `leave` is never acked.
//! Media descriptors (capabilities, DTLS and RTP parameters) are carried as
//! opaque JSON owned by the media engine.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod descriptor;
pub mod message;

pub use codec::{
    decode_request, decode_server_message, encode_request, encode_server_message, DecodeError,
    ProtocolError,
};
pub use descriptor::{
    Capabilities, DtlsParameters, MediaKind, MediaParameters, TransportDirection, TransportParams,
};
pub use message::{
    CapabilitiesResponse, ConnectTransportRequest, ConsumerParams, CreateTransportRequest,
    JoinRequest, JoinResponse, Method, NewProducer, Notification, ProducerClosed, ProducerInfo,
    ProducerList, PublishRequest, PublishResponse, Request, RequestEnvelope, Response,
    ServerMessage, SubscribeRequest, TransportCreated,
};
