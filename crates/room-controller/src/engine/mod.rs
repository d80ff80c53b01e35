//! Media engine collaborator interface.
//!
//! The room controller never touches media packets. It drives an external
//! forwarding engine through these traits: rooms ask it for capabilities,
//! peers get transports from it, and producers/consumers are created on
//! those transports. The engine is injected as `Arc<dyn MediaEngine>` so
//! tests can substitute doubles.
//!
//! # Lifecycle events
//!
//! Handles close either because the room closed them or because the engine
//! decided to (DTLS closed, producer gone). Both paths report through the
//! [`EngineEventSender`] passed in [`TransportOptions`]; the owning room
//! actor reconciles its maps from those events. Events for objects the room
//! no longer tracks are ignored there.

pub mod simulated;

use crate::errors::RcError;
use async_trait::async_trait;
use common::types::{ConsumerId, PeerId, ProducerId, TransportId};
use signaling_protocol::{
    Capabilities, DtlsParameters, MediaKind, MediaParameters, TransportDirection, TransportParams,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use simulated::{EngineSettings, SimulatedEngine};

/// Lifecycle event reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Transport closed; its producers and consumers are closed with it.
    TransportClosed { transport_id: TransportId },
    /// Producer closed; consumers of it are closed with it.
    ProducerClosed { producer_id: ProducerId },
    /// Consumer closed.
    ConsumerClosed { consumer_id: ConsumerId },
}

/// Channel on which the engine reports lifecycle events to a room.
///
/// Unbounded because engines report from synchronous close paths.
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Receiving side of [`EngineEventSender`].
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Engine-level failure. The message is passed to the client as-is.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Engine refused the operation (bad parameters, closed handle, ...).
    #[error("{0}")]
    Rejected(String),

    /// Engine cannot be reached.
    #[error("media engine unavailable: {0}")]
    Unavailable(String),
}

impl From<EngineError> for RcError {
    fn from(err: EngineError) -> Self {
        RcError::Engine(err.to_string())
    }
}

/// Options for creating a transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub direction: TransportDirection,
    pub peer_id: PeerId,
    /// IP the engine binds to.
    pub listen_ip: String,
    /// IP advertised in ICE candidates instead of `listen_ip`.
    pub announced_ip: Option<String>,
    /// Inclusive RTC port range.
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    pub events: EngineEventSender,
}

/// Media engine (router) shared by all rooms.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Capability descriptor for a new room.
    async fn room_capabilities(&self) -> Result<Capabilities, EngineError>;

    /// Create a transport for one peer and direction.
    async fn create_transport(
        &self,
        options: TransportOptions,
    ) -> Result<Arc<dyn EngineTransport>, EngineError>;

    /// Whether a consumer with `capabilities` can receive `producer_id`.
    fn can_consume(&self, producer_id: &ProducerId, capabilities: &Capabilities) -> bool;
}

/// Engine-side transport handle.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn direction(&self) -> TransportDirection;

    /// Connection parameters returned to the client.
    fn params(&self) -> TransportParams;

    /// Complete the DTLS handshake with the client's parameters.
    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), EngineError>;

    /// Create a producer for an outgoing track.
    async fn produce(
        &self,
        kind: MediaKind,
        media_parameters: MediaParameters,
    ) -> Result<Arc<dyn EngineProducer>, EngineError>;

    /// Create a consumer of `producer_id`.
    async fn consume(
        &self,
        producer_id: ProducerId,
        capabilities: Capabilities,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError>;

    /// Close the transport and everything created on it. Idempotent.
    fn close(&self);
}

/// Engine-side producer handle.
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    /// Close the producer and its consumers. Idempotent.
    fn close(&self);
}

/// Engine-side consumer handle.
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;

    fn producer_id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    /// RTP parameters the client uses to receive the track.
    fn media_parameters(&self) -> MediaParameters;

    /// Close the consumer. Idempotent.
    fn close(&self);
}
