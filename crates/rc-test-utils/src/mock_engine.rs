//! Mock media engine for Room Controller testing.
//!
//! Provides a `MediaEngine` implementation that can be configured to:
//! - Reject transport creation, connect, produce or consume
//! - Report every producer as incompatible with every consumer
//! - Count the calls it receives
//!
//! Unlike the simulated engine it reports only `TransportClosed`; it never
//! echoes producer or consumer closes back to the room.
//!
//! # Example
//!
//! ```rust,ignore
//! use rc_test_utils::MockEngine;
//!
//! let engine = Arc::new(MockEngine::builder().reject_consume().build());
//! let shared: Arc<dyn MediaEngine> = engine.clone();
//!
//! // Use `shared` for the registry, `engine` for assertions...
//! assert_eq!(engine.consumers_created(), 0);
//! ```

use crate::fixtures::router_capabilities;
use async_trait::async_trait;
use common::types::{ConsumerId, ProducerId, TransportId};
use parking_lot::Mutex;
use room_controller::engine::{
    EngineConsumer, EngineError, EngineEvent, EngineEventSender, EngineProducer, EngineTransport,
    MediaEngine, TransportOptions,
};
use serde_json::json;
use signaling_protocol::{
    Capabilities, DtlsParameters, MediaKind, MediaParameters, TransportDirection, TransportParams,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Failures {
    transports: bool,
    connect: bool,
    produce: bool,
    consume: bool,
    incompatible: bool,
}

#[derive(Default)]
struct MockState {
    transports_created: AtomicUsize,
    transports_closed: AtomicUsize,
    producers_created: AtomicUsize,
    consumers_created: AtomicUsize,
    consumers_closed: AtomicUsize,
    live_producers: Mutex<HashMap<ProducerId, MediaKind>>,
}

/// Mock media engine.
pub struct MockEngine {
    capabilities: Capabilities,
    failures: Arc<Failures>,
    state: Arc<MockState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        MockEngine::builder().build()
    }
}

impl MockEngine {
    /// Create a new MockEngine builder.
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::default()
    }

    /// Number of `create_transport` calls that succeeded.
    #[must_use]
    pub fn transports_created(&self) -> usize {
        self.state.transports_created.load(Ordering::SeqCst)
    }

    /// Number of transports closed.
    #[must_use]
    pub fn transports_closed(&self) -> usize {
        self.state.transports_closed.load(Ordering::SeqCst)
    }

    /// Transports created and not closed.
    #[must_use]
    pub fn live_transports(&self) -> usize {
        self.transports_created()
            .saturating_sub(self.transports_closed())
    }

    /// Number of producers created.
    #[must_use]
    pub fn producers_created(&self) -> usize {
        self.state.producers_created.load(Ordering::SeqCst)
    }

    /// Producers created and not closed.
    #[must_use]
    pub fn live_producers(&self) -> usize {
        self.state.live_producers.lock().len()
    }

    /// Number of consumers created.
    #[must_use]
    pub fn consumers_created(&self) -> usize {
        self.state.consumers_created.load(Ordering::SeqCst)
    }

    /// Number of consumer handles the room closed.
    #[must_use]
    pub fn consumers_closed(&self) -> usize {
        self.state.consumers_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn room_capabilities(&self) -> Result<Capabilities, EngineError> {
        Ok(self.capabilities.clone())
    }

    async fn create_transport(
        &self,
        options: TransportOptions,
    ) -> Result<Arc<dyn EngineTransport>, EngineError> {
        if self.failures.transports {
            return Err(EngineError::Rejected(
                "mock engine rejected transport".to_string(),
            ));
        }
        self.state.transports_created.fetch_add(1, Ordering::SeqCst);

        let id = TransportId::new();
        Ok(Arc::new(MockTransport {
            id,
            direction: options.direction,
            params: TransportParams {
                id,
                ice_parameters: json!({ "usernameFragment": "mock", "password": "mock" }),
                ice_candidates: json!([{ "ip": options.listen_ip, "port": options.rtc_min_port }]),
                dtls_parameters: DtlsParameters(json!({ "role": "auto", "fingerprints": [] })),
                sctp_parameters: None,
            },
            events: options.events,
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            failures: Arc::clone(&self.failures),
            state: Arc::clone(&self.state),
        }))
    }

    fn can_consume(&self, producer_id: &ProducerId, _capabilities: &Capabilities) -> bool {
        !self.failures.incompatible && self.state.live_producers.lock().contains_key(producer_id)
    }
}

struct MockTransport {
    id: TransportId,
    direction: TransportDirection,
    params: TransportParams,
    events: EngineEventSender,
    closed: AtomicBool,
    producers: Mutex<Vec<ProducerId>>,
    failures: Arc<Failures>,
    state: Arc<MockState>,
}

#[async_trait]
impl EngineTransport for MockTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    fn params(&self) -> TransportParams {
        self.params.clone()
    }

    async fn connect(&self, _dtls_parameters: DtlsParameters) -> Result<(), EngineError> {
        if self.failures.connect {
            return Err(EngineError::Rejected(
                "mock engine rejected connect".to_string(),
            ));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _media_parameters: MediaParameters,
    ) -> Result<Arc<dyn EngineProducer>, EngineError> {
        if self.failures.produce {
            return Err(EngineError::Rejected(
                "mock engine rejected produce".to_string(),
            ));
        }
        let id = ProducerId::new();
        self.state.producers_created.fetch_add(1, Ordering::SeqCst);
        self.state.live_producers.lock().insert(id, kind);
        self.producers.lock().push(id);
        Ok(Arc::new(MockProducer {
            id,
            kind,
            state: Arc::clone(&self.state),
        }))
    }

    async fn consume(
        &self,
        producer_id: ProducerId,
        _capabilities: Capabilities,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError> {
        if self.failures.consume {
            return Err(EngineError::Rejected(
                "mock engine rejected consume".to_string(),
            ));
        }
        let kind = self
            .state
            .live_producers
            .lock()
            .get(&producer_id)
            .copied()
            .ok_or_else(|| EngineError::Rejected(format!("producer {producer_id} not found")))?;
        self.state.consumers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConsumer {
            id: ConsumerId::new(),
            producer_id,
            kind,
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.transports_closed.fetch_add(1, Ordering::SeqCst);
        {
            let mut live = self.state.live_producers.lock();
            for producer_id in self.producers.lock().drain(..) {
                live.remove(&producer_id);
            }
        }
        let _ = self.events.send(EngineEvent::TransportClosed {
            transport_id: self.id,
        });
    }
}

struct MockProducer {
    id: ProducerId,
    kind: MediaKind,
    state: Arc<MockState>,
}

impl EngineProducer for MockProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.state.live_producers.lock().remove(&self.id);
    }
}

struct MockConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    closed: AtomicBool,
    state: Arc<MockState>,
}

impl EngineConsumer for MockConsumer {
    fn id(&self) -> ConsumerId {
        self.id
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn media_parameters(&self) -> MediaParameters {
        MediaParameters(json!({ "codecs": [], "encodings": [] }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.consumers_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Builder for MockEngine configuration.
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    capabilities: Option<Capabilities>,
    failures: Failures,
}

impl MockEngineBuilder {
    /// Set the room capability descriptor.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Fail every `create_transport` call.
    #[must_use]
    pub fn reject_transports(mut self) -> Self {
        self.failures.transports = true;
        self
    }

    /// Fail every transport `connect` call.
    #[must_use]
    pub fn reject_connect(mut self) -> Self {
        self.failures.connect = true;
        self
    }

    /// Fail every `produce` call.
    #[must_use]
    pub fn reject_produce(mut self) -> Self {
        self.failures.produce = true;
        self
    }

    /// Fail every `consume` call.
    #[must_use]
    pub fn reject_consume(mut self) -> Self {
        self.failures.consume = true;
        self
    }

    /// Make `can_consume` always return false.
    #[must_use]
    pub fn incompatible(mut self) -> Self {
        self.failures.incompatible = true;
        self
    }

    /// Build the MockEngine.
    #[must_use]
    pub fn build(self) -> MockEngine {
        MockEngine {
            capabilities: self.capabilities.unwrap_or_else(router_capabilities),
            failures: Arc::new(self.failures),
            state: Arc::new(MockState::default()),
        }
    }
}
