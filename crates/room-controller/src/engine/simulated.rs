//! In-process media engine.
//!
//! `SimulatedEngine` keeps the bookkeeping a real forwarding engine would
//! (transports, producers, consumers and their ownership) without moving
//! any media. It issues UUID ids, builds router capabilities from the
//! configured codec list, generates ICE/DTLS blobs that carry the
//! listen/announced IP and a port from the configured range, and cascades
//! closes through the event channel of the owning transport.

use super::{
    EngineConsumer, EngineError, EngineEvent, EngineEventSender, EngineProducer, EngineTransport,
    MediaEngine, TransportOptions,
};
use async_trait::async_trait;
use common::types::{ConsumerId, PeerId, ProducerId, TransportId};
use parking_lot::Mutex;
use serde_json::{json, Value};
use signaling_protocol::{
    Capabilities, DtlsParameters, MediaKind, MediaParameters, TransportDirection, TransportParams,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Codec list the engine routes.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub media_codecs: Vec<Value>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            media_codecs: vec![
                json!({
                    "kind": "audio",
                    "mimeType": "audio/opus",
                    "clockRate": 48000,
                    "channels": 2
                }),
                json!({
                    "kind": "video",
                    "mimeType": "video/VP8",
                    "clockRate": 90000,
                    "parameters": { "x-google-start-bitrate": 1000 }
                }),
            ],
        }
    }
}

struct TransportRecord {
    peer_id: PeerId,
    events: EngineEventSender,
    connected: bool,
    producers: HashSet<ProducerId>,
    consumers: HashSet<ConsumerId>,
}

struct ProducerRecord {
    transport_id: TransportId,
    media_parameters: MediaParameters,
    consumers: HashSet<ConsumerId>,
}

struct ConsumerRecord {
    transport_id: TransportId,
    producer_id: ProducerId,
}

#[derive(Default)]
struct EngineState {
    transports: HashMap<TransportId, TransportRecord>,
    producers: HashMap<ProducerId, ProducerRecord>,
    consumers: HashMap<ConsumerId, ConsumerRecord>,
}

impl EngineState {
    fn emit(&self, transport_id: &TransportId, event: EngineEvent) {
        if let Some(transport) = self.transports.get(transport_id) {
            // Receiver gone means the room already stopped
            let _ = transport.events.send(event);
        }
    }

    fn close_consumer(&mut self, consumer_id: &ConsumerId) {
        let Some(consumer) = self.consumers.remove(consumer_id) else {
            return;
        };
        if let Some(producer) = self.producers.get_mut(&consumer.producer_id) {
            producer.consumers.remove(consumer_id);
        }
        self.emit(
            &consumer.transport_id,
            EngineEvent::ConsumerClosed {
                consumer_id: *consumer_id,
            },
        );
        if let Some(transport) = self.transports.get_mut(&consumer.transport_id) {
            transport.consumers.remove(consumer_id);
        }
    }

    fn close_producer(&mut self, producer_id: &ProducerId) {
        let Some(producer) = self.producers.remove(producer_id) else {
            return;
        };
        for consumer_id in &producer.consumers {
            self.close_consumer(consumer_id);
        }
        self.emit(
            &producer.transport_id,
            EngineEvent::ProducerClosed {
                producer_id: *producer_id,
            },
        );
        if let Some(transport) = self.transports.get_mut(&producer.transport_id) {
            transport.producers.remove(producer_id);
        }
    }

    fn close_transport(&mut self, transport_id: &TransportId) {
        let Some(transport) = self.transports.get(transport_id) else {
            return;
        };
        let producers: Vec<ProducerId> = transport.producers.iter().copied().collect();
        let consumers: Vec<ConsumerId> = transport.consumers.iter().copied().collect();

        for producer_id in &producers {
            self.close_producer(producer_id);
        }
        for consumer_id in &consumers {
            self.close_consumer(consumer_id);
        }

        self.emit(
            transport_id,
            EngineEvent::TransportClosed {
                transport_id: *transport_id,
            },
        );
        self.transports.remove(transport_id);
    }
}

/// In-process media engine.
pub struct SimulatedEngine {
    settings: EngineSettings,
    state: Arc<Mutex<EngineState>>,
    port_cursor: AtomicU32,
}

impl SimulatedEngine {
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            state: Arc::new(Mutex::new(EngineState::default())),
            port_cursor: AtomicU32::new(0),
        }
    }

    /// Close a transport as if its DTLS state went to `closed`.
    pub fn close_transport(&self, transport_id: &TransportId) {
        debug!(target: "rc.engine", transport_id = %transport_id, "DTLS closed, closing transport");
        self.state.lock().close_transport(transport_id);
    }

    /// Close a producer from the engine side.
    pub fn close_producer(&self, producer_id: &ProducerId) {
        self.state.lock().close_producer(producer_id);
    }

    /// Number of live transports.
    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.state.lock().transports.len()
    }

    /// Number of live producers.
    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.state.lock().producers.len()
    }

    /// Number of live consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    fn router_mime_types(&self) -> HashSet<String> {
        self.settings
            .media_codecs
            .iter()
            .filter_map(|codec| codec.get("mimeType").and_then(Value::as_str))
            .map(str::to_ascii_lowercase)
            .collect()
    }

    fn next_port(&self, min: u16, max: u16) -> u16 {
        let span = u32::from(max.saturating_sub(min)) + 1;
        let offset = self.port_cursor.fetch_add(1, Ordering::Relaxed) % span;
        // offset < span <= u16::MAX + 1, so the sum stays within [min, max]
        u16::try_from(u32::from(min) + offset).unwrap_or(max)
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

#[async_trait]
impl MediaEngine for SimulatedEngine {
    async fn room_capabilities(&self) -> Result<Capabilities, EngineError> {
        Ok(Capabilities(json!({
            "codecs": self.settings.media_codecs,
            "headerExtensions": []
        })))
    }

    async fn create_transport(
        &self,
        options: TransportOptions,
    ) -> Result<Arc<dyn EngineTransport>, EngineError> {
        let id = TransportId::new();
        let port = self.next_port(options.rtc_min_port, options.rtc_max_port);
        let ip = options
            .announced_ip
            .clone()
            .unwrap_or_else(|| options.listen_ip.clone());
        let fingerprint = uuid::Uuid::new_v4().simple().to_string().to_uppercase();

        let params = TransportParams {
            id,
            ice_parameters: json!({
                "usernameFragment": uuid::Uuid::new_v4().simple().to_string(),
                "password": uuid::Uuid::new_v4().simple().to_string(),
                "iceLite": true
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "priority": 1_076_302_079_u32,
                "ip": ip,
                "port": port,
                "protocol": "udp",
                "type": "host"
            }]),
            dtls_parameters: DtlsParameters(json!({
                "role": "auto",
                "fingerprints": [{ "algorithm": "sha-256", "value": fingerprint }]
            })),
            sctp_parameters: Some(json!({
                "port": 5000,
                "OS": 1024,
                "MIS": 1024,
                "maxMessageSize": 262_144
            })),
        };

        self.state.lock().transports.insert(
            id,
            TransportRecord {
                peer_id: options.peer_id,
                events: options.events,
                connected: false,
                producers: HashSet::new(),
                consumers: HashSet::new(),
            },
        );

        debug!(
            target: "rc.engine",
            transport_id = %id,
            peer_id = %options.peer_id,
            direction = %options.direction,
            port,
            "Transport created"
        );

        Ok(Arc::new(SimulatedTransport {
            id,
            direction: options.direction,
            params,
            state: Arc::clone(&self.state),
            router_mime_types: self.router_mime_types(),
        }))
    }

    fn can_consume(&self, producer_id: &ProducerId, capabilities: &Capabilities) -> bool {
        let state = self.state.lock();
        let Some(producer) = state.producers.get(producer_id) else {
            return false;
        };
        let wanted: HashSet<String> = capabilities.codec_mime_types().into_iter().collect();
        producer
            .media_parameters
            .codec_mime_types()
            .iter()
            .any(|mime| wanted.contains(mime))
    }
}

struct SimulatedTransport {
    id: TransportId,
    direction: TransportDirection,
    params: TransportParams,
    state: Arc<Mutex<EngineState>>,
    router_mime_types: HashSet<String>,
}

#[async_trait]
impl EngineTransport for SimulatedTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    fn params(&self) -> TransportParams {
        self.params.clone()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), EngineError> {
        if !dtls_parameters.0.is_object() {
            return Err(EngineError::Rejected(
                "dtlsParameters must be an object".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let transport = state
            .transports
            .get_mut(&self.id)
            .ok_or_else(|| EngineError::Rejected("transport closed".to_string()))?;
        if transport.connected {
            return Err(EngineError::Rejected(
                "connect() already called".to_string(),
            ));
        }
        transport.connected = true;
        debug!(target: "rc.engine", transport_id = %self.id, peer_id = %transport.peer_id, "Transport connected");
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        media_parameters: MediaParameters,
    ) -> Result<Arc<dyn EngineProducer>, EngineError> {
        if self.direction != TransportDirection::Send {
            return Err(EngineError::Rejected(
                "cannot produce on a recv transport".to_string(),
            ));
        }
        let prefix = format!("{kind}/");
        let routable = media_parameters
            .codec_mime_types()
            .iter()
            .any(|mime| mime.starts_with(&prefix) && self.router_mime_types.contains(mime));
        if !routable {
            return Err(EngineError::Rejected(format!(
                "no {kind} codec in media parameters is supported by the router"
            )));
        }

        let id = ProducerId::new();
        let mut state = self.state.lock();
        let transport = state
            .transports
            .get_mut(&self.id)
            .ok_or_else(|| EngineError::Rejected("transport closed".to_string()))?;
        transport.producers.insert(id);
        state.producers.insert(
            id,
            ProducerRecord {
                transport_id: self.id,
                media_parameters,
                consumers: HashSet::new(),
            },
        );

        debug!(target: "rc.engine", producer_id = %id, transport_id = %self.id, kind = %kind, "Producer created");
        Ok(Arc::new(SimulatedProducer {
            id,
            kind,
            state: Arc::clone(&self.state),
        }))
    }

    async fn consume(
        &self,
        producer_id: ProducerId,
        capabilities: Capabilities,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError> {
        if self.direction != TransportDirection::Recv {
            return Err(EngineError::Rejected(
                "cannot consume on a send transport".to_string(),
            ));
        }

        let id = ConsumerId::new();
        let mut state = self.state.lock();
        let producer = state
            .producers
            .get(&producer_id)
            .ok_or_else(|| EngineError::Rejected(format!("producer {producer_id} not found")))?;

        let wanted: HashSet<String> = capabilities.codec_mime_types().into_iter().collect();
        let codecs: Vec<Value> = producer
            .media_parameters
            .0
            .get("codecs")
            .and_then(Value::as_array)
            .map(|codecs| {
                codecs
                    .iter()
                    .filter(|codec| {
                        codec
                            .get("mimeType")
                            .and_then(Value::as_str)
                            .is_some_and(|mime| wanted.contains(&mime.to_ascii_lowercase()))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if codecs.is_empty() {
            return Err(EngineError::Rejected(
                "cannot consume with the given capabilities".to_string(),
            ));
        }
        let kind = codecs
            .iter()
            .filter_map(|codec| codec.get("mimeType").and_then(Value::as_str))
            .find_map(|mime| {
                if mime.to_ascii_lowercase().starts_with("video/") {
                    Some(MediaKind::Video)
                } else if mime.to_ascii_lowercase().starts_with("audio/") {
                    Some(MediaKind::Audio)
                } else {
                    None
                }
            })
            .ok_or_else(|| EngineError::Rejected("unknown media kind".to_string()))?;

        let media_parameters = MediaParameters(json!({
            "codecs": codecs,
            "encodings": [{ "ssrc": rand_ssrc() }],
            "rtcp": { "cname": producer_id.to_string() }
        }));

        let transport = state
            .transports
            .get_mut(&self.id)
            .ok_or_else(|| EngineError::Rejected("transport closed".to_string()))?;
        transport.consumers.insert(id);
        if let Some(producer) = state.producers.get_mut(&producer_id) {
            producer.consumers.insert(id);
        }
        state.consumers.insert(
            id,
            ConsumerRecord {
                transport_id: self.id,
                producer_id,
            },
        );

        debug!(target: "rc.engine", consumer_id = %id, producer_id = %producer_id, transport_id = %self.id, "Consumer created");
        Ok(Arc::new(SimulatedConsumer {
            id,
            producer_id,
            kind,
            media_parameters,
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&self) {
        self.state.lock().close_transport(&self.id);
    }
}

struct SimulatedProducer {
    id: ProducerId,
    kind: MediaKind,
    state: Arc<Mutex<EngineState>>,
}

impl EngineProducer for SimulatedProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.state.lock().close_producer(&self.id);
    }
}

struct SimulatedConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    media_parameters: MediaParameters,
    state: Arc<Mutex<EngineState>>,
}

impl EngineConsumer for SimulatedConsumer {
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
        self.media_parameters.clone()
    }

    fn close(&self) {
        self.state.lock().close_consumer(&self.id);
    }
}

fn rand_ssrc() -> u32 {
    let (high, _) = uuid::Uuid::new_v4().as_u64_pair();
    u32::try_from(high >> 32).unwrap_or(1).max(1)
}
