//! `RoomActor` - per-room actor that owns room state.
//!
//! Each `RoomActor`:
//! - Owns the peer map and the producer map of one room
//! - Processes one message at a time, so joins, leaves and publishes from
//!   different peers never interleave
//! - Awaits engine calls inside the message handler; a peer removed while a
//!   publish is in flight is processed after the publish completes
//! - Reconciles its maps from engine lifecycle events
//!
//! # Notifications
//!
//! `newProducer` and `producerClosed` are pushed onto the peers' outbound
//! queues with `try_send`. A full queue drops the notification and counts it
//! in `rc_notifications_dropped_total`; acks are never dropped.
//!
//! # Reaping
//!
//! With `reap_when_empty` set, the actor stops after its last peer is
//! removed. Messages still queued at that point are dropped and their
//! callers see [`RcError::RoomClosed`].

use crate::config::Config;
use crate::engine::{
    EngineConsumer, EngineEvent, EngineEventReceiver, EngineEventSender, EngineProducer,
    EngineTransport, MediaEngine, TransportOptions,
};
use crate::errors::RcError;
use crate::observability;

use super::messages::{OutboundSender, PeerSummary, RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{ConsumerId, PeerId, ProducerId, RoomId, TransportId};
use signaling_protocol::{
    Capabilities, ConsumerParams, DtlsParameters, MediaKind, MediaParameters, NewProducer,
    Notification, ProducerClosed, ProducerInfo, ServerMessage, TransportDirection,
    TransportParams,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Per-room settings handed down by the registry.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub listen_ip: String,
    pub announced_ip: Option<String>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    /// Stop the actor once the last peer leaves.
    pub reap_when_empty: bool,
}

impl RoomSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            listen_ip: config.listen_ip.clone(),
            announced_ip: config.announced_ip.clone(),
            rtc_min_port: config.rtc_min_port,
            rtc_max_port: config.rtc_max_port,
            reap_when_empty: config.reap_empty_rooms,
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            listen_ip: crate::config::DEFAULT_LISTEN_IP.to_string(),
            announced_ip: None,
            rtc_min_port: crate::config::DEFAULT_RTC_MIN_PORT,
            rtc_max_port: crate::config::DEFAULT_RTC_MAX_PORT,
            reap_when_empty: true,
        }
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
    capabilities: Arc<Capabilities>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The room's capability descriptor. Fixed at room creation.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Whether the actor has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Add a peer whose notifications go to `outbound`.
    pub async fn join(
        &self,
        peer_id: PeerId,
        name: String,
        outbound: OutboundSender,
    ) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Join {
            peer_id,
            name,
            outbound,
            respond_to,
        })
        .await?
    }

    pub async fn create_transport(
        &self,
        peer_id: PeerId,
        direction: TransportDirection,
    ) -> Result<TransportParams, RcError> {
        self.request(|respond_to| RoomMessage::CreateTransport {
            peer_id,
            direction,
            respond_to,
        })
        .await?
    }

    pub async fn connect_transport(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::ConnectTransport {
            peer_id,
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn publish(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        kind: MediaKind,
        media_parameters: MediaParameters,
    ) -> Result<ProducerId, RcError> {
        self.request(|respond_to| RoomMessage::Publish {
            peer_id,
            transport_id,
            kind,
            media_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn list_producers(&self, peer_id: PeerId) -> Result<Vec<ProducerInfo>, RcError> {
        self.request(|respond_to| RoomMessage::ListProducers {
            peer_id,
            respond_to,
        })
        .await?
    }

    pub async fn subscribe(
        &self,
        peer_id: PeerId,
        producer_id: ProducerId,
        capabilities: Capabilities,
    ) -> Result<ConsumerParams, RcError> {
        self.request(|respond_to| RoomMessage::Subscribe {
            peer_id,
            producer_id,
            capabilities,
            respond_to,
        })
        .await?
    }

    /// Remove a peer and close everything it owns.
    ///
    /// Returns `Ok(false)` if the peer was not in the room.
    pub async fn remove_peer(&self, peer_id: PeerId) -> Result<bool, RcError> {
        self.request(|respond_to| RoomMessage::RemovePeer {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Both a full stop of the actor and a dropped queued message surface as
    /// `RoomClosed`.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RcError::RoomClosed)?;
        rx.await.map_err(|_| RcError::RoomClosed)
    }
}

/// A peer's transport in one direction.
struct PeerTransport {
    handle: Arc<dyn EngineTransport>,
    connected: bool,
}

/// Peer state within a room.
struct Peer {
    name: String,
    outbound: OutboundSender,
    send_transport: Option<PeerTransport>,
    recv_transport: Option<PeerTransport>,
    producers: HashSet<ProducerId>,
    consumers: HashMap<ConsumerId, Arc<dyn EngineConsumer>>,
    /// Last capability descriptor the peer presented on subscribe.
    capabilities: Option<Capabilities>,
}

impl Peer {
    fn transport(&self, direction: TransportDirection) -> Option<&PeerTransport> {
        match direction {
            TransportDirection::Send => self.send_transport.as_ref(),
            TransportDirection::Recv => self.recv_transport.as_ref(),
        }
    }

    fn transport_by_id_mut(&mut self, transport_id: &TransportId) -> Option<&mut PeerTransport> {
        [self.send_transport.as_mut(), self.recv_transport.as_mut()]
            .into_iter()
            .flatten()
            .find(|t| &t.handle.id() == transport_id)
    }

    fn transports(&self) -> impl Iterator<Item = &PeerTransport> {
        self.send_transport.iter().chain(self.recv_transport.iter())
    }

    fn summary(&self, peer_id: PeerId) -> PeerSummary {
        PeerSummary {
            peer_id,
            name: self.name.clone(),
            transports: self
                .transports()
                .map(|t| (t.handle.direction(), t.handle.id()))
                .collect(),
            producers: self.producers.iter().copied().collect(),
            consumers: self.consumers.len(),
            has_capabilities: self.capabilities.is_some(),
        }
    }
}

/// A producer as known to the room.
struct RoomProducer {
    handle: Arc<dyn EngineProducer>,
    peer_id: PeerId,
    transport_id: TransportId,
    kind: MediaKind,
    name: String,
}

impl RoomProducer {
    fn info(&self) -> ProducerInfo {
        ProducerInfo {
            producer_id: self.handle.id(),
            peer_id: self.peer_id,
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    engine: Arc<dyn MediaEngine>,
    settings: RoomSettings,
    engine_events_tx: EngineEventSender,
    engine_events: EngineEventReceiver,
    peers: HashMap<PeerId, Peer>,
    producers: HashMap<ProducerId, RoomProducer>,
    /// Set once the last peer left and the room is being reaped.
    stopping: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: RoomId,
        capabilities: Capabilities,
        engine: Arc<dyn MediaEngine>,
        settings: RoomSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let (engine_events_tx, engine_events) = mpsc::unbounded_channel();

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            engine,
            settings,
            engine_events_tx,
            engine_events,
            peers: HashMap::new(),
            producers: HashMap::new(),
            stopping: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            capabilities: Arc::new(capabilities),
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                // Engine events drain before the next request so every reply
                // reflects what the engine already closed
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                Some(event) = self.engine_events.recv() => {
                    self.handle_engine_event(event);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }

            if self.stopping {
                info!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    "Room empty, stopping"
                );
                break;
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peers = self.peers.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                peer_id,
                name,
                outbound,
                respond_to,
            } => {
                let result = self.handle_join(peer_id, name, outbound);
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateTransport {
                peer_id,
                direction,
                respond_to,
            } => {
                let result = self.handle_create_transport(peer_id, direction).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectTransport {
                peer_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_connect_transport(peer_id, transport_id, dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Publish {
                peer_id,
                transport_id,
                kind,
                media_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_publish(peer_id, transport_id, kind, media_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ListProducers {
                peer_id,
                respond_to,
            } => {
                let result = self.list_producers(&peer_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::Subscribe {
                peer_id,
                producer_id,
                capabilities,
                respond_to,
            } => {
                let result = self
                    .handle_subscribe(peer_id, producer_id, capabilities)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::RemovePeer {
                peer_id,
                respond_to,
            } => {
                let removed = self.remove_peer(&peer_id);
                if self.peers.is_empty() && self.settings.reap_when_empty {
                    // Refuse new messages before answering so the registry
                    // never hands out this handle again
                    self.receiver.close();
                    self.stopping = true;
                }
                let _ = respond_to.send(removed);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    fn handle_join(
        &mut self,
        peer_id: PeerId,
        name: String,
        outbound: OutboundSender,
    ) -> Result<(), RcError> {
        if self.peers.contains_key(&peer_id) {
            return Err(RcError::AlreadyJoined);
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            name_len = name.len(),
            peers = self.peers.len() + 1,
            "Peer joined"
        );

        self.peers.insert(
            peer_id,
            Peer {
                name,
                outbound,
                send_transport: None,
                recv_transport: None,
                producers: HashSet::new(),
                consumers: HashMap::new(),
                capabilities: None,
            },
        );
        self.metrics.peer_joined();
        Ok(())
    }

    async fn handle_create_transport(
        &mut self,
        peer_id: PeerId,
        direction: TransportDirection,
    ) -> Result<TransportParams, RcError> {
        let peer = self.peers.get(&peer_id).ok_or(RcError::NotInRoom)?;
        if peer.transport(direction).is_some() {
            return Err(RcError::TransportExists(direction));
        }

        let transport = self
            .engine
            .create_transport(TransportOptions {
                direction,
                peer_id,
                listen_ip: self.settings.listen_ip.clone(),
                announced_ip: self.settings.announced_ip.clone(),
                rtc_min_port: self.settings.rtc_min_port,
                rtc_max_port: self.settings.rtc_max_port,
                events: self.engine_events_tx.clone(),
            })
            .await?;
        let params = transport.params();

        // The peer cannot leave while the engine call is awaited
        let peer = self.peers.get_mut(&peer_id).ok_or(RcError::NotInRoom)?;
        let slot = match direction {
            TransportDirection::Send => &mut peer.send_transport,
            TransportDirection::Recv => &mut peer.recv_transport,
        };
        *slot = Some(PeerTransport {
            handle: transport,
            connected: false,
        });

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %params.id,
            direction = %direction,
            "Transport created"
        );
        Ok(params)
    }

    async fn handle_connect_transport(
        &mut self,
        peer_id: PeerId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RcError> {
        let peer = self.peers.get_mut(&peer_id).ok_or(RcError::NotInRoom)?;
        let transport = peer
            .transport_by_id_mut(&transport_id)
            .ok_or(RcError::TransportNotFound)?;

        transport.handle.connect(dtls_parameters).await?;
        transport.connected = true;

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %transport_id,
            "Transport connected"
        );
        Ok(())
    }

    async fn handle_publish(
        &mut self,
        peer_id: PeerId,
        transport_id: TransportId,
        kind: MediaKind,
        media_parameters: MediaParameters,
    ) -> Result<ProducerId, RcError> {
        let peer = self.peers.get_mut(&peer_id).ok_or(RcError::NotInRoom)?;
        let transport = peer
            .send_transport
            .as_ref()
            .filter(|t| t.handle.id() == transport_id)
            .ok_or(RcError::SendTransportNotFound)?;
        if !transport.connected {
            return Err(RcError::TransportNotConnected);
        }

        let producer = transport.handle.produce(kind, media_parameters).await?;
        let producer_id = producer.id();
        peer.producers.insert(producer_id);

        let entry = RoomProducer {
            handle: producer,
            peer_id,
            transport_id,
            kind,
            name: peer.name.clone(),
        };
        let announcement = Notification::NewProducer(NewProducer::from(entry.info()));
        self.producers.insert(producer_id, entry);

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            kind = %kind,
            "Producer created"
        );

        self.notify_others(&peer_id, &announcement);
        Ok(producer_id)
    }

    fn list_producers(&self, peer_id: &PeerId) -> Result<Vec<ProducerInfo>, RcError> {
        if !self.peers.contains_key(peer_id) {
            return Err(RcError::NotInRoom);
        }
        Ok(self
            .producers
            .values()
            .filter(|p| &p.peer_id != peer_id)
            .map(RoomProducer::info)
            .collect())
    }

    async fn handle_subscribe(
        &mut self,
        peer_id: PeerId,
        producer_id: ProducerId,
        capabilities: Capabilities,
    ) -> Result<ConsumerParams, RcError> {
        if !self.peers.contains_key(&peer_id) {
            return Err(RcError::NotInRoom);
        }
        let source = self
            .producers
            .get(&producer_id)
            .map(RoomProducer::info)
            .ok_or(RcError::ProducerNotFound)?;

        let peer = self.peers.get_mut(&peer_id).ok_or(RcError::NotInRoom)?;
        peer.capabilities = Some(capabilities.clone());

        if !self.engine.can_consume(&producer_id, &capabilities) {
            return Err(RcError::IncompatibleCapabilities);
        }
        let transport = peer
            .recv_transport
            .as_ref()
            .ok_or(RcError::RecvTransportMissing)?;

        let consumer = transport.handle.consume(producer_id, capabilities).await?;
        let params = ConsumerParams {
            id: consumer.id(),
            kind: consumer.kind(),
            media_params: consumer.media_parameters(),
            producer_id,
            peer_id: source.peer_id,
            name: source.name,
        };
        peer.consumers.insert(params.id, consumer);

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            consumer_id = %params.id,
            producer_id = %producer_id,
            "Consumer created"
        );
        Ok(params)
    }

    /// Remove a peer: announce and drop its producers together with the other
    /// peers' consumers of them, then close its transports. Everything leaves
    /// the maps before the engine is told to close anything, so the engine's
    /// echo events find nothing left to clean up.
    fn remove_peer(&mut self, peer_id: &PeerId) -> bool {
        let Some(peer) = self.peers.remove(peer_id) else {
            return false;
        };

        for producer_id in &peer.producers {
            if self.producers.remove(producer_id).is_some() {
                self.close_consumers_of(producer_id);
                self.notify_others(
                    peer_id,
                    &Notification::ProducerClosed(ProducerClosed {
                        producer_id: *producer_id,
                    }),
                );
            }
        }

        for transport in peer.transports() {
            transport.handle.close();
        }

        self.metrics.peer_left();
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producers_closed = peer.producers.len(),
            consumers_closed = peer.consumers.len(),
            peers = self.peers.len(),
            "Peer removed"
        );
        true
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::TransportClosed { transport_id } => {
                self.on_transport_closed(&transport_id);
            }
            EngineEvent::ProducerClosed { producer_id } => {
                self.on_producer_closed(&producer_id);
            }
            EngineEvent::ConsumerClosed { consumer_id } => {
                for peer in self.peers.values_mut() {
                    if peer.consumers.remove(&consumer_id).is_some() {
                        debug!(
                            target: "rc.actor.room",
                            room_id = %self.room_id,
                            consumer_id = %consumer_id,
                            "Consumer closed by engine"
                        );
                        break;
                    }
                }
            }
        }
    }

    fn on_transport_closed(&mut self, transport_id: &TransportId) {
        let owner = self.peers.iter_mut().find_map(|(peer_id, peer)| {
            let direction = peer
                .transports()
                .find(|t| &t.handle.id() == transport_id)
                .map(|t| t.handle.direction())?;
            match direction {
                TransportDirection::Send => peer.send_transport = None,
                TransportDirection::Recv => {
                    peer.recv_transport = None;
                    // Consumers only live on the recv transport
                    peer.consumers.clear();
                }
            }
            Some(*peer_id)
        });
        let Some(peer_id) = owner else {
            return;
        };

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %transport_id,
            "Transport closed by engine"
        );

        let orphaned: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|(_, p)| &p.transport_id == transport_id)
            .map(|(id, _)| *id)
            .collect();
        for producer_id in orphaned {
            self.on_producer_closed(&producer_id);
        }
    }

    fn on_producer_closed(&mut self, producer_id: &ProducerId) {
        let Some(producer) = self.producers.remove(producer_id) else {
            return;
        };
        if let Some(owner) = self.peers.get_mut(&producer.peer_id) {
            owner.producers.remove(producer_id);
        }
        producer.handle.close();
        self.close_consumers_of(producer_id);

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %producer.peer_id,
            producer_id = %producer_id,
            "Producer closed by engine"
        );
        self.notify_others(
            &producer.peer_id,
            &Notification::ProducerClosed(ProducerClosed {
                producer_id: *producer_id,
            }),
        );
    }

    /// Drop and close every consumer fed by `producer_id`. Returns how many
    /// were removed.
    fn close_consumers_of(&mut self, producer_id: &ProducerId) -> usize {
        let mut removed = 0;
        for (peer_id, peer) in &mut self.peers {
            peer.consumers.retain(|consumer_id, consumer| {
                if &consumer.producer_id() != producer_id {
                    return true;
                }
                consumer.close();
                debug!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    consumer_id = %consumer_id,
                    producer_id = %producer_id,
                    "Consumer closed with its producer"
                );
                removed += 1;
                false
            });
        }
        removed
    }

    /// Push a notification to every peer except `except`.
    fn notify_others(&self, except: &PeerId, notification: &Notification) {
        for (peer_id, peer) in &self.peers {
            if peer_id == except {
                continue;
            }
            match peer
                .outbound
                .try_send(ServerMessage::Notification(notification.clone()))
            {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.mailbox.record_drop();
                    observability::record_notification_dropped(notification.method());
                    warn!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        peer_id = %peer_id,
                        notification = notification.method(),
                        "Outbound queue full, notification dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Connection is going away; its session removes the peer
                    debug!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        peer_id = %peer_id,
                        notification = notification.method(),
                        "Outbound queue closed, notification skipped"
                    );
                }
            }
        }
    }

    fn get_state(&self) -> RoomState {
        RoomState {
            room_id: self.room_id.clone(),
            peers: self
                .peers
                .iter()
                .map(|(peer_id, peer)| peer.summary(*peer_id))
                .collect(),
            producers: self.producers.values().map(RoomProducer::info).collect(),
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Close every transport without notifying peers; their sessions are
    /// being cancelled too.
    fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peers = self.peers.len(),
            "Closing room"
        );
        self.producers.clear();
        for (_, peer) in self.peers.drain() {
            for transport in peer.transports() {
                transport.handle.close();
            }
            self.metrics.peer_left();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use serde_json::json;
    use std::time::Duration;

    fn audio_params() -> MediaParameters {
        MediaParameters(json!({ "codecs": [{ "mimeType": "audio/opus", "clockRate": 48000 }] }))
    }

    fn device_caps() -> Capabilities {
        Capabilities(json!({ "codecs": [
            { "kind": "audio", "mimeType": "audio/opus" },
            { "kind": "video", "mimeType": "video/VP8" }
        ] }))
    }

    fn dtls() -> DtlsParameters {
        DtlsParameters(json!({ "role": "client", "fingerprints": [] }))
    }

    struct Harness {
        handle: RoomActorHandle,
        task: JoinHandle<()>,
        engine: Arc<SimulatedEngine>,
    }

    async fn spawn_room(reap_when_empty: bool) -> Harness {
        let engine = Arc::new(SimulatedEngine::default());
        let capabilities = engine.room_capabilities().await.unwrap();
        let (handle, task) = RoomActor::spawn(
            RoomId::from("room-test"),
            capabilities,
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            RoomSettings {
                reap_when_empty,
                ..RoomSettings::default()
            },
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        Harness {
            handle,
            task,
            engine,
        }
    }

    async fn join(
        handle: &RoomActorHandle,
        name: &str,
    ) -> (PeerId, mpsc::Receiver<ServerMessage>) {
        let peer_id = PeerId::new();
        let (tx, rx) = mpsc::channel(16);
        handle.join(peer_id, name.to_string(), tx).await.unwrap();
        (peer_id, rx)
    }

    /// Create and connect a transport, returning its id.
    async fn connected_transport(
        handle: &RoomActorHandle,
        peer_id: PeerId,
        direction: TransportDirection,
    ) -> TransportId {
        let params = handle.create_transport(peer_id, direction).await.unwrap();
        handle
            .connect_transport(peer_id, params.id, dtls())
            .await
            .unwrap();
        params.id
    }

    async fn publish_audio(handle: &RoomActorHandle, peer_id: PeerId) -> ProducerId {
        let send = connected_transport(handle, peer_id, TransportDirection::Send).await;
        handle
            .publish(peer_id, send, MediaKind::Audio, audio_params())
            .await
            .unwrap()
    }

    fn expect_notification(rx: &mut mpsc::Receiver<ServerMessage>) -> Notification {
        match rx.try_recv() {
            Ok(ServerMessage::Notification(n)) => n,
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_room_actor_join_and_state() {
        let h = spawn_room(false).await;
        let (alice, _rx) = join(&h.handle, "alice").await;

        let state = h.handle.get_state().await.unwrap();
        assert_eq!(state.room_id.as_str(), "room-test");
        assert_eq!(state.peers.len(), 1);
        assert_eq!(state.peer(&alice).unwrap().name, "alice");
        assert!(h.handle.capabilities().supports_kind(MediaKind::Video));

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_room_actor_duplicate_join() {
        let h = spawn_room(false).await;
        let peer_id = PeerId::new();
        let (tx, _rx) = mpsc::channel(4);
        h.handle
            .join(peer_id, "alice".to_string(), tx.clone())
            .await
            .unwrap();

        let result = h.handle.join(peer_id, "alice".to_string(), tx).await;
        assert!(matches!(result, Err(RcError::AlreadyJoined)));

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_create_transport_once_per_direction() {
        let h = spawn_room(false).await;
        let (alice, _rx) = join(&h.handle, "alice").await;

        let send = h
            .handle
            .create_transport(alice, TransportDirection::Send)
            .await
            .unwrap();
        let recv = h
            .handle
            .create_transport(alice, TransportDirection::Recv)
            .await
            .unwrap();
        assert_ne!(send.id, recv.id);

        let again = h
            .handle
            .create_transport(alice, TransportDirection::Send)
            .await;
        assert!(matches!(
            again,
            Err(RcError::TransportExists(TransportDirection::Send))
        ));

        let unknown = h
            .handle
            .create_transport(PeerId::new(), TransportDirection::Send)
            .await;
        assert!(matches!(unknown, Err(RcError::NotInRoom)));

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_connect_foreign_transport_rejected() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let (bob, _b) = join(&h.handle, "bob").await;

        let alice_send = h
            .handle
            .create_transport(alice, TransportDirection::Send)
            .await
            .unwrap();

        let result = h
            .handle
            .connect_transport(bob, alice_send.id, dtls())
            .await;
        assert!(matches!(result, Err(RcError::TransportNotFound)));

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_publish_requires_connected_send_transport() {
        let h = spawn_room(false).await;
        let (alice, _rx) = join(&h.handle, "alice").await;

        let send = h
            .handle
            .create_transport(alice, TransportDirection::Send)
            .await
            .unwrap();
        let result = h
            .handle
            .publish(alice, send.id, MediaKind::Audio, audio_params())
            .await;
        assert!(matches!(result, Err(RcError::TransportNotConnected)));

        let recv = connected_transport(&h.handle, alice, TransportDirection::Recv).await;
        let result = h
            .handle
            .publish(alice, recv, MediaKind::Audio, audio_params())
            .await;
        assert!(matches!(result, Err(RcError::SendTransportNotFound)));

        assert!(h.handle.get_state().await.unwrap().producers.is_empty());
        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_publish_engine_rejection_sends_no_notification() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let (_bob, mut bob_rx) = join(&h.handle, "bob").await;

        let send = connected_transport(&h.handle, alice, TransportDirection::Send).await;
        let h265 = MediaParameters(json!({ "codecs": [{ "mimeType": "video/H265" }] }));
        let result = h.handle.publish(alice, send, MediaKind::Video, h265).await;

        assert!(matches!(result, Err(RcError::Engine(_))));
        assert!(bob_rx.try_recv().is_err());
        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_publish_notifies_others_only() {
        let h = spawn_room(false).await;
        let (alice, mut alice_rx) = join(&h.handle, "alice").await;
        let (_bob, mut bob_rx) = join(&h.handle, "bob").await;

        let producer_id = publish_audio(&h.handle, alice).await;

        match expect_notification(&mut bob_rx) {
            Notification::NewProducer(n) => {
                assert_eq!(n.producer_id, producer_id);
                assert_eq!(n.peer_id, alice);
                assert_eq!(n.kind, MediaKind::Audio);
                assert_eq!(n.name, "alice");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(alice_rx.try_recv().is_err());

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_list_producers_excludes_own() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let (bob, _b) = join(&h.handle, "bob").await;

        let a1 = publish_audio(&h.handle, alice).await;
        let _b1 = publish_audio(&h.handle, bob).await;

        let for_bob = h.handle.list_producers(bob).await.unwrap();
        assert_eq!(for_bob.len(), 1);
        assert_eq!(for_bob[0].producer_id, a1);
        assert_eq!(for_bob[0].peer_id, alice);
        assert_eq!(for_bob[0].name, "alice");

        let for_alice = h.handle.list_producers(alice).await.unwrap();
        assert!(for_alice.iter().all(|p| p.peer_id != alice));

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_subscribe_check_order() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let (bob, _b) = join(&h.handle, "bob").await;
        let a1 = publish_audio(&h.handle, alice).await;

        // Unknown producer wins over missing recv transport
        let result = h
            .handle
            .subscribe(bob, ProducerId::new(), device_caps())
            .await;
        assert!(matches!(result, Err(RcError::ProducerNotFound)));

        // Incompatible capabilities win over missing recv transport
        let video_only = Capabilities(json!({ "codecs": [{ "mimeType": "video/VP8" }] }));
        let result = h.handle.subscribe(bob, a1, video_only).await;
        assert!(matches!(result, Err(RcError::IncompatibleCapabilities)));

        let result = h.handle.subscribe(bob, a1, device_caps()).await;
        assert!(matches!(result, Err(RcError::RecvTransportMissing)));

        let state = h.handle.get_state().await.unwrap();
        let bob_state = state.peer(&bob).unwrap();
        assert_eq!(bob_state.consumers, 0);
        assert!(bob_state.has_capabilities);
        assert_eq!(h.engine.consumer_count(), 0);

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_subscribe_returns_source_labels() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let (bob, _b) = join(&h.handle, "bob").await;
        let a1 = publish_audio(&h.handle, alice).await;
        connected_transport(&h.handle, bob, TransportDirection::Recv).await;

        let consumer = h.handle.subscribe(bob, a1, device_caps()).await.unwrap();
        assert_eq!(consumer.producer_id, a1);
        assert_eq!(consumer.peer_id, alice);
        assert_eq!(consumer.name, "alice");
        assert_eq!(consumer.kind, MediaKind::Audio);

        let state = h.handle.get_state().await.unwrap();
        assert_eq!(state.peer(&bob).unwrap().consumers, 1);

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_self_subscribe_allowed() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let a1 = publish_audio(&h.handle, alice).await;
        connected_transport(&h.handle, alice, TransportDirection::Recv).await;

        let consumer = h.handle.subscribe(alice, a1, device_caps()).await.unwrap();
        assert_eq!(consumer.peer_id, alice);

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_remove_peer_cleans_up_once() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let (bob, mut bob_rx) = join(&h.handle, "bob").await;
        let a1 = publish_audio(&h.handle, alice).await;
        connected_transport(&h.handle, bob, TransportDirection::Recv).await;
        h.handle.subscribe(bob, a1, device_caps()).await.unwrap();
        let _ = expect_notification(&mut bob_rx); // newProducer

        assert!(h.handle.remove_peer(alice).await.unwrap());
        assert!(!h.handle.remove_peer(alice).await.unwrap());

        // Engine echo events are processed before this reply
        let state = h.handle.get_state().await.unwrap();
        assert!(state.producers.is_empty());
        assert!(state.peer(&alice).is_none());
        assert_eq!(state.peer(&bob).unwrap().consumers, 0);

        match expect_notification(&mut bob_rx) {
            Notification::ProducerClosed(c) => assert_eq!(c.producer_id, a1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(bob_rx.try_recv().is_err(), "producerClosed must be sent once");
        assert_eq!(h.engine.producer_count(), 0);

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_engine_transport_close_announces_producers() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let (_bob, mut bob_rx) = join(&h.handle, "bob").await;
        let a1 = publish_audio(&h.handle, alice).await;
        let _ = expect_notification(&mut bob_rx);

        let send_id = h.handle.get_state().await.unwrap().peer(&alice).unwrap().transports[0].1;
        h.engine.close_transport(&send_id);

        let state = h.handle.get_state().await.unwrap();
        assert!(state.producers.is_empty());
        assert!(state.peer(&alice).unwrap().transports.is_empty());

        match expect_notification(&mut bob_rx) {
            Notification::ProducerClosed(c) => assert_eq!(c.producer_id, a1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(bob_rx.try_recv().is_err());

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_notification() {
        let h = spawn_room(false).await;
        let (alice, _a) = join(&h.handle, "alice").await;
        let bob = PeerId::new();
        let (tx, mut bob_rx) = mpsc::channel(1);
        h.handle.join(bob, "bob".to_string(), tx).await.unwrap();

        let send = connected_transport(&h.handle, alice, TransportDirection::Send).await;
        h.handle
            .publish(alice, send, MediaKind::Audio, audio_params())
            .await
            .unwrap();
        // Second notification does not fit
        let result = h
            .handle
            .publish(alice, send, MediaKind::Audio, audio_params())
            .await;
        assert!(result.is_ok());

        assert!(bob_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());

        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_empty_room_stops_when_reaping() {
        let h = spawn_room(true).await;
        let (alice, _rx) = join(&h.handle, "alice").await;

        assert!(h.handle.remove_peer(alice).await.unwrap());
        assert!(h.handle.is_closed());

        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .expect("room should stop")
            .unwrap();

        let result = h.handle.join(PeerId::new(), "late".to_string(), mpsc::channel(1).0).await;
        assert!(matches!(result, Err(RcError::RoomClosed)));
    }

    #[tokio::test]
    async fn test_room_actor_cancellation_closes_transports() {
        let h = spawn_room(false).await;
        let (alice, _rx) = join(&h.handle, "alice").await;
        publish_audio(&h.handle, alice).await;
        assert_eq!(h.engine.transport_count(), 1);

        h.handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .expect("room should stop")
            .unwrap();

        assert!(h.handle.is_cancelled());
        assert_eq!(h.engine.transport_count(), 0);
        assert_eq!(h.engine.producer_count(), 0);
    }
}
