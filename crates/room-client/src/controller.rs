//! Session controller.
//!
//! Drives one client through the join sequence, strictly in order:
//!
//! ```text
//! join ─> getCapabilities ─> device.load
//!      ─> createTransport(send) ─> connectTransport
//!      ─> createTransport(recv) ─> connectTransport
//!      ─> publish (each producible local kind)
//!      ─> listProducers ─> subscribe (each entry)
//! ```
//!
//! Each step is awaited before the next begins. Notifications that arrive
//! meanwhile are handled between steps, so a `newProducer` seen before the
//! recv transport exists is dropped. A failing step aborts the sequence:
//! every local transport and track created so far is closed, `leave` is
//! sent, and the error is returned with the controller still not joined.

use crate::device::{LocalTransport, MediaDevice};
use crate::errors::ClientError;
use crate::reconciler::{DropReason, Reaction, RecvContext, SubscriptionReconciler};
use crate::remote::RemoteStreams;
use crate::signaling::{NotificationReceiver, SignalingClient};
use common::types::{ConsumerId, PeerId, ProducerId, RoomId};
use signaling_protocol::{Capabilities, MediaKind, Notification, TransportDirection};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A track this client published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedTrack {
    pub kind: MediaKind,
    pub producer_id: ProducerId,
}

/// Result of a completed join sequence.
#[derive(Debug, Clone)]
pub struct JoinSummary {
    pub peer_id: PeerId,
    pub published: Vec<PublishedTrack>,
    /// Subscriptions made from the `listProducers` result.
    pub subscribed: usize,
}

/// A handled notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Subscribed {
        producer_id: ProducerId,
        consumer_id: ConsumerId,
    },
    Dropped {
        producer_id: ProducerId,
        reason: DropReason,
    },
    /// Subscribing to an announced producer failed; the session continues.
    SubscribeFailed {
        producer_id: ProducerId,
        error: String,
    },
    ProducerClosed {
        producer_id: ProducerId,
        consumers_removed: usize,
    },
}

struct ActiveSession {
    room_id: RoomId,
    peer_id: PeerId,
    capabilities: Option<Capabilities>,
    send_transport: Option<Arc<dyn LocalTransport>>,
    recv_transport: Option<Arc<dyn LocalTransport>>,
    published: Vec<PublishedTrack>,
    reconciler: SubscriptionReconciler,
}

impl ActiveSession {
    fn new(room_id: RoomId, peer_id: PeerId) -> Self {
        Self {
            room_id,
            peer_id,
            capabilities: None,
            send_transport: None,
            recv_transport: None,
            published: Vec::new(),
            reconciler: SubscriptionReconciler::new(peer_id),
        }
    }

    /// Stop every track and close every transport created for this session.
    fn close_local(&mut self) {
        self.reconciler.clear();
        for transport in [self.send_transport.take(), self.recv_transport.take()]
            .into_iter()
            .flatten()
        {
            transport.close();
        }
        self.published.clear();
    }
}

/// Client session controller: one connection, at most one joined room.
pub struct SessionController {
    signaling: SignalingClient,
    notifications: NotificationReceiver,
    device: Arc<dyn MediaDevice>,
    session: Option<ActiveSession>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        signaling: SignalingClient,
        notifications: NotificationReceiver,
        device: Arc<dyn MediaDevice>,
    ) -> Self {
        Self {
            signaling,
            notifications,
            device,
            session: None,
        }
    }

    /// Connect to the room controller at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the WebSocket handshake fails.
    pub async fn connect(url: &str, device: Arc<dyn MediaDevice>) -> Result<Self, ClientError> {
        let (signaling, notifications) = SignalingClient::connect(url).await?;
        Ok(Self::new(signaling, notifications, device))
    }

    /// Run the join sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyJoined`] if a session is active, or the
    /// error of the first failing step after tearing down what was created.
    #[instrument(skip_all, name = "room_client.join", fields(room_id = %room_id))]
    pub async fn join(&mut self, room_id: RoomId, name: &str) -> Result<JoinSummary, ClientError> {
        if self.session.is_some() {
            return Err(ClientError::AlreadyJoined);
        }

        let peer_id = self.signaling.join(&room_id, name).await.map_err(|e| {
            warn!(target: "room_client.controller", error = %e, "Join rejected");
            e
        })?;
        info!(
            target: "room_client.controller",
            room_id = %room_id,
            peer_id = %peer_id,
            name_len = name.len(),
            "Joined room"
        );

        let mut session = ActiveSession::new(room_id, peer_id);
        match self.negotiate(&mut session).await {
            Ok(subscribed) => {
                let summary = JoinSummary {
                    peer_id,
                    published: session.published.clone(),
                    subscribed,
                };
                info!(
                    target: "room_client.controller",
                    peer_id = %peer_id,
                    published = summary.published.len(),
                    subscribed,
                    "Join sequence complete"
                );
                self.session = Some(session);
                Ok(summary)
            }
            Err(e) => {
                warn!(target: "room_client.controller", peer_id = %peer_id, error = %e, "Join sequence failed, tearing down");
                session.close_local();
                if let Err(leave_err) = self.signaling.leave().await {
                    debug!(target: "room_client.controller", error = %leave_err, "Leave after failed join not sent");
                }
                Err(e)
            }
        }
    }

    async fn negotiate(&mut self, session: &mut ActiveSession) -> Result<usize, ClientError> {
        let router_capabilities = self.signaling.get_capabilities().await?;
        let capabilities = self.device.load(&router_capabilities)?;
        session.capabilities = Some(capabilities.clone());
        self.drain_notifications(session).await;

        let send = self.open_transport(TransportDirection::Send).await?;
        session.send_transport = Some(Arc::clone(&send));
        self.drain_notifications(session).await;

        let recv = self.open_transport(TransportDirection::Recv).await?;
        session.recv_transport = Some(Arc::clone(&recv));
        self.drain_notifications(session).await;

        for kind in self.device.local_track_kinds() {
            if !self.device.can_produce(kind) {
                info!(target: "room_client.controller", kind = %kind, "Device cannot produce kind, skipping");
                continue;
            }
            let media_params = send.prepare_produce(kind)?;
            let producer_id = self.signaling.publish(send.id(), kind, media_params).await?;
            session.published.push(PublishedTrack { kind, producer_id });
            info!(target: "room_client.controller", producer_id = %producer_id, kind = %kind, "Published");
            self.drain_notifications(session).await;
        }

        let producers = self.signaling.list_producers().await?;
        let ctx = RecvContext {
            signaling: &self.signaling,
            transport: &recv,
            capabilities: &capabilities,
        };
        let mut subscribed = 0;
        for producer in producers {
            // Already picked up from a newProducer event
            if session.reconciler.is_consuming(&producer.producer_id) {
                continue;
            }
            session.reconciler.subscribe(&ctx, &producer.into()).await?;
            subscribed += 1;
        }
        self.drain_notifications(session).await;

        Ok(subscribed)
    }

    async fn open_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<Arc<dyn LocalTransport>, ClientError> {
        let params = self.signaling.create_transport(direction).await?;
        let transport = self.device.create_transport(direction, &params)?;
        if let Err(e) = self
            .signaling
            .connect_transport(transport.id(), transport.dtls_parameters())
            .await
        {
            transport.close();
            return Err(e);
        }
        debug!(
            target: "room_client.controller",
            transport_id = %transport.id(),
            direction = %direction,
            "Transport connected"
        );
        Ok(transport)
    }

    async fn drain_notifications(&mut self, session: &mut ActiveSession) {
        while let Ok(notification) = self.notifications.try_recv() {
            let event = handle_notification(&self.signaling, session, notification).await;
            debug!(target: "room_client.controller", event = ?event, "Notification handled during join");
        }
    }

    /// Wait for the next notification and handle it.
    ///
    /// Returns `None` once the connection is closed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        let notification = self.notifications.recv().await?;
        let event = match self.session.as_mut() {
            Some(session) => handle_notification(&self.signaling, session, notification).await,
            None => match notification {
                Notification::NewProducer(event) => ClientEvent::Dropped {
                    producer_id: event.producer_id,
                    reason: DropReason::NotReady,
                },
                Notification::ProducerClosed(event) => ClientEvent::ProducerClosed {
                    producer_id: event.producer_id,
                    consumers_removed: 0,
                },
            },
        };
        Some(event)
    }

    /// Handle notifications until the connection closes.
    pub async fn run(&mut self) {
        while let Some(event) = self.next_event().await {
            debug!(target: "room_client.controller", event = ?event, "Notification handled");
        }
        info!(target: "room_client.controller", "Connection closed");
    }

    /// Leave the room: send `leave`, close every consumer and transport and
    /// clear the remote streams. Idempotent.
    pub async fn leave(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(e) = self.signaling.leave().await {
            debug!(target: "room_client.controller", error = %e, "Leave not sent");
        }
        session.close_local();
        info!(
            target: "room_client.controller",
            room_id = %session.room_id,
            peer_id = %session.peer_id,
            "Left room"
        );
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        self.session.as_ref().map(|s| s.peer_id)
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        self.session.as_ref().map(|s| &s.room_id)
    }

    #[must_use]
    pub fn published(&self) -> &[PublishedTrack] {
        self.session
            .as_ref()
            .map_or(&[][..], |s| s.published.as_slice())
    }

    #[must_use]
    pub fn remote_streams(&self) -> Option<&RemoteStreams> {
        self.session.as_ref().map(|s| s.reconciler.streams())
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |s| s.reconciler.consumer_count())
    }

    #[must_use]
    pub fn is_consuming(&self, producer_id: &ProducerId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.reconciler.is_consuming(producer_id))
    }

    /// Whether the server closed the connection.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.signaling.is_closed()
    }
}

async fn handle_notification(
    signaling: &SignalingClient,
    session: &mut ActiveSession,
    notification: Notification,
) -> ClientEvent {
    match notification {
        Notification::NewProducer(event) => {
            let producer_id = event.producer_id;
            let ctx = match (&session.recv_transport, &session.capabilities) {
                (Some(transport), Some(capabilities)) => Some(RecvContext {
                    signaling,
                    transport,
                    capabilities,
                }),
                _ => None,
            };
            match session.reconciler.on_new_producer(ctx, event).await {
                Ok(Reaction::Subscribed(consumer_id)) => ClientEvent::Subscribed {
                    producer_id,
                    consumer_id,
                },
                Ok(Reaction::Dropped(reason)) => ClientEvent::Dropped {
                    producer_id,
                    reason,
                },
                Err(e) => {
                    warn!(target: "room_client.controller", producer_id = %producer_id, error = %e, "Subscribe to new producer failed");
                    ClientEvent::SubscribeFailed {
                        producer_id,
                        error: e.to_string(),
                    }
                }
            }
        }
        Notification::ProducerClosed(event) => ClientEvent::ProducerClosed {
            producer_id: event.producer_id,
            consumers_removed: session.reconciler.on_producer_closed(&event.producer_id),
        },
    }
}
