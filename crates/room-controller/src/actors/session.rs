//! `PeerSession` - per-connection signaling session.
//!
//! Each `PeerSession`:
//! - Handles exactly one client connection and at most one room membership
//! - Decodes request frames one at a time and answers each with an ack
//! - Forwards room operations to its `RoomActor`
//! - Shares its outbound queue with the room, so acks and notifications
//!   reach the client in the order they were produced
//!
//! # Lifecycle
//!
//! ```text
//! Unjoined --join--> Joined --createTransport--> Negotiating --connectTransport--> Active
//!     \                 \                             \                              /
//!      +-----------------+------ leave / disconnect ---+----------------------------+--> Left
//! ```
//!
//! `Left` is terminal and reached exactly once; the peer is removed from its
//! room on the way in.

use crate::errors::RcError;
use crate::observability;

use super::messages::OutboundSender;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::RoomRegistryHandle;
use super::room::RoomActorHandle;

use common::types::PeerId;
use serde::Serialize;
use signaling_protocol::{
    decode_request, CapabilitiesResponse, DecodeError, JoinRequest, JoinResponse, ProducerList,
    ProtocolError, PublishResponse, Request, Response, ServerMessage, TransportCreated,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How often a join is retried when the room is reaped underneath it.
const JOIN_ATTEMPTS: usize = 3;

/// Metric label for frames that did not decode into a known request.
const INVALID_METHOD: &str = "invalid";

/// Server-side state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined,
    /// At least one transport created, none connected yet.
    Negotiating,
    /// At least one transport connected.
    Active,
    Left,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unjoined => "unjoined",
            SessionState::Joined => "joined",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Left => "left",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the session keeps reading after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One client connection's session.
pub struct PeerSession {
    peer_id: PeerId,
    state: SessionState,
    room: Option<RoomActorHandle>,
    registry: RoomRegistryHandle,
    outbound: OutboundSender,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl PeerSession {
    /// Create a session with a fresh peer id.
    ///
    /// `cancel_token` should be a child of the registry token so server
    /// shutdown ends the session.
    #[must_use]
    pub fn new(
        registry: RoomRegistryHandle,
        outbound: OutboundSender,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let peer_id = PeerId::new();
        Self {
            peer_id,
            state: SessionState::Unjoined,
            room: None,
            registry,
            outbound,
            cancel_token,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Session, peer_id.to_string()),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Read frames from `inbound` until the client leaves, the connection
    /// closes or the session is cancelled, then remove the peer.
    #[instrument(skip_all, name = "rc.session", fields(peer_id = %self.peer_id))]
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        self.metrics.session_opened();
        info!(target: "rc.session", peer_id = %self.peer_id, "Session opened");

        let reason = loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break "shutdown",

                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        break "disconnect";
                    };
                    self.mailbox.record_enqueue();
                    let flow = self.handle_frame(&frame).await;
                    self.mailbox.record_dequeue();
                    if flow == Flow::Close {
                        break "leave";
                    }
                }
            }
        };

        // No-op after an explicit leave
        self.terminate(reason).await;
        self.metrics.session_closed();

        info!(
            target: "rc.session",
            peer_id = %self.peer_id,
            reason,
            frames = self.mailbox.messages_processed(),
            "Session closed"
        );
    }

    async fn handle_frame(&mut self, frame: &str) -> Flow {
        let started = Instant::now();

        let envelope = match decode_request(frame) {
            Ok(envelope) => envelope,
            Err(DecodeError {
                id: Some(id),
                error: error @ ProtocolError::UnknownId { method, .. },
            }) => {
                // Answered as the lookup miss it would be for an issued id
                let e = match self.room() {
                    Ok(_) => RcError::from(error),
                    Err(e) => e,
                };
                debug!(
                    target: "rc.session",
                    peer_id = %self.peer_id,
                    method = method.as_str(),
                    error = %e,
                    error_code = e.error_code(),
                    "Request failed"
                );
                observability::record_request(method.as_str(), e.error_code(), started.elapsed());
                return self
                    .send_ack(Response::failure(id, e.client_message()))
                    .await;
            }
            Err(DecodeError { id: Some(id), error }) => {
                debug!(
                    target: "rc.session",
                    peer_id = %self.peer_id,
                    request_id = id,
                    error = %error,
                    "Rejecting undecodable request"
                );
                observability::record_request(INVALID_METHOD, "validation", started.elapsed());
                return self
                    .send_ack(Response::failure(id, error.to_string()))
                    .await;
            }
            Err(DecodeError { id: None, error }) => {
                warn!(
                    target: "rc.session",
                    peer_id = %self.peer_id,
                    error = %error,
                    "Dropping frame without request id"
                );
                return Flow::Continue;
            }
        };

        let id = envelope.id;
        let method = envelope.request.method();

        if matches!(envelope.request, Request::Leave) {
            self.terminate("leave").await;
            observability::record_request(method.as_str(), "ok", started.elapsed());
            return Flow::Close;
        }

        let (response, outcome) = match self.dispatch(id, envelope.request).await {
            Ok(response) => (response, "ok"),
            Err(e) => {
                debug!(
                    target: "rc.session",
                    peer_id = %self.peer_id,
                    method = method.as_str(),
                    error = %e,
                    error_code = e.error_code(),
                    "Request failed"
                );
                (Response::failure(id, e.client_message()), e.error_code())
            }
        };
        observability::record_request(method.as_str(), outcome, started.elapsed());

        self.send_ack(response).await
    }

    async fn dispatch(&mut self, id: u64, request: Request) -> Result<Response, RcError> {
        match request {
            Request::Join(join) => {
                let joined = self.join(join).await?;
                ack(id, &joined)
            }

            Request::GetCapabilities => {
                let capabilities = self.room()?.capabilities().clone();
                ack(id, &CapabilitiesResponse { capabilities })
            }

            Request::CreateTransport(req) => {
                let transport_params = self
                    .room()?
                    .create_transport(self.peer_id, req.direction)
                    .await?;
                if self.state == SessionState::Joined {
                    self.transition(SessionState::Negotiating);
                }
                ack(id, &TransportCreated { transport_params })
            }

            Request::ConnectTransport(req) => {
                self.room()?
                    .connect_transport(self.peer_id, req.transport_id, req.dtls_params)
                    .await?;
                self.transition(SessionState::Active);
                Ok(Response::empty(id))
            }

            Request::Publish(req) => {
                let producer_id = self
                    .room()?
                    .publish(self.peer_id, req.transport_id, req.kind, req.media_params)
                    .await?;
                ack(id, &PublishResponse { producer_id })
            }

            Request::ListProducers => {
                let producers = self.room()?.list_producers(self.peer_id).await?;
                ack(id, &ProducerList { producers })
            }

            Request::Subscribe(req) => {
                let consumer = self
                    .room()?
                    .subscribe(self.peer_id, req.producer_id, req.capabilities)
                    .await?;
                ack(id, &consumer)
            }

            // Handled before dispatch; never acked
            Request::Leave => Err(RcError::Internal("leave dispatched".to_string())),
        }
    }

    async fn join(&mut self, join: JoinRequest) -> Result<JoinResponse, RcError> {
        if self.room.is_some() {
            return Err(RcError::AlreadyJoined);
        }

        for attempt in 1..=JOIN_ATTEMPTS {
            let room = self.registry.ensure_room(join.room_id.clone()).await?;
            match room
                .join(self.peer_id, join.name.clone(), self.outbound.clone())
                .await
            {
                Ok(()) => {
                    info!(
                        target: "rc.session",
                        peer_id = %self.peer_id,
                        room_id = %join.room_id,
                        "Joined room"
                    );
                    self.room = Some(room);
                    self.transition(SessionState::Joined);
                    return Ok(JoinResponse {
                        peer_id: self.peer_id,
                    });
                }
                Err(RcError::RoomClosed) => {
                    debug!(
                        target: "rc.session",
                        peer_id = %self.peer_id,
                        room_id = %join.room_id,
                        attempt,
                        "Room was reaped during join, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(RcError::RoomClosed)
    }

    /// Enter `Left`: remove the peer from its room. Safe to call repeatedly.
    async fn terminate(&mut self, reason: &'static str) {
        if self.state == SessionState::Left {
            return;
        }
        self.transition(SessionState::Left);

        let Some(room) = self.room.take() else {
            return;
        };
        match room.remove_peer(self.peer_id).await {
            Ok(removed) => {
                info!(
                    target: "rc.session",
                    peer_id = %self.peer_id,
                    room_id = %room.room_id(),
                    reason,
                    removed,
                    "Left room"
                );
            }
            Err(e) => {
                // Room already stopped, nothing left to clean up
                debug!(
                    target: "rc.session",
                    peer_id = %self.peer_id,
                    room_id = %room.room_id(),
                    error = %e,
                    "Room gone before leave"
                );
            }
        }
    }

    fn room(&self) -> Result<&RoomActorHandle, RcError> {
        self.room.as_ref().ok_or(RcError::NotInRoom)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                target: "rc.session",
                peer_id = %self.peer_id,
                from = %self.state,
                to = %next,
                "Session state changed"
            );
            self.state = next;
        }
    }

    async fn send_ack(&self, response: Response) -> Flow {
        match self.outbound.send(ServerMessage::Response(response)).await {
            Ok(()) => Flow::Continue,
            Err(_) => {
                debug!(
                    target: "rc.session",
                    peer_id = %self.peer_id,
                    "Outbound queue closed, ending session"
                );
                Flow::Close
            }
        }
    }
}

fn ack(id: u64, payload: &impl Serialize) -> Result<Response, RcError> {
    Response::success(id, payload).map_err(|e| RcError::Internal(e.to_string()))
}
