//! Correlated signaling client.
//!
//! Requests are written as text frames carrying a monotonic id. One reader
//! task owns the incoming side of the connection: acks are routed to the
//! waiting caller by id, notifications are queued on a separate channel so
//! they can be handled while requests are in flight.
//!
//! There are no request timeouts. A request stays pending until its ack
//! arrives or the connection closes, in which case it fails with
//! [`ClientError::ConnectionClosed`].

use crate::errors::ClientError;
use common::types::{PeerId, ProducerId, RoomId, TransportId};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use signaling_protocol::{
    decode_server_message, encode_request, Capabilities, CapabilitiesResponse,
    ConnectTransportRequest, ConsumerParams, CreateTransportRequest, DtlsParameters, JoinRequest,
    JoinResponse, MediaKind, MediaParameters, Notification, ProducerInfo, ProducerList,
    ProtocolError, PublishRequest, PublishResponse, Request, Response, ServerMessage,
    SubscribeRequest, TransportCreated, TransportDirection, TransportParams,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Outgoing frames not yet written to the socket.
const OUTGOING_BUFFER: usize = 64;

/// Incoming frames not yet routed.
const INCOMING_BUFFER: usize = 256;

/// Server notifications in arrival order.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

#[derive(Debug, Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Response>>,
}

/// Client side of one signaling connection.
#[derive(Debug)]
pub struct SignalingClient {
    outgoing: mpsc::Sender<String>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    router: JoinHandle<()>,
}

impl SignalingClient {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<(Self, NotificationReceiver), ClientError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        debug!(target: "room_client.signaling", url = %url, "WebSocket connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(OUTGOING_BUFFER);
        let (incoming_tx, incoming_rx) = mpsc::channel::<String>(INCOMING_BUFFER);

        // Closes the socket once the client is dropped
        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(target: "room_client.signaling", error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(target: "room_client.signaling", error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self::from_channels(outgoing_tx, incoming_rx))
    }

    /// Build a client over an already established frame channel.
    ///
    /// `outgoing` receives encoded request frames; `incoming` yields the
    /// server's frames. The connection counts as closed once `incoming`
    /// ends.
    #[must_use]
    pub fn from_channels(
        outgoing: mpsc::Sender<String>,
        incoming: mpsc::Receiver<String>,
    ) -> (Self, NotificationReceiver) {
        let pending = Arc::new(Mutex::new(Pending::default()));
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();

        let router = tokio::spawn(route_incoming(
            incoming,
            Arc::clone(&pending),
            notification_tx,
        ));

        (
            Self {
                outgoing,
                pending,
                next_id: AtomicU64::new(1),
                router,
            },
            notification_rx,
        )
    }

    /// Whether the server side of the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Join `room_id` under `name`; returns the server-issued peer id.
    pub async fn join(&self, room_id: &RoomId, name: &str) -> Result<PeerId, ClientError> {
        let response: JoinResponse = self
            .request(Request::Join(JoinRequest {
                room_id: room_id.clone(),
                name: name.to_string(),
            }))
            .await?;
        Ok(response.peer_id)
    }

    /// Router capabilities of the joined room.
    pub async fn get_capabilities(&self) -> Result<Capabilities, ClientError> {
        let response: CapabilitiesResponse = self.request(Request::GetCapabilities).await?;
        Ok(response.capabilities)
    }

    pub async fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<TransportParams, ClientError> {
        let response: TransportCreated = self
            .request(Request::CreateTransport(CreateTransportRequest { direction }))
            .await?;
        Ok(response.transport_params)
    }

    pub async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_params: DtlsParameters,
    ) -> Result<(), ClientError> {
        self.request(Request::ConnectTransport(ConnectTransportRequest {
            transport_id,
            dtls_params,
        }))
        .await
    }

    pub async fn publish(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        media_params: MediaParameters,
    ) -> Result<ProducerId, ClientError> {
        let response: PublishResponse = self
            .request(Request::Publish(PublishRequest {
                transport_id,
                kind,
                media_params,
            }))
            .await?;
        Ok(response.producer_id)
    }

    /// Producers of the other peers in the room.
    pub async fn list_producers(&self) -> Result<Vec<ProducerInfo>, ClientError> {
        let response: ProducerList = self.request(Request::ListProducers).await?;
        Ok(response.producers)
    }

    pub async fn subscribe(
        &self,
        producer_id: ProducerId,
        capabilities: Capabilities,
    ) -> Result<ConsumerParams, ClientError> {
        self.request(Request::Subscribe(SubscribeRequest {
            producer_id,
            capabilities,
        }))
        .await
    }

    /// Send `leave`. The server never acks it, so this only waits for the
    /// frame to be queued.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_request(id, &Request::Leave)?;
        self.outgoing
            .send(frame)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    async fn request<T: DeserializeOwned>(&self, request: Request) -> Result<T, ClientError> {
        let method = request.method().as_str();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_request(id, &request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(ClientError::ConnectionClosed);
            }
            pending.waiters.insert(id, tx);
        }

        if self.outgoing.send(frame).await.is_err() {
            self.pending.lock().waiters.remove(&id);
            return Err(ClientError::ConnectionClosed);
        }
        debug!(target: "room_client.signaling", id, method, "Request sent");

        let response = rx.await.map_err(|_| ClientError::ConnectionClosed)?;
        response.into_payload().map_err(|e| match e {
            ProtocolError::Rejected(message) => ClientError::Rejected { method, message },
            other => ClientError::Protocol(other),
        })
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

async fn route_incoming(
    mut incoming: mpsc::Receiver<String>,
    pending: Arc<Mutex<Pending>>,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    while let Some(frame) = incoming.recv().await {
        match decode_server_message(&frame) {
            Ok(ServerMessage::Response(response)) => {
                let waiter = pending.lock().waiters.remove(&response.id);
                match waiter {
                    Some(waiter) => {
                        // Caller gave up on the request
                        let _ = waiter.send(response);
                    }
                    None => {
                        warn!(target: "room_client.signaling", id = response.id, "Ack for unknown request");
                    }
                }
            }
            Ok(ServerMessage::Notification(notification)) => {
                debug!(target: "room_client.signaling", method = notification.method(), "Notification received");
                if notifications.send(notification).is_err() {
                    debug!(target: "room_client.signaling", "Notification receiver dropped");
                }
            }
            Err(e) => {
                warn!(target: "room_client.signaling", error = %e, "Dropping undecodable frame");
            }
        }
    }

    // Dropping the waiters fails every pending request
    let mut pending = pending.lock();
    pending.closed = true;
    pending.waiters.clear();
    debug!(target: "room_client.signaling", "Connection closed");
}
