//! WebSocket adapter and HTTP router.
//!
//! Each upgraded socket becomes one [`PeerSession`]. The socket is split:
//! a reader task forwards text frames into the session, and a writer task
//! drains the connection's outbound queue (acks and notifications) onto the
//! socket. The writer closes the socket once the session and its room both
//! dropped their queue handles.

use crate::actors::{ActorMetrics, PeerSession, RoomRegistryHandle};
use crate::config::Config;
use crate::observability::{health_router, HealthState};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use signaling_protocol::{encode_server_message, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Frames read from the socket but not yet handled by the session.
const INBOUND_BUFFER: usize = 32;

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistryHandle,
    pub metrics: Arc<ActorMetrics>,
    pub config: Arc<Config>,
    pub health: Arc<HealthState>,
    /// Serves `/metrics` when set.
    pub prometheus: Option<PrometheusHandle>,
}

/// Build the full router: `/ws`, `/health`, `/ready` and, with a Prometheus
/// handle, `/metrics`.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state.clone())
        .merge(health_router(Arc::clone(&state.health)));

    if let Some(handle) = state.prometheus {
        router = router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    router.layer(TraceLayer::new_for_http())
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.health.is_draining() {
        debug!(target: "rc.ws", "Refusing WebSocket upgrade while draining");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerMessage>(state.config.notification_buffer);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

    let session = PeerSession::new(
        state.registry.clone(),
        outbound_tx,
        Arc::clone(&state.metrics),
        state.registry.child_token(),
    );
    let peer_id = session.peer_id();
    info!(target: "rc.ws", peer_id = %peer_id, "WebSocket connection established");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match encode_server_message(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "rc.ws", peer_id = %peer_id, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!(target: "rc.ws", peer_id = %peer_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_)) => {
                    debug!(target: "rc.ws", peer_id = %peer_id, "Ignoring binary frame");
                }
                // Ping/pong answered by axum
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "rc.ws", peer_id = %peer_id, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    });

    session.run(inbound_rx).await;

    reader.abort();
    let _ = writer.await;

    info!(target: "rc.ws", peer_id = %peer_id, "WebSocket connection closed");
}
