//! Liveness and readiness probes.
//!
//! - `GET /health` answers `{"ok":true}` while the process runs.
//! - `GET /ready` answers 200 once the listener is bound and the room
//!   registry is running. It answers 503 before that and while draining.
//!
//! `/metrics` is mounted separately by the router.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Probe state shared between `main`, the probes and the WebSocket upgrade.
#[derive(Debug, Default)]
pub struct HealthState {
    started: AtomicBool,
    draining: AtomicBool,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener bound and registry running.
    pub fn set_ready(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Shutdown began: stop advertising readiness and refuse new sessions.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.is_draining()
    }
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let status = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({ "ready": state.is_ready(), "draining": state.is_draining() })),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("body should be JSON")
        };
        (status, value)
    }

    #[test]
    fn test_ready_only_between_start_and_drain() {
        let state = HealthState::new();
        assert!(!state.is_ready());

        state.set_ready();
        assert!(state.is_ready());

        state.begin_draining();
        assert!(!state.is_ready());
        assert!(state.is_draining());

        // Draining is terminal
        state.set_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_answers_ok_regardless_of_readiness() {
        let state = Arc::new(HealthState::new());
        state.begin_draining();

        let (status, body) = get_json(health_router(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_readiness_follows_lifecycle() {
        let state = Arc::new(HealthState::new());

        let (status, body) = get_json(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "ready": false, "draining": false }));

        state.set_ready();
        let (status, _) = get_json(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(status, StatusCode::OK);

        state.begin_draining();
        let (status, body) = get_json(health_router(state), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "ready": false, "draining": true }));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _) = get_json(health_router(Arc::new(HealthState::new())), "/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
