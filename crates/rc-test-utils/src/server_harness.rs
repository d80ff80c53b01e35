//! Test server harness for E2E testing
//!
//! Provides `TestRcServer` for spawning real Room Controller instances in tests.

use room_controller::actors::{ActorMetrics, RoomRegistryHandle, RoomSettings};
use room_controller::config::Config;
use room_controller::engine::{MediaEngine, SimulatedEngine};
use room_controller::observability::HealthState;
use room_controller::ws::{build_router, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the Room Controller server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestRcServer::spawn().await?;
///     let (client, _notifications) = SignalingClient::connect(&server.ws_url()).await?;
///
///     let peer_id = client.join(&"r1".into(), "alice").await?;
///     Ok(())
/// }
/// ```
pub struct TestRcServer {
    addr: SocketAddr,
    registry: RoomRegistryHandle,
    metrics: Arc<ActorMetrics>,
    health: Arc<HealthState>,
    _handle: JoinHandle<()>,
}

impl TestRcServer {
    /// Spawn a server backed by the simulated engine.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_engine(Arc::new(SimulatedEngine::default())).await
    }

    /// Spawn a server backed by `engine`.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    /// - Report ready on `/ready`
    pub async fn spawn_with_engine(engine: Arc<dyn MediaEngine>) -> Result<Self, anyhow::Error> {
        let vars = HashMap::from([
            ("RC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("RC_ID".to_string(), "rc-test".to_string()),
        ]);
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            config.rc_id.clone(),
            RoomSettings::from_config(&config),
            engine,
            Arc::clone(&metrics),
        );
        let health = Arc::new(HealthState::new());

        let app = build_router(AppState {
            registry: registry.clone(),
            metrics: Arc::clone(&metrics),
            config: Arc::new(config),
            health: Arc::clone(&health),
            prometheus: None,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });
        health.set_ready();

        Ok(Self {
            addr,
            registry,
            metrics,
            health,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the signaling WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }
}

impl Drop for TestRcServer {
    fn drop(&mut self) {
        // Abort the HTTP server and stop every room and session
        self._handle.abort();
        self.registry.cancel();
    }
}
