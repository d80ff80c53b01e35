//! Room Controller
//!
//! Signaling server for Conclave rooms.
//!
//! # Servers
//!
//! One HTTP listener (default: 0.0.0.0:3001) serves:
//! - `/ws` for client signaling
//! - `/health` and `/ready` probes
//! - `/metrics` for Prometheus
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Create the media engine
//! 4. Initialize actor system (`RoomRegistryHandle`)
//! 5. Bind the listener and start serving
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use room_controller::actors::{ActorMetrics, RoomRegistryHandle, RoomSettings};
use room_controller::config::Config;
use room_controller::engine::{EngineSettings, MediaEngine, SimulatedEngine};
use room_controller::observability::{init_metrics_recorder, HealthState};
use room_controller::ws::{build_router, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for each room actor.
const ROOM_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// How long shutdown waits for open connections to close.
const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        rc_id = %config.rc_id,
        bind_address = %config.bind_address,
        listen_ip = %config.listen_ip,
        announced_ip = ?config.announced_ip,
        rtc_min_port = config.rtc_min_port,
        rtc_max_port = config.rtc_max_port,
        reap_empty_rooms = config.reap_empty_rooms,
        notification_buffer = config.notification_buffer,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let engine: Arc<dyn MediaEngine> = Arc::new(SimulatedEngine::new(EngineSettings::default()));
    info!("Simulated media engine created");

    let actor_metrics = ActorMetrics::new();
    let registry = RoomRegistryHandle::new(
        config.rc_id.clone(),
        RoomSettings::from_config(&config),
        engine,
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let app = build_router(AppState {
        registry: registry.clone(),
        metrics: actor_metrics,
        config: Arc::new(config),
        health: Arc::clone(&health_state),
        prometheus: Some(prometheus_handle),
    });

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        format!("Failed to bind listener to {addr}: {e}")
    })?;
    info!(addr = %addr, "Listener bound successfully");

    let server_token = registry.child_token();
    let server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!(addr = %addr, "Room Controller running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop advertising readiness before closing rooms
    health_state.begin_draining();

    // Cancels rooms, sessions and the HTTP server
    if let Err(e) = registry.shutdown(ROOM_SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
        registry.cancel();
    }

    if tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, server)
        .await
        .is_err()
    {
        warn!("HTTP server did not stop in time");
    }

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
