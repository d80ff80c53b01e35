//! Room Client
//!
//! Demo client: joins a room with a simulated media device, subscribes to
//! everything the other peers publish and leaves on Ctrl+C.

#![warn(clippy::pedantic)]

use std::sync::Arc;

use common::types::RoomId;
use room_client::config::ClientConfig;
use room_client::{ClientEvent, SessionController, SimulatedDevice};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    info!(server_url = %config.server_url, room_id = %config.room_id, "Starting Room Client");

    let mut controller =
        SessionController::connect(&config.server_url, Arc::new(SimulatedDevice::new()))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect");
                e
            })?;

    let summary = controller
        .join(RoomId::new(config.room_id.clone()), &config.display_name)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to join room");
            e
        })?;
    info!(
        peer_id = %summary.peer_id,
        published = summary.published.len(),
        subscribed = summary.subscribed,
        "Joined, press Ctrl+C to leave"
    );

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = controller.next_event() => match event {
                Some(ClientEvent::Subscribed { producer_id, consumer_id }) => {
                    info!(producer_id = %producer_id, consumer_id = %consumer_id, "Subscribed to new producer");
                }
                Some(ClientEvent::ProducerClosed { producer_id, consumers_removed }) => {
                    info!(producer_id = %producer_id, consumers_removed, "Producer closed");
                }
                Some(event) => info!(event = ?event, "Notification"),
                None => {
                    info!("Server closed the connection");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                let remote_peers = controller
                    .remote_streams()
                    .map_or(0, room_client::RemoteStreams::len);
                info!(remote_peers, "Ctrl+C received, leaving");
                controller.leave().await;
                break;
            }
        }
    }

    info!("Room Client stopped");
    Ok(())
}
