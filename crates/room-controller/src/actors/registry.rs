//! `RoomRegistryActor` - singleton supervisor for room actors.
//!
//! The `RoomRegistryActor` is the top-level actor of the room controller:
//!
//! - Singleton per controller instance
//! - Maps room ids to live `RoomActor`s, creating them on first join
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! A room that reaped itself stays in the map until the next health sweep,
//! but its handle reports `is_closed()`; `EnsureRoom` replaces such rooms
//! instead of handing them out.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the registry:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all rooms and sessions)
//! 3. Waits up to the shutdown deadline for each room actor to stop

use crate::engine::MediaEngine;
use crate::errors::RcError;

use super::messages::{RegistryMessage, RegistryStatus, RoomInfo};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomSettings};

use common::types::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each room when no deadline was requested.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Handle to the `RoomRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    ///
    /// # Arguments
    ///
    /// * `rc_id` - Controller instance ID, used in logs
    /// * `settings` - Settings handed to every room
    /// * `engine` - Media engine shared by all rooms
    /// * `metrics` - Shared actor metrics
    #[must_use]
    pub fn new(
        rc_id: String,
        settings: RoomSettings,
        engine: Arc<dyn MediaEngine>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(
            rc_id,
            receiver,
            cancel_token.clone(),
            settings,
            engine,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Get the live room for `room_id`, creating it if it does not exist.
    pub async fn ensure_room(&self, room_id: RoomId) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::EnsureRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get information about a registered room.
    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomInfo, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current registry status.
    pub async fn get_status(&self) -> Result<RegistryStatus, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// `deadline` bounds how long the registry waits for each room actor.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning sessions.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    /// Room creation timestamp.
    created_at: i64,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    rc_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    settings: RoomSettings,
    engine: Arc<dyn MediaEngine>,
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Whether the registry still creates rooms.
    accepting_new: bool,
    shutdown_deadline: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    fn new(
        rc_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        settings: RoomSettings,
        engine: Arc<dyn MediaEngine>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &rc_id);

        Self {
            rc_id,
            receiver,
            cancel_token,
            settings,
            engine,
            rooms: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.registry", fields(rc_id = %self.rc_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.registry",
            rc_id = %self.rc_id,
            "RoomRegistryActor started"
        );

        loop {
            // Sweep room actors that stopped since the last message
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.registry",
                        rc_id = %self.rc_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
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
                                target: "rc.actor.registry",
                                rc_id = %self.rc_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.registry",
            rc_id = %self.rc_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::EnsureRoom {
                room_id,
                respond_to,
            } => {
                let result = self.ensure_room(room_id).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_room(&room_id).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    /// Return the live room for `room_id`, spawning a new actor if the room
    /// does not exist or was reaped.
    async fn ensure_room(&mut self, room_id: RoomId) -> Result<RoomActorHandle, RcError> {
        if !self.accepting_new {
            return Err(RcError::Draining);
        }

        let reaped = match self.rooms.get(&room_id) {
            Some(managed) if !managed.handle.is_closed() => {
                return Ok(managed.handle.clone());
            }
            Some(_) => true,
            None => false,
        };
        if reaped {
            // Its task is finishing on its own
            self.rooms.remove(&room_id);
            self.metrics.room_removed();
            debug!(
                target: "rc.actor.registry",
                rc_id = %self.rc_id,
                room_id = %room_id,
                "Replacing reaped room"
            );
        }

        let capabilities = self.engine.room_capabilities().await?;
        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            capabilities,
            Arc::clone(&self.engine),
            self.settings.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.room_created();

        info!(
            target: "rc.actor.registry",
            rc_id = %self.rc_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    /// Get information about a room.
    ///
    /// Queries the `RoomActor` for the actual peer and producer counts.
    async fn get_room(&self, room_id: &RoomId) -> Result<RoomInfo, RcError> {
        let managed = self.rooms.get(room_id).ok_or(RcError::RoomNotFound)?;
        let state = managed.handle.get_state().await.map_err(|e| match e {
            // Reaped but not yet swept
            RcError::RoomClosed => RcError::RoomNotFound,
            other => other,
        })?;

        Ok(RoomInfo {
            room_id: room_id.clone(),
            peer_count: state.peers.len(),
            producer_count: state.producers.len(),
            created_at: managed.created_at,
        })
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            peer_count: self.metrics.peer_count(),
            session_count: self.metrics.session_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Initiate graceful shutdown.
    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), RcError> {
        info!(
            target: "rc.actor.registry",
            rc_id = %self.rc_id,
            room_count = self.rooms.len(),
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;

        // Propagates to every room and session
        self.cancel_token.cancel();

        Ok(())
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.registry",
            rc_id = %self.rc_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(self.shutdown_deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.registry",
                        rc_id = %self.rc_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.registry",
                        rc_id = %self.rc_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.registry",
                        rc_id = %self.rc_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "rc.actor.registry",
            rc_id = %self.rc_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop room actors whose task finished, recording panics.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "rc.actor.registry",
                        rc_id = %self.rc_id,
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "rc.actor.registry",
                            rc_id = %self.rc_id,
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}
