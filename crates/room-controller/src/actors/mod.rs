//! Actor model implementation for the Room Controller.
//!
//! ```text
//! RoomRegistryActor (singleton per controller instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         ├── owns the peer and producer maps
//!         └── pushes notifications to the outbound queue of each joined PeerSession
//!
//! PeerSession (one task per client connection)
//! └── forwards requests to the RoomActor it joined
//! ```
//!
//! # Key Design Decisions
//!
//! - **One room per connection**: a session joins at most one room
//! - **CancellationToken propagation**: the registry's root token reaches every room and session
//! - **Mailbox monitoring**: depth thresholds with metrics (Room: 100/500, Session: 50/200)
//! - **Message passing**: all inter-actor communication via `tokio::sync::mpsc` channels
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` singleton that creates and supervises rooms
//! - [`room`] - `RoomActor` per live room, owns room state
//! - [`session`] - `PeerSession` per client connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod session;

pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle, RoomSettings};
pub use session::{PeerSession, SessionState};
