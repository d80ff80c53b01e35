//! Room client library.
//!
//! Client side of the Conclave signaling protocol:
//!
//! - [`signaling`] - Correlated request/ack client over one WebSocket
//! - [`controller`] - Join sequence, leave and notification handling
//! - [`reconciler`] - Keeps consumers in line with the room's producers
//! - [`remote`] - Per-peer remote stream bundles
//! - [`device`] - Media device abstraction and the simulated device
//! - [`config`] - Demo binary configuration
//! - [`errors`] - Client error type

#![warn(clippy::pedantic)]

pub mod config;
pub mod controller;
pub mod device;
pub mod errors;
pub mod reconciler;
pub mod remote;
pub mod signaling;

pub use controller::{ClientEvent, JoinSummary, PublishedTrack, SessionController};
pub use device::{LocalTransport, MediaDevice, MediaTrack, SimulatedDevice};
pub use errors::ClientError;
pub use reconciler::{DropReason, Reaction, RecvContext, SubscriptionReconciler};
pub use remote::{RemoteStream, RemoteStreams, RemoteTrack};
pub use signaling::{NotificationReceiver, SignalingClient};
