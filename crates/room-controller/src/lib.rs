//! Room Controller (RC) Service Library
//!
//! This library provides the core functionality of the Conclave Room
//! Controller, the signaling server of a selective forwarding setup:
//!
//! - Room and peer lifecycle, created lazily on first join
//! - Producer/consumer bookkeeping against an injected media engine
//! - The negotiation protocol over one WebSocket per client
//! - Cleanup of everything a peer owned on leave or disconnect
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── RoomActor (one per live room) ── MediaEngine (shared collaborator)
//!
//! PeerSession (one per WebSocket) ──requests──> RoomActor
//!             <──acks + notifications── outbound queue
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and session actors
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Media engine collaborator trait and the simulated engine
//! - [`errors`] - Error types with categories and client messages
//! - [`observability`] - Health probes and Prometheus metrics
//! - [`ws`] - WebSocket adapter and HTTP router

#![warn(clippy::pedantic)]

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod ws;
