//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller and the room client.
//!
//! ## Modules
//!
//! - `mock_engine` - Media engine double with failure injection and call counters
//! - `fixtures` - Capability descriptors, media parameters and test peers
//! - `in_memory` - Client/session pairs connected over channels
//! - `server_harness` - Real router served on an ephemeral port
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = Arc::new(MockEngine::builder().reject_produce().build());
//!     let rig = TestRig::new(engine.clone());
//!
//!     let alice = rig.connect();
//!     let peer_id = alice.client.join(&"r1".into(), "alice").await.unwrap();
//!
//!     // Run your test...
//! }
//! ```

pub mod fixtures;
pub mod in_memory;
pub mod mock_engine;
pub mod server_harness;

pub use fixtures::*;
pub use in_memory::*;
pub use mock_engine::*;
pub use server_harness::*;
