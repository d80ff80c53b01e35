//! Observability for the Room Controller.
//!
//! # Privacy by Default
//!
//! All instrumentation uses `#[instrument(skip_all)]` and explicit field
//! allow-listing. Display names are never logged or used as labels; only
//! their length is.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_connections_active` | Gauge | none | Open signaling connections |
//! | `rc_rooms_active` | Gauge | none | Live room actors |
//! | `rc_requests_total` | Counter | `method`, `outcome` | Handled requests |
//! | `rc_request_latency_seconds` | Histogram | `method` | Request handling latency |
//! | `rc_notifications_dropped_total` | Counter | `method` | Notifications lost to full outbound queues |
//! | `rc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator per actor type |
//! | `rc_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_notification_dropped, record_request,
    set_actor_mailbox_depth, set_connections_active, set_rooms_active,
};
