//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 8 request kinds plus `invalid` for undecodable requests
//! - `outcome`: `ok` plus the 5 error categories of `RcError::error_code`
//! - `notification`: 2 values (newProducer, producerClosed)
//! - `actor_type`: 3 values (registry, room, session)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Request latency buckets - dominated by engine calls
        .set_buckets_for_metric(
            Matcher::Prefix("rc_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set request latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Room Metrics (Gauges)
// ============================================================================

/// Set the number of open signaling connections.
///
/// Metric: `rc_connections_active`
/// Labels: none
pub fn set_connections_active(count: u64) {
    // u64 to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_connections_active").set(count as f64);
}

/// Set the number of live rooms.
///
/// Metric: `rc_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: u64) {
    // u64 to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rc_actor_mailbox_depth`
/// Labels: `actor_type` (registry, room, session)
///
/// High values indicate the actor is falling behind in message processing.
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    // usize to f64 conversion is safe for realistic mailbox depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Request Metrics
// ============================================================================

/// Record one handled request.
///
/// Emits:
/// - `rc_requests_total` counter (labels: `method`, `outcome`)
/// - `rc_request_latency_seconds` histogram (labels: `method`)
///
/// `outcome` is `ok` or the error category of the failure ack.
pub fn record_request(method: &str, outcome: &str, duration: Duration) {
    counter!(
        "rc_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("rc_request_latency_seconds", "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Record a notification dropped because the peer's outbound queue was full.
///
/// Metric: `rc_notifications_dropped_total`
/// Labels: `method` (newProducer, producerClosed)
pub fn record_notification_dropped(method: &str) {
    counter!("rc_notifications_dropped_total", "method" => method.to_string()).increment(1);
}

/// Record an actor panic event.
///
/// Metric: `rc_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("rc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without an installed recorder the macros are no-ops; these only check
    // that the helpers never panic.

    #[test]
    fn test_gauges_without_recorder() {
        set_connections_active(0);
        set_connections_active(10_000);
        set_rooms_active(3);
        set_actor_mailbox_depth("room", 500);
    }

    #[test]
    fn test_counters_without_recorder() {
        record_request("join", "ok", Duration::from_millis(2));
        record_request("subscribe", "capability", Duration::from_millis(1));
        record_notification_dropped("newProducer");
        record_actor_panic("room");
    }

    #[test]
    fn test_request_metrics_are_labelled() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_request("publish", "ok", Duration::from_millis(5));
            record_request("publish", "ok", Duration::from_millis(7));
            record_request("publish", "state", Duration::from_millis(1));
            record_notification_dropped("producerClosed");
            set_rooms_active(2);
        });

        let snapshot = snapshotter.snapshot().into_vec();

        let ok_count = snapshot.iter().find_map(|(key, _, _, value)| {
            let key = key.key();
            let is_ok = key.name() == "rc_requests_total"
                && key
                    .labels()
                    .any(|l| l.key() == "outcome" && l.value() == "ok");
            match value {
                DebugValue::Counter(n) if is_ok => Some(*n),
                _ => None,
            }
        });
        assert_eq!(ok_count, Some(2));

        let names: Vec<String> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();
        for expected in [
            "rc_requests_total",
            "rc_request_latency_seconds",
            "rc_notifications_dropped_total",
            "rc_rooms_active",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}"
            );
        }
    }
}
