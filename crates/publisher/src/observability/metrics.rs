//! Metrics definitions for the publisher session core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `publisher_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `operation`: connect, produce
//! - `outcome`: success, error, timeout
//! - `state`: 8 session states
//! - `kind`: 4 stream kinds
//! - `reason`: stopped, capture_ended, rolled_back, disconnected, abandoned
//!
//! The library only records through the `metrics` facade; installing an
//! exporter is left to the embedding application.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Set the number of Active producer leases.
///
/// Metric: `publisher_leases_active`
/// Labels: none
pub fn set_leases_active(count: usize) {
    // usize to f64 conversion is safe for at most four leases
    #[allow(clippy::cast_precision_loss)]
    gauge!("publisher_leases_active").set(count as f64);
}

/// Record the outcome of one negotiation round-trip.
///
/// Metric: `publisher_negotiations_total`, `publisher_negotiation_duration_seconds`
/// Labels: `operation`, `outcome`
///
/// Cardinality: 2 x 3
pub fn record_negotiation(operation: &str, outcome: &str, duration: Duration) {
    counter!(
        "publisher_negotiations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        "publisher_negotiation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a session state transition.
///
/// Metric: `publisher_session_transitions_total`
/// Labels: `state` (the state entered)
pub fn record_session_transition(state: &str) {
    counter!("publisher_session_transitions_total", "state" => state.to_string()).increment(1);
}

/// Record a lease leaving the lease table.
///
/// Metric: `publisher_leases_closed_total`
/// Labels: `kind`, `reason`
pub fn record_lease_closed(kind: &str, reason: &str) {
    counter!(
        "publisher_leases_closed_total",
        "kind" => kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_leases_active(2);
            record_negotiation("connect", "success", Duration::from_millis(40));
            record_negotiation("produce", "timeout", Duration::from_secs(10));
            record_session_transition("publishing");
            record_lease_closed("screen_video", "capture_ended");
        });

        let names: HashSet<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "publisher_leases_active",
            "publisher_negotiations_total",
            "publisher_negotiation_duration_seconds",
            "publisher_session_transitions_total",
            "publisher_leases_closed_total",
        ] {
            assert!(names.contains(expected), "missing metric {expected}");
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_leases_active(0);
        record_negotiation("produce", "error", Duration::ZERO);
        record_session_transition("idle");
        record_lease_closed("camera_audio", "stopped");
    }
}
