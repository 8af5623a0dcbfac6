//! Observability for the publisher session core.
//!
//! # Privacy by Default
//!
//! Instrumented operations use `#[instrument(skip_all)]` and record only
//! session ids, stream kinds and lease ids. Negotiation parameters (ICE, DTLS,
//! RTP) are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `publisher_leases_active` | Gauge | none | Current Active leases |
//! | `publisher_negotiations_total` | Counter | `operation`, `outcome` | Connect/produce outcomes |
//! | `publisher_negotiation_duration_seconds` | Histogram | `operation` | Negotiation round-trip time |
//! | `publisher_session_transitions_total` | Counter | `state` | State machine transitions |
//! | `publisher_leases_closed_total` | Counter | `kind`, `reason` | Lease teardown causes |

pub mod metrics;

pub use metrics::{
    record_lease_closed, record_negotiation, record_session_transition, set_leases_active,
};
