//! Session and lease state types.

use crate::media::{LeaseId, SessionIdentity, StreamKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Session controller state.
///
/// ```text
/// Idle -> Connecting -> Connected -> Joining -> CapabilityFetch
///      -> TransportReady <-> Publishing
/// (any) -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Joining,
    CapabilityFetch,
    TransportReady,
    Publishing,
    Disconnected,
}

impl SessionState {
    const fn rank(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Connecting => 1,
            SessionState::Connected => 2,
            SessionState::Joining => 3,
            SessionState::CapabilityFetch => 4,
            SessionState::TransportReady => 5,
            SessionState::Publishing => 6,
            SessionState::Disconnected => 7,
        }
    }

    /// Whether the state machine admits moving from `self` to `next`.
    ///
    /// Transitions are forward-only, except `Publishing -> TransportReady`
    /// when the last lease closes. `Disconnected` is reachable from every
    /// state and is terminal.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Disconnected, _) => false,
            (_, SessionState::Disconnected) => true,
            (SessionState::Publishing, SessionState::TransportReady) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }

    /// Whether a transport exists in this state.
    #[must_use]
    pub const fn has_transport(self) -> bool {
        matches!(self, SessionState::TransportReady | SessionState::Publishing)
    }

    /// Returns the state as a bounded metric/log label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Joining => "joining",
            SessionState::CapabilityFetch => "capability_fetch",
            SessionState::TransportReady => "transport_ready",
            SessionState::Publishing => "publishing",
            SessionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer lease state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Negotiating,
    Active,
    Closed,
}

impl LeaseState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Negotiating => "negotiating",
            LeaseState::Active => "active",
            LeaseState::Closed => "closed",
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lease state transition, as published on the lease stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseEvent {
    pub kind: StreamKind,
    pub lease_id: LeaseId,
    pub state: LeaseState,
    /// Set once the server acknowledged the producer.
    pub remote_producer_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseSummary {
    pub kind: StreamKind,
    pub lease_id: LeaseId,
    pub remote_producer_id: Option<String>,
    pub state: LeaseState,
}

/// Point-in-time view of the whole session, for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub identity: Option<SessionIdentity>,
    pub leases: Vec<LeaseSummary>,
}

impl SessionSnapshot {
    /// Summary of the lease for `kind`, if any.
    #[must_use]
    pub fn lease(&self, kind: StreamKind) -> Option<&LeaseSummary> {
        self.leases.iter().find(|lease| lease.kind == kind)
    }
}
