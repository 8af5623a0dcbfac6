//! Publisher error types.
//!
//! Every public controller operation resolves with exactly one
//! [`PublisherError`] kind. Collaborator errors (`SignalingError`,
//! `EngineError`, `CaptureError`, `NegotiationError`) are mapped into it at the
//! controller boundary.

use crate::media::StreamKind;
use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

/// Publisher error type.
///
/// Retryable kinds (see [`PublisherError::is_retryable`]) leave the controller
/// in the state it was in before the failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublisherError {
    /// The signaling channel could not be opened or was lost.
    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// No join acknowledgment arrived within the join timeout.
    #[error("Join timed out after {0:?}")]
    JoinTimeout(Duration),

    /// The server refused the join request.
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    /// The capability set could not be fetched or loaded.
    #[error("Capabilities unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The transport descriptor could not be obtained or the transport built.
    #[error("Transport setup failed: {0}")]
    TransportSetupFailed(String),

    /// DTLS connect negotiation failed or timed out.
    #[error("Connect negotiation failed: {0}")]
    ConnectNegotiationFailed(String),

    /// Produce negotiation for one stream kind failed or timed out.
    #[error("Produce negotiation failed for {kind}: {reason}")]
    ProduceNegotiationFailed { kind: StreamKind, reason: String },

    /// A lease for this kind is already Negotiating or Active.
    #[error("Stream kind already published: {0}")]
    DuplicateStreamKind(StreamKind),

    /// The pairing table forbids creating this kind right now.
    #[error("{kind} requires {requires} to be published")]
    PairingViolation {
        kind: StreamKind,
        requires: StreamKind,
    },

    /// Local media could not be acquired or lacks a required track.
    #[error("Capture acquisition failed: {0}")]
    CaptureAcquisitionFailed(String),

    /// Operation invoked in a state that does not admit it.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl PublisherError {
    /// Returns a bounded label for logs and metrics.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            PublisherError::SignalingUnavailable(_) => "signaling_unavailable",
            PublisherError::JoinTimeout(_) => "join_timeout",
            PublisherError::JoinRejected(_) => "join_rejected",
            PublisherError::CapabilityUnavailable(_) => "capability_unavailable",
            PublisherError::TransportSetupFailed(_) => "transport_setup_failed",
            PublisherError::ConnectNegotiationFailed(_) => "connect_negotiation_failed",
            PublisherError::ProduceNegotiationFailed { .. } => "produce_negotiation_failed",
            PublisherError::DuplicateStreamKind(_) => "duplicate_stream_kind",
            PublisherError::PairingViolation { .. } => "pairing_violation",
            PublisherError::CaptureAcquisitionFailed(_) => "capture_acquisition_failed",
            PublisherError::InvalidState { .. } => "invalid_state",
        }
    }

    /// Whether the caller may retry the same operation without reconnecting.
    ///
    /// Invariant violations and state errors are not retryable as-is; a
    /// failed connect negotiation is cached for the transport's lifetime, so
    /// it needs a new session.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublisherError::SignalingUnavailable(_)
                | PublisherError::JoinTimeout(_)
                | PublisherError::CapabilityUnavailable(_)
                | PublisherError::TransportSetupFailed(_)
                | PublisherError::ProduceNegotiationFailed { .. }
                | PublisherError::CaptureAcquisitionFailed(_)
        )
    }
}
