//! Producer lease: one outgoing track bound to one remote producer.

use crate::capture::MediaTrack;
use crate::engine::LocalProducer;
use crate::media::{CaptureId, LeaseId, StreamKind};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// An Active outgoing stream. Owned by the transport session.
pub struct ProducerLease {
    lease_id: LeaseId,
    kind: StreamKind,
    capture_id: CaptureId,
    remote_producer_id: String,
    track: Arc<dyn MediaTrack>,
    producer: Box<dyn LocalProducer>,
    closed: AtomicBool,
    opened_at: DateTime<Utc>,
}

impl ProducerLease {
    pub(crate) fn new(
        lease_id: LeaseId,
        kind: StreamKind,
        capture_id: CaptureId,
        track: Arc<dyn MediaTrack>,
        producer: Box<dyn LocalProducer>,
    ) -> Self {
        Self {
            lease_id,
            kind,
            capture_id,
            remote_producer_id: producer.id().to_string(),
            track,
            producer,
            closed: AtomicBool::new(false),
            opened_at: Utc::now(),
        }
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn capture_id(&self) -> CaptureId {
        self.capture_id
    }

    pub fn remote_producer_id(&self) -> &str {
        &self.remote_producer_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the producer and stop the bound track.
    ///
    /// Returns `true` if this call performed the transition to Closed. Later
    /// calls, from any path, are no-ops.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.producer.close();
        self.track.stop();

        debug!(
            target: "publisher.lease",
            lease_id = %self.lease_id,
            kind = %self.kind,
            remote_producer_id = %self.remote_producer_id,
            "Lease closed"
        );
        true
    }
}

impl fmt::Debug for ProducerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerLease")
            .field("lease_id", &self.lease_id)
            .field("kind", &self.kind)
            .field("capture_id", &self.capture_id)
            .field("remote_producer_id", &self.remote_producer_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
