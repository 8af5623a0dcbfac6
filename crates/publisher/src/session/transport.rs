//! Transport session: the single outgoing transport of a participant.
//!
//! Owns every producer lease created against the transport and mediates the
//! engine's two negotiation callbacks with the signaling channel:
//!
//! - connect: single-flight, settled once per transport lifetime; later
//!   callers get the cached outcome
//! - produce: concurrent across stream kinds, refused while the same kind is
//!   already in flight
//!
//! The lease table holds at most one Negotiating-or-Active slot per
//! [`StreamKind`]. Slots are reserved up front for every kind of one operation
//! (see [`TransportSession::reserve`]), so uniqueness and pairing are decided
//! before any network call.

use crate::capture::MediaTrack;
use crate::config::Timeouts;
use crate::engine::{
    EngineError, MediaEngine, NegotiationError, ProduceOptions, SendTransport,
    TransportNegotiator,
};
use crate::errors::PublisherError;
use crate::media::{
    AppData, CaptureId, DtlsParameters, LeaseId, ProduceOffer, SessionIdentity, StreamKind,
    TransportDescriptor,
};
use crate::observability::metrics;
use crate::session::inflight::{InflightRegistry, OperationKey};
use crate::session::lease::ProducerLease;
use crate::session::state::{LeaseEvent, LeaseState, LeaseSummary, SessionState};
use crate::signaling::{ProduceRequest, SignalingChannel};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a lease left the lease table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit stop requested by the caller.
    Stopped,
    /// The capture the lease publishes from ended.
    CaptureEnded,
    /// Another lease of the same operation failed.
    RolledBack,
    /// Session teardown.
    Disconnected,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Stopped => "stopped",
            CloseReason::CaptureEnded => "capture_ended",
            CloseReason::RolledBack => "rolled_back",
            CloseReason::Disconnected => "disconnected",
        }
    }
}

/// Which lease of a kind a release applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseFilter {
    Any,
    Lease(LeaseId),
    Capture(CaptureId),
}

/// Result of releasing one stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// An Active lease was closed by this call.
    Closed,
    /// A negotiation is in flight; it will close its lease on completion.
    StopRequested,
    /// Nothing matched.
    NotFound,
}

enum Slot {
    Negotiating {
        lease_id: LeaseId,
        capture_id: CaptureId,
        stop_requested: bool,
    },
    Active(Arc<ProducerLease>),
}

impl Slot {
    fn lease_id(&self) -> LeaseId {
        match self {
            Slot::Negotiating { lease_id, .. } => *lease_id,
            Slot::Active(lease) => lease.lease_id(),
        }
    }

    fn capture_id(&self) -> CaptureId {
        match self {
            Slot::Negotiating { capture_id, .. } => *capture_id,
            Slot::Active(lease) => lease.capture_id(),
        }
    }

    fn matches(&self, filter: LeaseFilter) -> bool {
        match filter {
            LeaseFilter::Any => true,
            LeaseFilter::Lease(id) => self.lease_id() == id,
            LeaseFilter::Capture(id) => self.capture_id() == id,
        }
    }
}

struct Slots {
    by_kind: HashMap<StreamKind, Slot>,
    closed: bool,
}

/// Lease table shared with outstanding tickets.
struct LeaseTable {
    slots: Mutex<Slots>,
    events: broadcast::Sender<LeaseEvent>,
}

impl LeaseTable {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: StreamKind, lease_id: LeaseId, state: LeaseState, remote: Option<&str>) {
        // No subscribers is fine.
        let _ = self.events.send(LeaseEvent {
            kind,
            lease_id,
            state,
            remote_producer_id: remote.map(str::to_string),
            at: Utc::now(),
        });
    }

    fn publish_gauge(slots: &Slots) {
        let active = slots
            .by_kind
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count();
        metrics::set_leases_active(active);
    }

    /// Close an Active lease already removed from the table.
    fn close_removed(&self, lease: &ProducerLease, reason: CloseReason) -> bool {
        if !lease.close() {
            return false;
        }
        self.emit(
            lease.kind(),
            lease.lease_id(),
            LeaseState::Closed,
            Some(lease.remote_producer_id()),
        );
        metrics::record_lease_closed(lease.kind().as_str(), reason.as_str());
        info!(
            target: "publisher.lease",
            kind = %lease.kind(),
            lease_id = %lease.lease_id(),
            reason = reason.as_str(),
            "Lease closed"
        );
        true
    }

    /// Release the slot of `kind` if it matches `filter`. Caller holds the lock.
    fn release_locked(
        &self,
        slots: &mut Slots,
        kind: StreamKind,
        filter: LeaseFilter,
        reason: CloseReason,
    ) -> ReleaseOutcome {
        match slots.by_kind.get_mut(&kind) {
            Some(slot) if !slot.matches(filter) => ReleaseOutcome::NotFound,
            None => ReleaseOutcome::NotFound,
            Some(Slot::Negotiating {
                lease_id,
                stop_requested,
                ..
            }) => {
                *stop_requested = true;
                debug!(
                    target: "publisher.lease",
                    %kind,
                    lease_id = %lease_id,
                    reason = reason.as_str(),
                    "Stop requested while negotiating"
                );
                ReleaseOutcome::StopRequested
            }
            Some(Slot::Active(_)) => {
                let Some(Slot::Active(lease)) = slots.by_kind.remove(&kind) else {
                    return ReleaseOutcome::NotFound;
                };
                let closed = self.close_removed(&lease, reason);
                Self::publish_gauge(slots);
                if closed {
                    ReleaseOutcome::Closed
                } else {
                    ReleaseOutcome::NotFound
                }
            }
        }
    }
}

/// A reserved Negotiating slot for one stream kind.
///
/// Consumed by [`TransportSession::create_lease`]. Dropping an unconsumed
/// ticket frees the slot and reports the lease Closed.
pub struct LeaseTicket {
    kind: StreamKind,
    lease_id: LeaseId,
    capture_id: CaptureId,
    table: Arc<LeaseTable>,
    consumed: bool,
}

impl LeaseTicket {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }
}

impl Drop for LeaseTicket {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        let mut slots = self.table.lock();
        let ours = matches!(
            slots.by_kind.get(&self.kind),
            Some(Slot::Negotiating { lease_id, .. }) if *lease_id == self.lease_id
        );
        if ours {
            slots.by_kind.remove(&self.kind);
            self.table
                .emit(self.kind, self.lease_id, LeaseState::Closed, None);
            debug!(
                target: "publisher.lease",
                kind = %self.kind,
                lease_id = %self.lease_id,
                "Reservation released"
            );
        }
    }
}

/// Engine callbacks bound to one transport.
struct Negotiator {
    signaling: Arc<dyn SignalingChannel>,
    identity: SessionIdentity,
    connect_timeout: Duration,
    produce_timeout: Duration,
    inflight: InflightRegistry<Result<(), NegotiationError>>,
}

#[async_trait]
impl TransportNegotiator for Negotiator {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), NegotiationError> {
        self.inflight
            .collapse(OperationKey::connect(), || async {
                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    self.connect_timeout,
                    self.signaling
                        .connect_transport(&self.identity.participant_id, &dtls_parameters),
                )
                .await;

                match outcome {
                    Ok(Ok(())) => {
                        metrics::record_negotiation("connect", "success", started.elapsed());
                        info!(target: "publisher.transport", "Transport connected");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        metrics::record_negotiation("connect", "error", started.elapsed());
                        warn!(target: "publisher.transport", error = %e, "Connect negotiation failed");
                        Err(NegotiationError::Connect(e.to_string()))
                    }
                    Err(_) => {
                        metrics::record_negotiation("connect", "timeout", started.elapsed());
                        warn!(
                            target: "publisher.transport",
                            timeout_ms = self.connect_timeout.as_millis() as u64,
                            "Connect negotiation timed out"
                        );
                        Err(NegotiationError::ConnectTimeout(self.connect_timeout))
                    }
                }
            })
            .await
    }

    async fn on_produce(&self, offer: ProduceOffer) -> Result<String, NegotiationError> {
        let stream_kind = offer.app_data.stream_kind;
        let Some(_guard) = self.inflight.try_begin(OperationKey::produce(stream_kind)) else {
            warn!(
                target: "publisher.transport",
                kind = %stream_kind,
                "Produce negotiation already in flight"
            );
            return Err(NegotiationError::ProduceInFlight(stream_kind));
        };

        let request = ProduceRequest {
            participant_id: self.identity.participant_id.clone(),
            session_id: self.identity.session_id.clone(),
            kind: offer.kind,
            rtp_parameters: offer.rtp_parameters,
            stream_kind,
        };

        let started = Instant::now();
        match tokio::time::timeout(self.produce_timeout, self.signaling.request_produce(request))
            .await
        {
            Ok(Ok(remote_producer_id)) => {
                metrics::record_negotiation("produce", "success", started.elapsed());
                debug!(
                    target: "publisher.transport",
                    kind = %stream_kind,
                    %remote_producer_id,
                    "Produce acknowledged"
                );
                Ok(remote_producer_id)
            }
            Ok(Err(e)) => {
                metrics::record_negotiation("produce", "error", started.elapsed());
                warn!(
                    target: "publisher.transport",
                    kind = %stream_kind,
                    error = %e,
                    "Produce negotiation failed"
                );
                Err(NegotiationError::Produce(e.to_string()))
            }
            Err(_) => {
                metrics::record_negotiation("produce", "timeout", started.elapsed());
                // The server may have created the producer anyway; nothing
                // reconciles it from this side.
                warn!(
                    target: "publisher.transport",
                    kind = %stream_kind,
                    timeout_ms = self.produce_timeout.as_millis() as u64,
                    "Produce negotiation timed out, server may hold an orphaned producer"
                );
                Err(NegotiationError::ProduceTimeout(self.produce_timeout))
            }
        }
    }
}

/// The participant's single outgoing transport and its leases.
pub struct TransportSession {
    transport: Arc<dyn SendTransport>,
    negotiator: Arc<Negotiator>,
    table: Arc<LeaseTable>,
    closed: AtomicBool,
}

impl TransportSession {
    /// Create the engine transport for `descriptor`, wired to the signaling
    /// channel for connect and produce negotiation.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the transport cannot be created.
    pub async fn establish(
        engine: &dyn MediaEngine,
        descriptor: &TransportDescriptor,
        signaling: Arc<dyn SignalingChannel>,
        identity: SessionIdentity,
        timeouts: Timeouts,
        events: broadcast::Sender<LeaseEvent>,
    ) -> Result<Self, EngineError> {
        let negotiator = Arc::new(Negotiator {
            signaling,
            identity,
            connect_timeout: timeouts.connect,
            produce_timeout: timeouts.produce,
            inflight: InflightRegistry::new(),
        });

        let transport = engine
            .create_send_transport(
                descriptor,
                Arc::clone(&negotiator) as Arc<dyn TransportNegotiator>,
            )
            .await?;

        info!(
            target: "publisher.transport",
            transport_id = %transport.id(),
            "Send transport created"
        );

        Ok(Self {
            transport,
            negotiator,
            table: Arc::new(LeaseTable {
                slots: Mutex::new(Slots {
                    by_kind: HashMap::new(),
                    closed: false,
                }),
                events,
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        self.transport.id()
    }

    /// The callbacks handed to the engine.
    pub fn negotiator(&self) -> Arc<dyn TransportNegotiator> {
        Arc::clone(&self.negotiator) as Arc<dyn TransportNegotiator>
    }

    /// Reserve Negotiating slots for every kind of one operation.
    ///
    /// `admit` sees the kinds already Negotiating or Active and runs under
    /// the same lock as the reservation.
    ///
    /// # Errors
    ///
    /// `DuplicateStreamKind` if a kind is taken (or requested twice), the
    /// error returned by `admit`, or `InvalidState` once the transport is
    /// closed. Nothing is reserved on error.
    pub fn reserve<F>(
        &self,
        kinds: &[StreamKind],
        capture_id: CaptureId,
        admit: F,
    ) -> Result<Vec<LeaseTicket>, PublisherError>
    where
        F: FnOnce(&HashSet<StreamKind>) -> Result<(), PublisherError>,
    {
        let mut slots = self.table.lock();
        if slots.closed {
            return Err(PublisherError::InvalidState {
                operation: "start_publishing",
                state: SessionState::Disconnected,
            });
        }

        let mut seen = HashSet::new();
        for kind in kinds {
            if slots.by_kind.contains_key(kind) || !seen.insert(*kind) {
                return Err(PublisherError::DuplicateStreamKind(*kind));
            }
        }

        let occupied: HashSet<StreamKind> = slots.by_kind.keys().copied().collect();
        admit(&occupied)?;

        let tickets = kinds
            .iter()
            .map(|kind| {
                let lease_id = LeaseId::new();
                slots.by_kind.insert(
                    *kind,
                    Slot::Negotiating {
                        lease_id,
                        capture_id,
                        stop_requested: false,
                    },
                );
                self.table
                    .emit(*kind, lease_id, LeaseState::Negotiating, None);
                LeaseTicket {
                    kind: *kind,
                    lease_id,
                    capture_id,
                    table: Arc::clone(&self.table),
                    consumed: false,
                }
            })
            .collect();

        Ok(tickets)
    }

    /// Drive one produce negotiation for a reserved slot.
    ///
    /// # Errors
    ///
    /// `ProduceNegotiationFailed` on rejection, timeout, or when the kind was
    /// stopped while negotiating (the fresh lease is closed again).
    /// `ConnectNegotiationFailed` if the transport's connect negotiation
    /// failed. The slot is freed on every error.
    pub async fn create_lease(
        &self,
        mut ticket: LeaseTicket,
        track: Arc<dyn MediaTrack>,
    ) -> Result<Arc<ProducerLease>, PublisherError> {
        let kind = ticket.kind;
        let options = ProduceOptions {
            track: Arc::clone(&track),
            encoding: kind.default_encoding(),
            app_data: AppData { stream_kind: kind },
        };

        let producer = self
            .transport
            .produce(options)
            .await
            .map_err(|e| map_engine_error(kind, e))?;

        let lease = Arc::new(ProducerLease::new(
            ticket.lease_id,
            kind,
            ticket.capture_id,
            track,
            producer,
        ));

        let mut slots = self.table.lock();
        ticket.consumed = true;

        let proceed = !slots.closed
            && matches!(
                slots.by_kind.get(&kind),
                Some(Slot::Negotiating { lease_id, stop_requested: false, .. })
                    if *lease_id == ticket.lease_id
            );

        if !proceed {
            let ours = matches!(
                slots.by_kind.get(&kind),
                Some(slot) if slot.lease_id() == ticket.lease_id
            );
            if ours {
                slots.by_kind.remove(&kind);
            }
            self.table.close_removed(&lease, CloseReason::Stopped);
            return Err(PublisherError::ProduceNegotiationFailed {
                kind,
                reason: "publishing stopped while negotiating".to_string(),
            });
        }

        slots
            .by_kind
            .insert(kind, Slot::Active(Arc::clone(&lease)));
        self.table.emit(
            kind,
            lease.lease_id(),
            LeaseState::Active,
            Some(lease.remote_producer_id()),
        );
        LeaseTable::publish_gauge(&slots);

        info!(
            target: "publisher.lease",
            %kind,
            lease_id = %lease.lease_id(),
            remote_producer_id = %lease.remote_producer_id(),
            "Lease active"
        );

        Ok(lease)
    }

    /// Release the lease of `kind` if it matches `filter`.
    pub fn release_lease(
        &self,
        kind: StreamKind,
        filter: LeaseFilter,
        reason: CloseReason,
    ) -> ReleaseOutcome {
        let mut slots = self.table.lock();
        self.table.release_locked(&mut slots, kind, filter, reason)
    }

    /// Release every lease publishing from `capture_id`.
    ///
    /// Returns the kinds whose Active lease this call closed.
    pub fn release_capture(&self, capture_id: CaptureId, reason: CloseReason) -> Vec<StreamKind> {
        let mut slots = self.table.lock();
        StreamKind::ALL
            .into_iter()
            .filter(|kind| {
                self.table.release_locked(
                    &mut slots,
                    *kind,
                    LeaseFilter::Capture(capture_id),
                    reason,
                ) == ReleaseOutcome::Closed
            })
            .collect()
    }

    /// Captures with at least one Negotiating or Active lease.
    pub fn captures_in_use(&self) -> HashSet<CaptureId> {
        self.table
            .lock()
            .by_kind
            .values()
            .map(Slot::capture_id)
            .collect()
    }

    /// Number of Active leases.
    pub fn active_count(&self) -> usize {
        self.table
            .lock()
            .by_kind
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    /// Whether `kind` has a Negotiating or Active lease.
    pub fn is_occupied(&self, kind: StreamKind) -> bool {
        self.table.lock().by_kind.contains_key(&kind)
    }

    /// Capture the lease of `kind` publishes from, if any.
    pub fn capture_of(&self, kind: StreamKind) -> Option<CaptureId> {
        self.table.lock().by_kind.get(&kind).map(Slot::capture_id)
    }

    /// Active lease of `kind`, if any.
    pub fn lease(&self, kind: StreamKind) -> Option<Arc<ProducerLease>> {
        match self.table.lock().by_kind.get(&kind) {
            Some(Slot::Active(lease)) => Some(Arc::clone(lease)),
            _ => None,
        }
    }

    /// Summaries of all Negotiating and Active leases, in kind order.
    pub fn summaries(&self) -> Vec<LeaseSummary> {
        let slots = self.table.lock();
        StreamKind::ALL
            .into_iter()
            .filter_map(|kind| {
                slots.by_kind.get(&kind).map(|slot| match slot {
                    Slot::Negotiating { lease_id, .. } => LeaseSummary {
                        kind,
                        lease_id: *lease_id,
                        remote_producer_id: None,
                        state: LeaseState::Negotiating,
                    },
                    Slot::Active(lease) => LeaseSummary {
                        kind,
                        lease_id: lease.lease_id(),
                        remote_producer_id: Some(lease.remote_producer_id().to_string()),
                        state: LeaseState::Active,
                    },
                })
            })
            .collect()
    }

    /// Close the transport.
    ///
    /// Leases must have been released by the caller; any still registered
    /// are reported, not closed. Negotiations still in flight close their
    /// lease on completion. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut slots = self.table.lock();
            slots.closed = true;

            let remaining: Vec<&'static str> =
                slots.by_kind.keys().map(StreamKind::as_str).collect();
            if !remaining.is_empty() {
                warn!(
                    target: "publisher.transport",
                    leases = ?remaining,
                    "Closing transport with leases still registered"
                );
            }

            for slot in slots.by_kind.values_mut() {
                if let Slot::Negotiating { stop_requested, .. } = slot {
                    *stop_requested = true;
                }
            }
        }

        self.transport.close();
        info!(
            target: "publisher.transport",
            transport_id = %self.transport.id(),
            "Send transport closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn map_engine_error(kind: StreamKind, err: EngineError) -> PublisherError {
    match err {
        EngineError::Negotiation(e) if e.is_connect() => {
            PublisherError::ConnectNegotiationFailed(e.to_string())
        }
        other => PublisherError::ProduceNegotiationFailed {
            kind,
            reason: other.to_string(),
        },
    }
}
