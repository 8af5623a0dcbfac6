//! Session controller: the publisher's end-to-end state machine.
//!
//! The controller is a cheaply cloneable handle. Lifecycle operations
//! (connect, join, prepare_transport, disconnect, and teardown after a lost
//! signaling channel) are serialized; publishing operations run concurrently
//! and are arbitrated by the transport session's lease table.
//!
//! # Background tasks
//!
//! - one signaling watcher, started on connect, tearing the session down on a
//!   `Disconnected` push event
//! - one watcher per capture in use, stopping the kinds published from that
//!   capture when its source ends
//!
//! All are children of the controller's cancellation token and stop on
//! disconnect.

use crate::capture::{CaptureAdapter, CaptureHandle, CaptureRequest, CaptureSource, MediaTrack};
use crate::config::Config;
use crate::errors::PublisherError;
use crate::engine::MediaEngine;
use crate::media::{
    admit_pairing, CapabilitySet, CaptureId, MediaKind, SessionIdentity, StreamKind,
};
use crate::observability::metrics;
use crate::session::state::{LeaseEvent, LeaseState, LeaseSummary, SessionSnapshot, SessionState};
use crate::session::transport::{CloseReason, LeaseFilter, LeaseTicket, TransportSession};
use crate::signaling::{JoinRequest, SignalingChannel, SignalingError, SignalingEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lease event buffer. Slow subscribers observe `Lagged`.
const LEASE_EVENT_CAPACITY: usize = 64;

#[derive(Default)]
struct CaptureWatchers {
    tokens: HashMap<CaptureId, CancellationToken>,
    /// Captures the controller acquired itself and must release.
    owned: HashMap<CaptureId, CaptureHandle>,
}

impl CaptureWatchers {
    /// Stop watching captures no longer in use; release the owned ones.
    fn prune(&mut self, in_use: &HashSet<CaptureId>) {
        let stale: Vec<CaptureId> = self
            .tokens
            .keys()
            .filter(|id| !in_use.contains(id))
            .copied()
            .collect();

        for capture_id in stale {
            if let Some(token) = self.tokens.remove(&capture_id) {
                token.cancel();
            }
            if let Some(capture) = self.owned.remove(&capture_id) {
                capture.release();
            }
        }
    }

    fn clear(&mut self) {
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
        for (_, capture) in self.owned.drain() {
            capture.release();
        }
    }
}

struct ControllerInner {
    config: Config,
    signaling: Arc<dyn SignalingChannel>,
    engine: Arc<dyn MediaEngine>,
    capture: Option<CaptureAdapter>,
    state_tx: watch::Sender<SessionState>,
    lease_events: broadcast::Sender<LeaseEvent>,
    /// Serializes lifecycle operations.
    lifecycle: Mutex<()>,
    identity: Mutex<Option<SessionIdentity>>,
    capabilities: Mutex<Option<CapabilitySet>>,
    transport: Mutex<Option<Arc<TransportSession>>>,
    captures: Mutex<CaptureWatchers>,
    cancel_token: CancellationToken,
}

impl ControllerInner {
    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Move to `next` if the state machine admits it. Returns whether the
    /// state changed.
    fn transition(&self, next: SessionState) -> bool {
        let mut from = None;
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == next || !current.can_transition_to(next) {
                return false;
            }
            from = Some(*current);
            *current = next;
            true
        });

        if let Some(from) = from {
            info!(
                target: "publisher.controller",
                from = %from,
                to = %next,
                "Session state changed"
            );
            metrics::record_session_transition(next.as_str());
        }
        changed
    }
}

/// Handle to one publisher session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// Create a controller without a capture source. Captures are passed to
    /// [`SessionController::start_publishing`] by the caller.
    pub fn new(
        config: Config,
        signaling: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        Self::build(config, signaling, engine, None)
    }

    /// Create a controller that can acquire captures itself
    /// ([`SessionController::start_camera`], [`SessionController::start_screen_share`]).
    pub fn with_capture_source(
        config: Config,
        signaling: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        source: Arc<dyn CaptureSource>,
    ) -> Self {
        Self::build(config, signaling, engine, Some(CaptureAdapter::new(source)))
    }

    fn build(
        config: Config,
        signaling: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
        capture: Option<CaptureAdapter>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (lease_events, _) = broadcast::channel(LEASE_EVENT_CAPACITY);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                signaling,
                engine,
                capture,
                state_tx,
                lease_events,
                lifecycle: Mutex::new(()),
                identity: Mutex::new(None),
                capabilities: Mutex::new(None),
                transport: Mutex::new(None),
                captures: Mutex::new(CaptureWatchers::default()),
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Session state stream (latest value).
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Lease state stream (every transition, in order).
    pub fn subscribe_leases(&self) -> broadcast::Receiver<LeaseEvent> {
        self.inner.lease_events.subscribe()
    }

    /// Identity acknowledged on join, until disconnect.
    pub async fn identity(&self) -> Option<SessionIdentity> {
        self.inner.identity.lock().await.clone()
    }

    /// Point-in-time view for status displays.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let identity = self.inner.identity.lock().await.clone();
        let transport = self.inner.transport.lock().await.clone();
        SessionSnapshot {
            state: self.state(),
            identity,
            leases: transport.map(|t| t.summaries()).unwrap_or_default(),
        }
    }

    /// Number of captures whose end is currently watched.
    pub async fn watched_capture_count(&self) -> usize {
        self.inner.captures.lock().await.tokens.len()
    }

    /// Open the signaling channel.
    ///
    /// Valid from `Idle`, or from `Connecting` after a failed attempt.
    ///
    /// # Errors
    ///
    /// `SignalingUnavailable` if the channel cannot be opened; the controller
    /// stays in `Connecting`.
    #[instrument(skip_all, name = "publisher.controller.connect")]
    pub async fn connect(&self, server_address: &str) -> Result<(), PublisherError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let state = self.state();
        if !matches!(state, SessionState::Idle | SessionState::Connecting) {
            return Err(PublisherError::InvalidState {
                operation: "connect",
                state,
            });
        }

        self.inner.transition(SessionState::Connecting);

        if let Err(e) = self.inner.signaling.open(server_address).await {
            warn!(
                target: "publisher.controller",
                error = %e,
                "Failed to open signaling channel"
            );
            return Err(PublisherError::SignalingUnavailable(e.to_string()));
        }

        self.spawn_signaling_watcher(self.inner.signaling.subscribe());
        self.inner.transition(SessionState::Connected);
        Ok(())
    }

    /// Join a session.
    ///
    /// Valid from `Connecting`, `Connected`, or `Joining` (retry after a
    /// timeout). On success the controller moves to `CapabilityFetch`.
    ///
    /// # Errors
    ///
    /// `JoinTimeout` when no acknowledgment arrives in time (the controller
    /// stays in `Joining`), `JoinRejected` when the server refuses,
    /// `SignalingUnavailable` when the channel fails.
    #[instrument(skip_all, name = "publisher.controller.join", fields(session_id = %session_id))]
    pub async fn join(
        &self,
        session_id: &str,
        participant_id: &str,
        role: &str,
    ) -> Result<SessionIdentity, PublisherError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let state = self.state();
        if !matches!(
            state,
            SessionState::Connecting | SessionState::Connected | SessionState::Joining
        ) {
            return Err(PublisherError::InvalidState {
                operation: "join",
                state,
            });
        }

        self.inner.transition(SessionState::Joining);

        let request = JoinRequest {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            role: role.to_string(),
        };
        let join_timeout = self.inner.config.timeouts.join;

        let identity =
            match tokio::time::timeout(join_timeout, self.inner.signaling.send_join(request)).await
            {
                Ok(Ok(identity)) => identity,
                Ok(Err(SignalingError::Rejected(reason) | SignalingError::Protocol(reason))) => {
                    warn!(target: "publisher.controller", %reason, "Join rejected");
                    return Err(PublisherError::JoinRejected(reason));
                }
                Ok(Err(e)) => {
                    warn!(target: "publisher.controller", error = %e, "Join failed");
                    return Err(PublisherError::SignalingUnavailable(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        target: "publisher.controller",
                        timeout_ms = join_timeout.as_millis() as u64,
                        "Join acknowledgment timed out"
                    );
                    return Err(PublisherError::JoinTimeout(join_timeout));
                }
            };

        info!(
            target: "publisher.controller",
            participant_id = %identity.participant_id,
            role = %identity.role,
            "Joined session"
        );

        *self.inner.identity.lock().await = Some(identity.clone());
        self.inner.transition(SessionState::CapabilityFetch);
        Ok(identity)
    }

    /// Fetch capabilities, load them into the engine and build the transport.
    ///
    /// # Errors
    ///
    /// `CapabilityUnavailable` or `TransportSetupFailed`; either leaves the
    /// controller in `CapabilityFetch` so the call can be retried.
    #[instrument(skip_all, name = "publisher.controller.prepare_transport")]
    pub async fn prepare_transport(&self) -> Result<(), PublisherError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let state = self.state();
        let identity = self.inner.identity.lock().await.clone();
        let identity = match identity {
            Some(identity) if state == SessionState::CapabilityFetch => identity,
            _ => {
                return Err(PublisherError::InvalidState {
                    operation: "prepare_transport",
                    state,
                })
            }
        };

        let capabilities = self.capabilities().await?;
        self.inner
            .engine
            .load_capabilities(&capabilities)
            .await
            .map_err(|e| PublisherError::CapabilityUnavailable(e.to_string()))?;

        let timeouts = self.inner.config.timeouts;
        let descriptor = match tokio::time::timeout(
            timeouts.transport,
            self.inner
                .signaling
                .request_transport(&identity.participant_id),
        )
        .await
        {
            Ok(Ok(descriptor)) => descriptor,
            Ok(Err(e)) => return Err(PublisherError::TransportSetupFailed(e.to_string())),
            Err(_) => {
                return Err(PublisherError::TransportSetupFailed(format!(
                    "transport descriptor not received within {:?}",
                    timeouts.transport
                )))
            }
        };

        let session = TransportSession::establish(
            self.inner.engine.as_ref(),
            &descriptor,
            Arc::clone(&self.inner.signaling),
            identity,
            timeouts,
            self.inner.lease_events.clone(),
        )
        .await
        .map_err(|e| PublisherError::TransportSetupFailed(e.to_string()))?;

        *self.inner.transport.lock().await = Some(Arc::new(session));
        self.inner.transition(SessionState::TransportReady);
        Ok(())
    }

    /// Capability set, fetched once per session.
    async fn capabilities(&self) -> Result<CapabilitySet, PublisherError> {
        let mut cached = self.inner.capabilities.lock().await;
        if let Some(capabilities) = cached.as_ref() {
            return Ok(capabilities.clone());
        }

        let timeout = self.inner.config.timeouts.capability;
        let capabilities =
            match tokio::time::timeout(timeout, self.inner.signaling.fetch_capabilities()).await {
                Ok(Ok(capabilities)) => capabilities,
                Ok(Err(e)) => return Err(PublisherError::CapabilityUnavailable(e.to_string())),
                Err(_) => {
                    return Err(PublisherError::CapabilityUnavailable(format!(
                        "capabilities not received within {timeout:?}"
                    )))
                }
            };

        debug!(target: "publisher.controller", "Capabilities fetched");
        *cached = Some(capabilities.clone());
        Ok(capabilities)
    }

    /// Publish `kind` from `capture`.
    ///
    /// Video kinds also publish the capture's audio track, when present, as
    /// the companion audio kind in the same operation. Audio kinds publish
    /// only the audio track. If any lease of the operation fails, the leases
    /// it already created are closed again.
    ///
    /// # Errors
    ///
    /// `DuplicateStreamKind` and `PairingViolation` without side effects;
    /// `ProduceNegotiationFailed` / `ConnectNegotiationFailed` from
    /// negotiation; `CaptureAcquisitionFailed` if the capture lacks the
    /// needed track or already ended.
    #[instrument(skip_all, name = "publisher.controller.start_publishing", fields(kind = %kind))]
    pub async fn start_publishing(
        &self,
        kind: StreamKind,
        capture: &CaptureHandle,
    ) -> Result<Vec<LeaseSummary>, PublisherError> {
        self.publish(kind, capture, false, "start_publishing").await
    }

    async fn publish(
        &self,
        kind: StreamKind,
        capture: &CaptureHandle,
        owned: bool,
        operation: &'static str,
    ) -> Result<Vec<LeaseSummary>, PublisherError> {
        let transport = self.current_transport(operation).await?;

        if capture.is_ended() {
            return Err(PublisherError::CaptureAcquisitionFailed(
                "capture already ended".to_string(),
            ));
        }

        let plan = publish_plan(kind, capture)?;
        let kinds: Vec<StreamKind> = plan.iter().map(|(kind, _)| *kind).collect();
        let engine = &self.inner.engine;

        let tickets = transport.reserve(&kinds, capture.id(), |occupied| {
            for kind in &kinds {
                let media_kind = kind.media_kind();
                if !engine.can_produce(media_kind) {
                    return Err(PublisherError::ProduceNegotiationFailed {
                        kind: *kind,
                        reason: format!("engine cannot produce {media_kind}"),
                    });
                }
            }
            admit_pairing(&kinds, occupied)
        })?;

        self.watch_capture(capture, owned).await;

        let mut pending: VecDeque<LeaseTicket> = tickets.into();
        let mut created = Vec::with_capacity(plan.len());

        for (_, track) in plan {
            let Some(ticket) = pending.pop_front() else {
                break;
            };

            match transport.create_lease(ticket, track).await {
                Ok(lease) => created.push(lease),
                Err(e) => {
                    pending.clear();
                    for lease in &created {
                        transport.release_lease(
                            lease.kind(),
                            LeaseFilter::Lease(lease.lease_id()),
                            CloseReason::RolledBack,
                        );
                    }
                    warn!(
                        target: "publisher.controller",
                        %kind,
                        error = %e,
                        rolled_back = created.len(),
                        "Publishing failed"
                    );
                    self.prune_capture_watchers(&transport).await;
                    self.refresh_publishing_state(&transport);
                    return Err(e);
                }
            }
        }

        self.refresh_publishing_state(&transport);

        Ok(created
            .iter()
            .map(|lease| LeaseSummary {
                kind: lease.kind(),
                lease_id: lease.lease_id(),
                remote_producer_id: Some(lease.remote_producer_id().to_string()),
                state: LeaseState::Active,
            })
            .collect())
    }

    /// Stop publishing `kind` (and the kinds it cascades to).
    ///
    /// No-op when nothing is Negotiating or Active for `kind`. A kind still
    /// negotiating is stopped once its negotiation settles.
    #[instrument(skip_all, name = "publisher.controller.stop_publishing", fields(kind = %kind))]
    pub async fn stop_publishing(&self, kind: StreamKind) -> Result<(), PublisherError> {
        let Some(transport) = self.inner.transport.lock().await.clone() else {
            debug!(target: "publisher.controller", %kind, "No transport, nothing to stop");
            return Ok(());
        };

        transport.release_lease(kind, LeaseFilter::Any, CloseReason::Stopped);
        if let Some(cascade) = kind.cascades_to() {
            transport.release_lease(cascade, LeaseFilter::Any, CloseReason::Stopped);
        }

        self.prune_capture_watchers(&transport).await;
        self.refresh_publishing_state(&transport);
        Ok(())
    }

    /// Acquire the camera (640x480 with microphone) and publish it.
    ///
    /// # Errors
    ///
    /// As [`SessionController::start_publishing`]. The capture is released
    /// again on failure.
    pub async fn start_camera(&self) -> Result<Vec<LeaseSummary>, PublisherError> {
        self.start_capture(
            StreamKind::CameraVideo,
            CaptureRequest::camera(),
            "start_camera",
        )
        .await
    }

    /// Acquire the screen (1280x720, optional system audio) and publish it.
    ///
    /// # Errors
    ///
    /// As [`SessionController::start_publishing`]. The capture is released
    /// again on failure.
    pub async fn start_screen_share(
        &self,
        with_audio: bool,
    ) -> Result<Vec<LeaseSummary>, PublisherError> {
        self.start_capture(
            StreamKind::ScreenVideo,
            CaptureRequest::screen(with_audio),
            "start_screen_share",
        )
        .await
    }

    /// Stop the camera and its microphone.
    pub async fn stop_camera(&self) -> Result<(), PublisherError> {
        self.stop_publishing(StreamKind::CameraVideo).await
    }

    /// Stop the screen share, including audio captured with it.
    pub async fn stop_screen_share(&self) -> Result<(), PublisherError> {
        let Some(transport) = self.inner.transport.lock().await.clone() else {
            return Ok(());
        };

        match transport.capture_of(StreamKind::ScreenVideo) {
            Some(capture_id) => {
                transport.release_capture(capture_id, CloseReason::Stopped);
            }
            None => {
                transport.release_lease(
                    StreamKind::ScreenVideo,
                    LeaseFilter::Any,
                    CloseReason::Stopped,
                );
            }
        }

        self.prune_capture_watchers(&transport).await;
        self.refresh_publishing_state(&transport);
        Ok(())
    }

    async fn start_capture(
        &self,
        kind: StreamKind,
        request: CaptureRequest,
        operation: &'static str,
    ) -> Result<Vec<LeaseSummary>, PublisherError> {
        let transport = self.current_transport(operation).await?;

        // Avoid prompting for a device that cannot be published.
        if transport.is_occupied(kind) {
            return Err(PublisherError::DuplicateStreamKind(kind));
        }

        let adapter = self.inner.capture.as_ref().ok_or_else(|| {
            PublisherError::CaptureAcquisitionFailed("no capture source configured".to_string())
        })?;

        let capture = adapter
            .acquire(request)
            .await
            .map_err(|e| PublisherError::CaptureAcquisitionFailed(e.to_string()))?;

        match self.publish(kind, &capture, true, operation).await {
            Ok(leases) => Ok(leases),
            Err(e) => {
                capture.release();
                Err(e)
            }
        }
    }

    /// Close every lease, the transport and the signaling channel, in that
    /// order. Idempotent.
    ///
    /// # Errors
    ///
    /// `SignalingUnavailable` if closing the channel failed. Every teardown
    /// step has completed by then and the controller is `Disconnected`.
    #[instrument(skip_all, name = "publisher.controller.disconnect")]
    pub async fn disconnect(&self) -> Result<(), PublisherError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.state() == SessionState::Disconnected {
            debug!(target: "publisher.controller", "Already disconnected");
            return Ok(());
        }

        self.teardown(true).await
    }

    /// Teardown shared by disconnect and signaling loss. Caller holds the
    /// lifecycle lock.
    async fn teardown(&self, close_signaling: bool) -> Result<(), PublisherError> {
        self.inner.cancel_token.cancel();

        let transport = self.inner.transport.lock().await.take();
        if let Some(transport) = transport {
            for kind in StreamKind::ALL {
                transport.release_lease(kind, LeaseFilter::Any, CloseReason::Disconnected);
            }
            transport.close();
        }

        self.inner.captures.lock().await.clear();

        let result = if close_signaling {
            self.inner.signaling.close().await.map_err(|e| {
                warn!(
                    target: "publisher.controller",
                    error = %e,
                    "Failed to close signaling channel"
                );
                PublisherError::SignalingUnavailable(e.to_string())
            })
        } else {
            Ok(())
        };

        *self.inner.identity.lock().await = None;
        *self.inner.capabilities.lock().await = None;
        self.inner.transition(SessionState::Disconnected);

        info!(target: "publisher.controller", "Session torn down");
        result
    }

    async fn on_signaling_lost(&self, reason: String) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.state() == SessionState::Disconnected {
            return;
        }

        warn!(
            target: "publisher.controller",
            %reason,
            "Signaling channel lost, tearing down session"
        );

        if let Err(e) = self.teardown(false).await {
            warn!(target: "publisher.controller", error = %e, "Teardown reported an error");
        }
    }

    async fn on_capture_ended(&self, capture_id: CaptureId) {
        info!(
            target: "publisher.capture",
            capture_id = %capture_id,
            "Capture ended"
        );

        let transport = self.inner.transport.lock().await.clone();
        if let Some(transport) = transport {
            let closed = transport.release_capture(capture_id, CloseReason::CaptureEnded);
            for kind in closed {
                if let Some(cascade) = kind.cascades_to() {
                    transport.release_lease(cascade, LeaseFilter::Any, CloseReason::CaptureEnded);
                }
            }
            self.refresh_publishing_state(&transport);
            // The cascade may have closed leases fed by other captures.
            self.prune_capture_watchers(&transport).await;
            return;
        }

        let mut captures = self.inner.captures.lock().await;
        captures.tokens.remove(&capture_id);
        if let Some(capture) = captures.owned.remove(&capture_id) {
            capture.release();
        }
    }

    async fn current_transport(
        &self,
        operation: &'static str,
    ) -> Result<Arc<TransportSession>, PublisherError> {
        let state = self.state();
        if !state.has_transport() {
            return Err(PublisherError::InvalidState { operation, state });
        }

        self.inner
            .transport
            .lock()
            .await
            .clone()
            .ok_or(PublisherError::InvalidState {
                operation,
                state: self.state(),
            })
    }

    fn refresh_publishing_state(&self, transport: &TransportSession) {
        let next = if transport.active_count() > 0 {
            SessionState::Publishing
        } else {
            SessionState::TransportReady
        };
        self.inner.transition(next);
    }

    async fn prune_capture_watchers(&self, transport: &TransportSession) {
        let in_use = transport.captures_in_use();
        self.inner.captures.lock().await.prune(&in_use);
    }

    async fn watch_capture(&self, capture: &CaptureHandle, owned: bool) {
        let capture_id = capture.id();
        let mut captures = self.inner.captures.lock().await;

        if owned {
            captures.owned.insert(capture_id, capture.clone());
        }
        if captures.tokens.contains_key(&capture_id) {
            return;
        }

        let token = self.inner.cancel_token.child_token();
        captures.tokens.insert(capture_id, token.clone());

        let ended = capture.ended();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = ended.cancelled() => {
                    if let Some(controller) = upgrade(&weak) {
                        controller.on_capture_ended(capture_id).await;
                    }
                }
            }
        });
    }

    fn spawn_signaling_watcher(&self, mut events: broadcast::Receiver<SignalingEvent>) {
        let token = self.inner.cancel_token.child_token();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(SignalingEvent::Disconnected { reason }) => {
                            if let Some(controller) = upgrade(&weak) {
                                controller.on_signaling_lost(reason).await;
                            }
                            break;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                target: "publisher.controller",
                                skipped,
                                "Signaling event watcher lagged"
                            );
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!(target: "publisher.controller", "Signaling watcher stopped");
        });
    }
}

fn upgrade(weak: &Weak<ControllerInner>) -> Option<SessionController> {
    weak.upgrade().map(|inner| SessionController { inner })
}

/// Tracks to publish for `kind`, primary first.
fn publish_plan(
    kind: StreamKind,
    capture: &CaptureHandle,
) -> Result<Vec<(StreamKind, Arc<dyn MediaTrack>)>, PublisherError> {
    match kind.media_kind() {
        MediaKind::Video => {
            let video = capture.video_track().ok_or_else(|| {
                PublisherError::CaptureAcquisitionFailed("capture has no video track".to_string())
            })?;
            let mut plan = vec![(kind, Arc::clone(video))];
            if let (Some(companion), Some(audio)) = (kind.companion_audio(), capture.audio_track())
            {
                plan.push((companion, Arc::clone(audio)));
            }
            Ok(plan)
        }
        MediaKind::Audio => {
            let audio = capture.audio_track().ok_or_else(|| {
                PublisherError::CaptureAcquisitionFailed("capture has no audio track".to_string())
            })?;
            Ok(vec![(kind, Arc::clone(audio))])
        }
    }
}
