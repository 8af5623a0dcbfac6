//! Scriptable signaling channel.
//!
//! Behaviour is set with the builder and can be changed while a test runs
//! (e.g. to make a retried call succeed) through [`MockSignaling::configure`].
//! Every operation is counted.
//!
//! # Example
//!
//! ```rust,ignore
//! use publisher_test_utils::MockSignaling;
//!
//! let signaling = MockSignaling::builder()
//!     .silent_join()
//!     .connect_delay(Duration::from_millis(50))
//!     .build();
//! ```

use async_trait::async_trait;
use publisher::media::{
    CapabilitySet, DtlsParameters, SessionIdentity, StreamKind, TransportDescriptor,
};
use publisher::signaling::{
    JoinRequest, ProduceRequest, SignalingChannel, SignalingError, SignalingEvent,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::fixtures::{sample_capabilities, sample_descriptor};

/// How the mock answers. All failures default to off.
#[derive(Debug, Clone, Default)]
pub struct SignalingBehavior {
    pub fail_open: bool,
    pub reject_join: Option<String>,
    /// Never answer join requests.
    pub silent_join: bool,
    /// Peer id to acknowledge instead of echoing the requested one.
    pub assigned_peer_id: Option<String>,
    pub fail_capabilities: bool,
    pub fail_transport: bool,
    pub fail_connect: bool,
    pub reject_produce: HashSet<StreamKind>,
    /// Never answer produce requests.
    pub silent_produce: bool,
    pub connect_delay: Duration,
    pub produce_delay: Duration,
    pub fail_close: bool,
}

/// Mock signaling channel with call counters.
pub struct MockSignaling {
    behavior: Mutex<SignalingBehavior>,
    events: broadcast::Sender<SignalingEvent>,
    open_calls: AtomicUsize,
    join_calls: AtomicUsize,
    capability_calls: AtomicUsize,
    transport_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    produce_calls: AtomicUsize,
    close_calls: AtomicUsize,
    produce_requests: Mutex<Vec<ProduceRequest>>,
}

impl MockSignaling {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> MockSignalingBuilder {
        MockSignalingBuilder::default()
    }

    /// A mock that accepts everything.
    #[must_use]
    pub fn accepting() -> Self {
        Self::builder().build()
    }

    /// Change behaviour mid-test.
    pub fn configure(&self, f: impl FnOnce(&mut SignalingBehavior)) {
        f(&mut self.behavior.lock().unwrap());
    }

    fn behavior(&self) -> SignalingBehavior {
        self.behavior.lock().unwrap().clone()
    }

    /// Push a `Disconnected` event, as if the server went away.
    pub fn emit_disconnect(&self, reason: &str) {
        let _ = self.events.send(SignalingEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn open_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn join_count(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    pub fn capability_count(&self) -> usize {
        self.capability_calls.load(Ordering::SeqCst)
    }

    pub fn transport_count(&self) -> usize {
        self.transport_calls.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn produce_count(&self) -> usize {
        self.produce_calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Produce requests received so far, in order.
    pub fn produce_requests(&self) -> Vec<ProduceRequest> {
        self.produce_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn open(&self, address: &str) -> Result<(), SignalingError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior().fail_open {
            return Err(SignalingError::Unavailable(format!(
                "connection refused: {address}"
            )));
        }
        Ok(())
    }

    async fn send_join(&self, request: JoinRequest) -> Result<SessionIdentity, SignalingError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior();

        if behavior.silent_join {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = behavior.reject_join {
            return Err(SignalingError::Rejected(reason));
        }

        Ok(SessionIdentity {
            session_id: request.session_id,
            participant_id: behavior
                .assigned_peer_id
                .unwrap_or(request.participant_id),
            role: request.role,
        })
    }

    async fn fetch_capabilities(&self) -> Result<CapabilitySet, SignalingError> {
        self.capability_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior().fail_capabilities {
            return Err(SignalingError::Rejected(
                "router not ready".to_string(),
            ));
        }
        Ok(sample_capabilities())
    }

    async fn request_transport(
        &self,
        _participant_id: &str,
    ) -> Result<TransportDescriptor, SignalingError> {
        self.transport_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior().fail_transport {
            return Err(SignalingError::Rejected(
                "transport limit reached".to_string(),
            ));
        }
        Ok(sample_descriptor())
    }

    async fn connect_transport(
        &self,
        _participant_id: &str,
        _dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalingError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior();

        if !behavior.connect_delay.is_zero() {
            tokio::time::sleep(behavior.connect_delay).await;
        }
        if behavior.fail_connect {
            return Err(SignalingError::Rejected("dtls handshake failed".to_string()));
        }
        Ok(())
    }

    async fn request_produce(&self, request: ProduceRequest) -> Result<String, SignalingError> {
        let call = self.produce_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.behavior();
        let stream_kind = request.stream_kind;
        self.produce_requests.lock().unwrap().push(request);

        if !behavior.produce_delay.is_zero() {
            tokio::time::sleep(behavior.produce_delay).await;
        }
        if behavior.silent_produce {
            std::future::pending::<()>().await;
        }
        if behavior.reject_produce.contains(&stream_kind) {
            return Err(SignalingError::Rejected(format!(
                "cannot produce {}",
                stream_kind.wire_tag()
            )));
        }
        Ok(format!("producer-{call}"))
    }

    async fn close(&self) -> Result<(), SignalingError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior().fail_close {
            return Err(SignalingError::Unavailable("socket already gone".to_string()));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}

/// Builder for [`MockSignaling`].
#[derive(Debug, Default)]
pub struct MockSignalingBuilder {
    behavior: SignalingBehavior,
}

impl MockSignalingBuilder {
    #[must_use]
    pub fn failing_open(mut self) -> Self {
        self.behavior.fail_open = true;
        self
    }

    #[must_use]
    pub fn rejecting_join(mut self, reason: &str) -> Self {
        self.behavior.reject_join = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn silent_join(mut self) -> Self {
        self.behavior.silent_join = true;
        self
    }

    #[must_use]
    pub fn assigning_peer_id(mut self, peer_id: &str) -> Self {
        self.behavior.assigned_peer_id = Some(peer_id.to_string());
        self
    }

    #[must_use]
    pub fn failing_capabilities(mut self) -> Self {
        self.behavior.fail_capabilities = true;
        self
    }

    #[must_use]
    pub fn failing_transport(mut self) -> Self {
        self.behavior.fail_transport = true;
        self
    }

    #[must_use]
    pub fn failing_connect(mut self) -> Self {
        self.behavior.fail_connect = true;
        self
    }

    #[must_use]
    pub fn rejecting_produce(mut self, kind: StreamKind) -> Self {
        self.behavior.reject_produce.insert(kind);
        self
    }

    #[must_use]
    pub fn silent_produce(mut self) -> Self {
        self.behavior.silent_produce = true;
        self
    }

    #[must_use]
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.behavior.connect_delay = delay;
        self
    }

    #[must_use]
    pub fn produce_delay(mut self, delay: Duration) -> Self {
        self.behavior.produce_delay = delay;
        self
    }

    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.behavior.fail_close = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MockSignaling {
        let (events, _) = broadcast::channel(16);
        MockSignaling {
            behavior: Mutex::new(self.behavior),
            events,
            open_calls: AtomicUsize::new(0),
            join_calls: AtomicUsize::new(0),
            capability_calls: AtomicUsize::new(0),
            transport_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            produce_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            produce_requests: Mutex::new(Vec::new()),
        }
    }
}
