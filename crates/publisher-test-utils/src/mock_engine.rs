//! Mock media engine.
//!
//! The send transport drives the negotiator the way a real engine does: DTLS
//! connect before each produce (the negotiator collapses repeats), then one
//! produce negotiation per track.

use async_trait::async_trait;
use publisher::engine::{
    EngineError, LocalProducer, MediaEngine, ProduceOptions, SendTransport, TransportNegotiator,
};
use publisher::media::{
    CapabilitySet, DtlsParameters, MediaKind, ProduceOffer, RtpParameters, StreamKind,
    TransportDescriptor,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock [`MediaEngine`].
pub struct MockMediaEngine {
    fail_load: AtomicBool,
    fail_create_transport: bool,
    cannot_produce: HashSet<MediaKind>,
    loads: AtomicUsize,
    transports: Mutex<Vec<Arc<MockSendTransport>>>,
}

impl MockMediaEngine {
    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    /// An engine that can produce everything.
    #[must_use]
    pub fn capable() -> Self {
        Self::builder().build()
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn transport_count(&self) -> usize {
        self.transports.lock().unwrap().len()
    }

    /// The most recently created send transport.
    pub fn transport(&self) -> Option<Arc<MockSendTransport>> {
        self.transports.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn load_capabilities(&self, capabilities: &CapabilitySet) -> Result<(), EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(EngineError::Capabilities(
                "unsupported codec set".to_string(),
            ));
        }
        if !capabilities.rtp_capabilities.is_object() {
            return Err(EngineError::Capabilities(
                "capabilities are not an object".to_string(),
            ));
        }
        Ok(())
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        !self.cannot_produce.contains(&kind)
    }

    async fn create_send_transport(
        &self,
        descriptor: &TransportDescriptor,
        negotiator: Arc<dyn TransportNegotiator>,
    ) -> Result<Arc<dyn SendTransport>, EngineError> {
        if self.fail_create_transport {
            return Err(EngineError::Transport(
                "ice parameters rejected".to_string(),
            ));
        }

        let transport = Arc::new(MockSendTransport {
            id: descriptor.transport_id.clone(),
            negotiator,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            producers: Mutex::new(Vec::new()),
        });
        self.transports.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Builder for [`MockMediaEngine`].
#[derive(Debug, Default)]
pub struct MockMediaEngineBuilder {
    fail_load: bool,
    fail_create_transport: bool,
    cannot_produce: HashSet<MediaKind>,
}

impl MockMediaEngineBuilder {
    #[must_use]
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    #[must_use]
    pub fn failing_create_transport(mut self) -> Self {
        self.fail_create_transport = true;
        self
    }

    #[must_use]
    pub fn cannot_produce(mut self, kind: MediaKind) -> Self {
        self.cannot_produce.insert(kind);
        self
    }

    #[must_use]
    pub fn build(self) -> MockMediaEngine {
        MockMediaEngine {
            fail_load: AtomicBool::new(self.fail_load),
            fail_create_transport: self.fail_create_transport,
            cannot_produce: self.cannot_produce,
            loads: AtomicUsize::new(0),
            transports: Mutex::new(Vec::new()),
        }
    }
}

/// What a [`MockSendTransport`] produced.
#[derive(Debug, Clone)]
pub struct ProducedRecord {
    pub producer_id: String,
    pub stream_kind: StreamKind,
    pub track_id: String,
    pub closes: Arc<AtomicUsize>,
}

impl ProducedRecord {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Mock [`SendTransport`].
pub struct MockSendTransport {
    id: String,
    negotiator: Arc<dyn TransportNegotiator>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    producers: Mutex<Vec<ProducedRecord>>,
}

impl MockSendTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn produced(&self) -> Vec<ProducedRecord> {
        self.producers.lock().unwrap().clone()
    }

    pub fn produced_for(&self, kind: StreamKind) -> Vec<ProducedRecord> {
        self.produced()
            .into_iter()
            .filter(|record| record.stream_kind == kind)
            .collect()
    }

    /// The negotiator the controller wired into this transport.
    pub fn negotiator(&self) -> Arc<dyn TransportNegotiator> {
        Arc::clone(&self.negotiator)
    }
}

#[async_trait]
impl SendTransport for MockSendTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn produce(&self, options: ProduceOptions) -> Result<Box<dyn LocalProducer>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Transport("transport closed".to_string()));
        }

        self.negotiator
            .on_connect(DtlsParameters(json!({
                "role": "client",
                "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB" }]
            })))
            .await?;

        let kind = options.track.media_kind();
        let offer = ProduceOffer {
            kind,
            rtp_parameters: RtpParameters(json!({
                "mid": options.app_data.stream_kind.as_str(),
                "encodings": [{ "maxBitrate": options.encoding.max_bitrate_bps }]
            })),
            app_data: options.app_data,
        };
        let producer_id = self.negotiator.on_produce(offer).await?;

        let closes = Arc::new(AtomicUsize::new(0));
        self.producers.lock().unwrap().push(ProducedRecord {
            producer_id: producer_id.clone(),
            stream_kind: options.app_data.stream_kind,
            track_id: options.track.id().to_string(),
            closes: Arc::clone(&closes),
        });

        Ok(Box::new(MockProducer {
            id: producer_id,
            closes,
        }))
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Mock [`LocalProducer`] sharing its close counter with a [`ProducedRecord`].
pub struct MockProducer {
    id: String,
    closes: Arc<AtomicUsize>,
}

impl LocalProducer for MockProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
