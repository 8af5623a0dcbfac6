//! Media engine abstraction.
//!
//! The engine owns the actual WebRTC machinery. It drives two negotiations
//! through the [`TransportNegotiator`] it is given when a send transport is
//! created: a DTLS connect (once per transport, on first produce) and one
//! produce negotiation per outgoing stream.

use crate::capture::MediaTrack;
use crate::media::{
    AppData, CapabilitySet, DtlsParameters, EncodingPolicy, MediaKind, ProduceOffer, StreamKind,
    TransportDescriptor,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of one negotiation callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("connect rejected: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("produce rejected: {0}")]
    Produce(String),

    #[error("produce timed out after {0:?}")]
    ProduceTimeout(Duration),

    #[error("produce already in flight for {0}")]
    ProduceInFlight(StreamKind),
}

impl NegotiationError {
    /// Whether the failure happened during connect negotiation.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            NegotiationError::Connect(_) | NegotiationError::ConnectTimeout(_)
        )
    }
}

/// Media engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("capabilities rejected: {0}")]
    Capabilities(String),

    #[error("engine cannot produce {0}")]
    CannotProduce(MediaKind),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("track error: {0}")]
    Track(String),
}

/// Callbacks the engine invokes while negotiating a send transport.
#[async_trait]
pub trait TransportNegotiator: Send + Sync {
    /// Deliver local DTLS parameters; resolves once the server acknowledged.
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), NegotiationError>;

    /// Request a remote producer; resolves with its server-assigned id.
    async fn on_produce(&self, offer: ProduceOffer) -> Result<String, NegotiationError>;
}

/// What the engine needs to start sending one track.
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: Arc<dyn MediaTrack>,
    pub encoding: EncodingPolicy,
    pub app_data: AppData,
}

/// A local producer created by the engine.
pub trait LocalProducer: Send + Sync {
    /// Server-assigned producer id.
    fn id(&self) -> &str;

    /// Stop sending. Called at most once by the lease.
    fn close(&self);
}

/// Outgoing transport created by the engine.
#[async_trait]
pub trait SendTransport: Send + Sync {
    fn id(&self) -> &str;

    /// Start sending a track. Drives connect (first use) and produce
    /// negotiation through the transport's negotiator.
    async fn produce(&self, options: ProduceOptions) -> Result<Box<dyn LocalProducer>, EngineError>;

    /// Close the transport.
    fn close(&self);
}

/// Local media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Load the server's capability set. Must precede transport creation.
    async fn load_capabilities(&self, capabilities: &CapabilitySet) -> Result<(), EngineError>;

    /// Whether the loaded capabilities allow producing this media kind.
    fn can_produce(&self, kind: MediaKind) -> bool;

    /// Create a send transport wired to `negotiator`.
    async fn create_send_transport(
        &self,
        descriptor: &TransportDescriptor,
        negotiator: Arc<dyn TransportNegotiator>,
    ) -> Result<Arc<dyn SendTransport>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failures_are_classified() {
        assert!(NegotiationError::Connect("dtls".to_string()).is_connect());
        assert!(NegotiationError::ConnectTimeout(Duration::from_secs(1)).is_connect());
        assert!(!NegotiationError::Produce("no router".to_string()).is_connect());
        assert!(!NegotiationError::ProduceInFlight(StreamKind::CameraVideo).is_connect());
    }

    #[test]
    fn test_engine_error_wraps_negotiation_transparently() {
        let err: EngineError = NegotiationError::Produce("denied".to_string()).into();
        assert_eq!(err.to_string(), "produce rejected: denied");
    }
}
