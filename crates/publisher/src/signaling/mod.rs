//! Signaling channel abstraction.
//!
//! The controller talks to the routing server exclusively through
//! [`SignalingChannel`]. [`HttpSignalingChannel`] speaks the server's REST
//! surface; tests use the scriptable mock in `publisher-test-utils`.

mod http;

pub use http::HttpSignalingChannel;

use crate::media::{
    CapabilitySet, DtlsParameters, MediaKind, RtpParameters, SessionIdentity, StreamKind,
    TransportDescriptor,
};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Signaling channel errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// The server could not be reached.
    #[error("Signaling server unavailable: {0}")]
    Unavailable(String),

    /// The server answered and refused the request.
    #[error("Request rejected by server: {0}")]
    Rejected(String),

    /// The server's answer could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The channel has not been opened or was closed.
    #[error("Signaling channel is not open")]
    NotOpen,
}

/// Push events delivered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// The channel to the server was lost.
    Disconnected { reason: String },
}

/// Join request as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub session_id: String,
    pub participant_id: String,
    pub role: String,
}

/// Produce request as sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceRequest {
    pub participant_id: String,
    pub session_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub stream_kind: StreamKind,
}

/// Control connection to the routing server.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Open the channel to `address`.
    async fn open(&self, address: &str) -> Result<(), SignalingError>;

    /// Join a session and wait for the acknowledged identity.
    async fn send_join(&self, request: JoinRequest) -> Result<SessionIdentity, SignalingError>;

    /// Fetch the server's capability set.
    async fn fetch_capabilities(&self) -> Result<CapabilitySet, SignalingError>;

    /// Request the send transport descriptor for a participant.
    async fn request_transport(
        &self,
        participant_id: &str,
    ) -> Result<TransportDescriptor, SignalingError>;

    /// Forward the engine's DTLS parameters; resolves on acknowledgment.
    async fn connect_transport(
        &self,
        participant_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalingError>;

    /// Ask the server to create a producer; returns its id.
    async fn request_produce(&self, request: ProduceRequest) -> Result<String, SignalingError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), SignalingError>;

    /// Subscribe to push events.
    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;
}
