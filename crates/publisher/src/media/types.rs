//! Negotiation data exchanged between the controller, the signaling channel
//! and the media engine.
//!
//! Negotiation parameters (ICE, DTLS, RTP) are opaque JSON documents; the
//! publisher only routes them between the engine and the server.

use crate::media::{MediaKind, StreamKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a producer lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    /// Create a new random lease ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an acquired capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureId(pub Uuid);

impl CaptureId {
    /// Create a new random capture ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CaptureId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity acknowledged by the server on join. Immutable once joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    /// Server-acknowledged participant (peer) id.
    pub participant_id: String,
    pub role: String,
}

/// Media encodings accepted by the routing server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(rename = "rtpCapabilities")]
    pub rtp_capabilities: Value,
}

/// DTLS parameters offered by the engine during connect negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

/// RTP parameters offered by the engine during produce negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

/// Negotiation parameters of one send-only transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDescriptor {
    #[serde(rename = "id")]
    pub transport_id: String,
    pub ice_parameters: Value,
    #[serde(default)]
    pub ice_candidates: Vec<Value>,
    pub dtls_parameters: DtlsParameters,
}

/// Application data attached to every produced stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    #[serde(rename = "streamType")]
    pub stream_kind: StreamKind,
}

/// What the engine offers when it needs a produce negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceOffer {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: AppData,
}
