//! Pre-configured test data.
//!
//! Provides:
//! - A config with short uniform timeouts
//! - Capability set and transport descriptor payloads
//! - Capture handles backed by [`MockTrack`]s
//! - [`TestRig`], a controller wired to mocks

use crate::mock_capture::{MockCaptureSource, MockTrack};
use crate::mock_engine::MockMediaEngine;
use crate::mock_signaling::MockSignaling;
use publisher::capture::{CaptureHandle, MediaTrack};
use publisher::config::{Config, Timeouts};
use publisher::media::{CapabilitySet, DtlsParameters, SessionIdentity, TransportDescriptor};
use publisher::SessionController;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Address tests connect to. Never dialled; mocks ignore it.
pub const TEST_SERVER: &str = "http://signal.test:3000";

pub const TEST_SESSION: &str = "exam-1";
pub const TEST_PARTICIPANT: &str = "alice";
pub const TEST_ROLE: &str = "student";

/// Timeout every negotiation step uses in [`test_config`].
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Config with [`TEST_TIMEOUT`] for every step.
#[must_use]
pub fn test_config() -> Config {
    Config::with_timeouts(TEST_SERVER, Timeouts::uniform(TEST_TIMEOUT))
}

#[must_use]
pub fn sample_capabilities() -> CapabilitySet {
    CapabilitySet {
        rtp_capabilities: json!({
            "codecs": [
                { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
            ],
            "headerExtensions": []
        }),
    }
}

#[must_use]
pub fn sample_descriptor() -> TransportDescriptor {
    TransportDescriptor {
        transport_id: "send-transport-1".to_string(),
        ice_parameters: json!({ "usernameFragment": "frag", "password": "pw", "iceLite": true }),
        ice_candidates: vec![json!({
            "foundation": "udpcandidate",
            "ip": "203.0.113.7",
            "port": 40000,
            "protocol": "udp",
            "type": "host"
        })],
        dtls_parameters: DtlsParameters(json!({
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": "CC:DD" }]
        })),
    }
}

#[must_use]
pub fn test_identity() -> SessionIdentity {
    SessionIdentity {
        session_id: TEST_SESSION.to_string(),
        participant_id: TEST_PARTICIPANT.to_string(),
        role: TEST_ROLE.to_string(),
    }
}

/// A capture handle plus the mock tracks and end signal behind it.
#[derive(Debug, Clone)]
pub struct TestCapture {
    pub handle: CaptureHandle,
    pub video: Option<Arc<MockTrack>>,
    pub audio: Option<Arc<MockTrack>>,
    pub ended: CancellationToken,
}

impl TestCapture {
    #[must_use]
    pub fn new(with_video: bool, with_audio: bool) -> Self {
        let video = with_video.then(MockTrack::video);
        let audio = with_audio.then(MockTrack::audio);
        let ended = CancellationToken::new();
        let handle = CaptureHandle::new(
            video.clone().map(|t| t as Arc<dyn MediaTrack>),
            audio.clone().map(|t| t as Arc<dyn MediaTrack>),
            ended.clone(),
        );
        Self {
            handle,
            video,
            audio,
            ended,
        }
    }

    /// Camera with microphone.
    #[must_use]
    pub fn camera() -> Self {
        Self::new(true, true)
    }

    /// Screen without system audio.
    #[must_use]
    pub fn screen() -> Self {
        Self::new(true, false)
    }

    #[must_use]
    pub fn screen_with_audio() -> Self {
        Self::new(true, true)
    }

    /// Simulate the source becoming unavailable.
    pub fn end(&self) {
        self.ended.cancel();
    }

    pub fn video_stops(&self) -> usize {
        self.video.as_ref().map_or(0, |t| t.stop_count())
    }

    pub fn audio_stops(&self) -> usize {
        self.audio.as_ref().map_or(0, |t| t.stop_count())
    }
}

/// A controller wired to mocks, with handles to each mock.
pub struct TestRig {
    pub controller: SessionController,
    pub signaling: Arc<MockSignaling>,
    pub engine: Arc<MockMediaEngine>,
    pub capture_source: Arc<MockCaptureSource>,
}

impl TestRig {
    #[must_use]
    pub fn builder() -> TestRigBuilder {
        TestRigBuilder::default()
    }

    /// A rig where every collaborator succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Drive the controller to `TransportReady` as `alice` in `exam-1`.
    ///
    /// # Panics
    ///
    /// Panics if any step fails.
    pub async fn ready(&self) {
        self.controller.connect(TEST_SERVER).await.unwrap();
        self.controller
            .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
            .await
            .unwrap();
        self.controller.prepare_transport().await.unwrap();
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestRig`].
#[derive(Default)]
pub struct TestRigBuilder {
    config: Option<Config>,
    signaling: Option<MockSignaling>,
    engine: Option<MockMediaEngine>,
    capture_source: Option<MockCaptureSource>,
}

impl TestRigBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn signaling(mut self, signaling: MockSignaling) -> Self {
        self.signaling = Some(signaling);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: MockMediaEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn capture_source(mut self, source: MockCaptureSource) -> Self {
        self.capture_source = Some(source);
        self
    }

    #[must_use]
    pub fn build(self) -> TestRig {
        let signaling = Arc::new(self.signaling.unwrap_or_else(MockSignaling::accepting));
        let engine = Arc::new(self.engine.unwrap_or_else(MockMediaEngine::capable));
        let capture_source =
            Arc::new(self.capture_source.unwrap_or_else(MockCaptureSource::granting));

        let controller = SessionController::with_capture_source(
            self.config.unwrap_or_else(test_config),
            signaling.clone(),
            engine.clone(),
            capture_source.clone(),
        );

        TestRig {
            controller,
            signaling,
            engine,
            capture_source,
        }
    }
}
