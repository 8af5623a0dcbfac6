//! Mock tracks and capture source.
//!
//! [`MockTrack`] counts `stop()` calls so tests can assert a track was
//! released exactly once. [`MockCaptureSource`] remembers everything it handed
//! out, so a test can end a capture the controller acquired itself.

use async_trait::async_trait;
use publisher::capture::{CaptureError, CaptureRequest, CaptureSource, MediaTrack, RawCapture};
use publisher::media::MediaKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Track whose `stop()` calls are counted.
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: MediaKind,
    stops: AtomicUsize,
}

impl MockTrack {
    #[must_use]
    pub fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{kind}-{}", Uuid::new_v4()),
            kind,
            stops: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn video() -> Arc<Self> {
        Self::new(MediaKind::Video)
    }

    #[must_use]
    pub fn audio() -> Arc<Self> {
        Self::new(MediaKind::Audio)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn media_kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stop_count() > 0
    }
}

/// One capture handed out by [`MockCaptureSource`].
#[derive(Debug, Clone)]
pub struct AcquiredCapture {
    pub request: CaptureRequest,
    pub video: Option<Arc<MockTrack>>,
    pub audio: Option<Arc<MockTrack>>,
    pub ended: CancellationToken,
}

impl AcquiredCapture {
    /// Simulate the user revoking the capture.
    pub fn end(&self) {
        self.ended.cancel();
    }
}

/// Capture source that fabricates [`MockTrack`]s.
pub struct MockCaptureSource {
    deny: Option<String>,
    without_audio: bool,
    without_video: bool,
    acquired: Mutex<Vec<AcquiredCapture>>,
}

impl MockCaptureSource {
    #[must_use]
    pub fn builder() -> MockCaptureSourceBuilder {
        MockCaptureSourceBuilder::default()
    }

    /// A source that grants every request.
    #[must_use]
    pub fn granting() -> Self {
        Self::builder().build()
    }

    pub fn acquired(&self) -> Vec<AcquiredCapture> {
        self.acquired.lock().unwrap().clone()
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }

    pub fn last_acquired(&self) -> Option<AcquiredCapture> {
        self.acquired.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CaptureSource for MockCaptureSource {
    async fn acquire(&self, request: &CaptureRequest) -> Result<RawCapture, CaptureError> {
        if let Some(reason) = &self.deny {
            return Err(CaptureError::Denied(reason.clone()));
        }

        let video = (!self.without_video).then(MockTrack::video);
        let audio = (request.wants_audio() && !self.without_audio).then(MockTrack::audio);
        let ended = CancellationToken::new();

        self.acquired.lock().unwrap().push(AcquiredCapture {
            request: *request,
            video: video.clone(),
            audio: audio.clone(),
            ended: ended.clone(),
        });

        Ok(RawCapture {
            video: video.map(|t| t as Arc<dyn MediaTrack>),
            audio: audio.map(|t| t as Arc<dyn MediaTrack>),
            ended,
        })
    }
}

/// Builder for [`MockCaptureSource`].
#[derive(Debug, Default)]
pub struct MockCaptureSourceBuilder {
    deny: Option<String>,
    without_audio: bool,
    without_video: bool,
}

impl MockCaptureSourceBuilder {
    #[must_use]
    pub fn denying(mut self, reason: &str) -> Self {
        self.deny = Some(reason.to_string());
        self
    }

    /// Never return an audio track, even when requested.
    #[must_use]
    pub fn without_audio(mut self) -> Self {
        self.without_audio = true;
        self
    }

    #[must_use]
    pub fn without_video(mut self) -> Self {
        self.without_video = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MockCaptureSource {
        MockCaptureSource {
            deny: self.deny,
            without_audio: self.without_audio,
            without_video: self.without_video,
            acquired: Mutex::new(Vec::new()),
        }
    }
}
