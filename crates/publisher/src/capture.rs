//! Stream capture adapter.
//!
//! Wraps acquisition of local media (camera+mic, or screen+optional system
//! audio) into a [`CaptureHandle`] exposing its tracks and a single "ended"
//! signal that fires when the underlying source becomes unavailable (device
//! unplugged, user stopped sharing).

use crate::media::{CaptureId, MediaKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default camera capture width.
pub const DEFAULT_CAMERA_WIDTH: u32 = 640;

/// Default camera capture height.
pub const DEFAULT_CAMERA_HEIGHT: u32 = 480;

/// Default screen capture width.
pub const DEFAULT_SCREEN_WIDTH: u32 = 1280;

/// Default screen capture height.
pub const DEFAULT_SCREEN_HEIGHT: u32 = 720;

/// A local media track.
pub trait MediaTrack: fmt::Debug + Send + Sync {
    fn id(&self) -> &str;

    fn media_kind(&self) -> MediaKind;

    /// Stop the track. Must be idempotent.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Requested video resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

/// What to acquire from the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRequest {
    /// Camera video plus microphone.
    Camera { video: VideoConstraints, audio: bool },
    /// Screen video plus optional system audio.
    Screen { video: VideoConstraints, audio: bool },
}

impl CaptureRequest {
    /// Camera at 640x480 with microphone.
    #[must_use]
    pub const fn camera() -> Self {
        CaptureRequest::Camera {
            video: VideoConstraints {
                width: DEFAULT_CAMERA_WIDTH,
                height: DEFAULT_CAMERA_HEIGHT,
            },
            audio: true,
        }
    }

    /// Screen at 1280x720, system audio only when asked for.
    #[must_use]
    pub const fn screen(with_audio: bool) -> Self {
        CaptureRequest::Screen {
            video: VideoConstraints {
                width: DEFAULT_SCREEN_WIDTH,
                height: DEFAULT_SCREEN_HEIGHT,
            },
            audio: with_audio,
        }
    }

    #[must_use]
    pub const fn wants_audio(&self) -> bool {
        match self {
            CaptureRequest::Camera { audio, .. } | CaptureRequest::Screen { audio, .. } => *audio,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CaptureRequest::Camera { .. } => "camera",
            CaptureRequest::Screen { .. } => "screen",
        }
    }
}

/// Tracks as returned by a capture source.
#[derive(Debug)]
pub struct RawCapture {
    pub video: Option<Arc<dyn MediaTrack>>,
    pub audio: Option<Arc<dyn MediaTrack>>,
    /// Cancelled by the source when the capture becomes unavailable.
    pub ended: CancellationToken,
}

/// Capture acquisition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture permission denied: {0}")]
    Denied(String),

    #[error("capture yielded no video track")]
    NoVideoTrack,

    #[error("capture device error: {0}")]
    Device(String),
}

/// Platform access to camera, microphone and screen.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire(&self, request: &CaptureRequest) -> Result<RawCapture, CaptureError>;
}

/// An acquired capture: tracks plus an end-of-source signal.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    id: CaptureId,
    video: Option<Arc<dyn MediaTrack>>,
    audio: Option<Arc<dyn MediaTrack>>,
    ended: CancellationToken,
}

impl CaptureHandle {
    /// Wrap tracks obtained outside a [`CaptureAdapter`].
    pub fn new(
        video: Option<Arc<dyn MediaTrack>>,
        audio: Option<Arc<dyn MediaTrack>>,
        ended: CancellationToken,
    ) -> Self {
        Self {
            id: CaptureId::new(),
            video,
            audio,
            ended,
        }
    }

    pub fn id(&self) -> CaptureId {
        self.id
    }

    pub fn video_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.video.as_ref()
    }

    pub fn audio_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.audio.as_ref()
    }

    /// Token cancelled when the source becomes unavailable.
    pub fn ended(&self) -> CancellationToken {
        self.ended.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    /// Stop every track of this capture.
    pub fn release(&self) {
        for track in self.video.iter().chain(self.audio.iter()) {
            track.stop();
        }
        debug!(target: "publisher.capture", capture_id = %self.id, "Capture released");
    }
}

/// Acquires captures from a [`CaptureSource`] and validates what it returns.
#[derive(Clone)]
pub struct CaptureAdapter {
    source: Arc<dyn CaptureSource>,
}

impl CaptureAdapter {
    pub fn new(source: Arc<dyn CaptureSource>) -> Self {
        Self { source }
    }

    /// Acquire a capture.
    ///
    /// # Errors
    ///
    /// Returns the source's error, or `CaptureError::NoVideoTrack` when the
    /// source yields no video. A missing audio track is tolerated.
    pub async fn acquire(&self, request: CaptureRequest) -> Result<CaptureHandle, CaptureError> {
        let raw = self.source.acquire(&request).await?;

        let Some(video) = raw.video else {
            if let Some(audio) = &raw.audio {
                audio.stop();
            }
            warn!(
                target: "publisher.capture",
                source = request.as_str(),
                "Capture yielded no video track"
            );
            return Err(CaptureError::NoVideoTrack);
        };

        if request.wants_audio() && raw.audio.is_none() {
            warn!(
                target: "publisher.capture",
                source = request.as_str(),
                "Audio requested but capture has no audio track, continuing without"
            );
        }

        let handle = CaptureHandle::new(Some(video), raw.audio, raw.ended);

        debug!(
            target: "publisher.capture",
            capture_id = %handle.id(),
            source = request.as_str(),
            has_audio = handle.audio_track().is_some(),
            "Capture acquired"
        );

        Ok(handle)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeTrack {
        kind: MediaKind,
        stopped: AtomicBool,
    }

    impl FakeTrack {
        fn new(kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl MediaTrack for FakeTrack {
        fn id(&self) -> &str {
            "fake"
        }

        fn media_kind(&self) -> MediaKind {
            self.kind
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    /// Hands out a prepared capture once.
    struct OneShotSource(Mutex<Option<Result<RawCapture, CaptureError>>>);

    #[async_trait]
    impl CaptureSource for OneShotSource {
        async fn acquire(&self, _request: &CaptureRequest) -> Result<RawCapture, CaptureError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(CaptureError::Device("exhausted".to_string())))
        }
    }

    fn adapter(result: Result<RawCapture, CaptureError>) -> CaptureAdapter {
        CaptureAdapter::new(Arc::new(OneShotSource(Mutex::new(Some(result)))))
    }

    #[test]
    fn test_default_requests() {
        assert_eq!(
            CaptureRequest::camera(),
            CaptureRequest::Camera {
                video: VideoConstraints {
                    width: 640,
                    height: 480
                },
                audio: true
            }
        );
        assert!(!CaptureRequest::screen(false).wants_audio());
        assert!(CaptureRequest::screen(true).wants_audio());
    }

    #[tokio::test]
    async fn test_acquire_with_both_tracks() {
        let video = FakeTrack::new(MediaKind::Video);
        let audio = FakeTrack::new(MediaKind::Audio);
        let adapter = adapter(Ok(RawCapture {
            video: Some(video),
            audio: Some(audio),
            ended: CancellationToken::new(),
        }));

        let handle = adapter.acquire(CaptureRequest::camera()).await.unwrap();
        assert!(handle.video_track().is_some());
        assert!(handle.audio_track().is_some());
        assert!(!handle.is_ended());
    }

    #[tokio::test]
    async fn test_missing_video_fails_and_stops_audio() {
        let audio = FakeTrack::new(MediaKind::Audio);
        let adapter = adapter(Ok(RawCapture {
            video: None,
            audio: Some(audio.clone()),
            ended: CancellationToken::new(),
        }));

        let result = adapter.acquire(CaptureRequest::camera()).await;
        assert_eq!(result.unwrap_err(), CaptureError::NoVideoTrack);
        assert!(audio.is_stopped());
    }

    #[tokio::test]
    async fn test_missing_audio_is_tolerated() {
        let adapter = adapter(Ok(RawCapture {
            video: Some(FakeTrack::new(MediaKind::Video)),
            audio: None,
            ended: CancellationToken::new(),
        }));

        let handle = adapter.acquire(CaptureRequest::screen(true)).await.unwrap();
        assert!(handle.audio_track().is_none());
    }

    #[tokio::test]
    async fn test_source_error_is_propagated() {
        let adapter = adapter(Err(CaptureError::Denied("user dismissed".to_string())));
        let result = adapter.acquire(CaptureRequest::screen(false)).await;
        assert!(matches!(result, Err(CaptureError::Denied(_))));
    }

    #[test]
    fn test_release_stops_all_tracks() {
        let video = FakeTrack::new(MediaKind::Video);
        let audio = FakeTrack::new(MediaKind::Audio);
        let handle = CaptureHandle::new(
            Some(video.clone()),
            Some(audio.clone()),
            CancellationToken::new(),
        );

        handle.release();
        assert!(video.is_stopped());
        assert!(audio.is_stopped());
    }
}
