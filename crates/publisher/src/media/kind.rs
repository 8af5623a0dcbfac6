//! Stream kinds, default encoding parameters and the pairing table.
//!
//! Every outgoing stream is tagged with a [`StreamKind`]. The kind decides:
//!
//! - the media kind handed to the engine (audio or video)
//! - the `streamType` tag the routing server sees on produce requests
//! - default encoding parameters
//! - pairing rules, checked centrally before any negotiation begins
//!
//! # Pairing table
//!
//! | Kind          | Requires (Negotiating/Active) | Closing it also closes |
//! |---------------|-------------------------------|------------------------|
//! | `CameraVideo` | -                             | `CameraAudio`          |
//! | `CameraAudio` | `CameraVideo`                 | -                      |
//! | `ScreenVideo` | -                             | -                      |
//! | `ScreenAudio` | -                             | -                      |

use crate::errors::PublisherError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Media kind understood by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the media kind as sent on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic category of an outgoing stream.
///
/// Serialized as the `streamType` tag used by the routing server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKind {
    #[serde(rename = "camera")]
    CameraVideo,
    #[serde(rename = "audio")]
    CameraAudio,
    #[serde(rename = "screen")]
    ScreenVideo,
    #[serde(rename = "screen-audio")]
    ScreenAudio,
}

impl StreamKind {
    /// All kinds, video before audio so teardown closes the primary first.
    pub const ALL: [StreamKind; 4] = [
        StreamKind::CameraVideo,
        StreamKind::CameraAudio,
        StreamKind::ScreenVideo,
        StreamKind::ScreenAudio,
    ];

    /// Returns the kind as a bounded metric/log label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StreamKind::CameraVideo => "camera_video",
            StreamKind::CameraAudio => "camera_audio",
            StreamKind::ScreenVideo => "screen_video",
            StreamKind::ScreenAudio => "screen_audio",
        }
    }

    /// Returns the `streamType` tag sent to the routing server.
    #[must_use]
    pub const fn wire_tag(&self) -> &'static str {
        match self {
            StreamKind::CameraVideo => "camera",
            StreamKind::CameraAudio => "audio",
            StreamKind::ScreenVideo => "screen",
            StreamKind::ScreenAudio => "screen-audio",
        }
    }

    /// Parse a `streamType` tag.
    #[must_use]
    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_tag() == tag)
    }

    /// Media kind of the track this stream carries.
    #[must_use]
    pub const fn media_kind(&self) -> MediaKind {
        match self {
            StreamKind::CameraVideo | StreamKind::ScreenVideo => MediaKind::Video,
            StreamKind::CameraAudio | StreamKind::ScreenAudio => MediaKind::Audio,
        }
    }

    /// Kind that must already be Negotiating or Active (or be admitted in the
    /// same operation) before this kind may be created.
    #[must_use]
    pub const fn requires(&self) -> Option<StreamKind> {
        match self {
            StreamKind::CameraAudio => Some(StreamKind::CameraVideo),
            _ => None,
        }
    }

    /// Kind that is closed together with this one.
    #[must_use]
    pub const fn cascades_to(&self) -> Option<StreamKind> {
        match self {
            StreamKind::CameraVideo => Some(StreamKind::CameraAudio),
            _ => None,
        }
    }

    /// Audio kind published from the same capture as this video kind.
    #[must_use]
    pub const fn companion_audio(&self) -> Option<StreamKind> {
        match self {
            StreamKind::CameraVideo => Some(StreamKind::CameraAudio),
            StreamKind::ScreenVideo => Some(StreamKind::ScreenAudio),
            _ => None,
        }
    }

    /// Default encoding parameters for this kind.
    #[must_use]
    pub const fn default_encoding(&self) -> EncodingPolicy {
        match self {
            StreamKind::CameraVideo => EncodingPolicy {
                max_bitrate_bps: 600_000,
                max_framerate: Some(30),
                prefer_detail: false,
                opus_dtx: false,
            },
            StreamKind::ScreenVideo => EncodingPolicy {
                max_bitrate_bps: 1_500_000,
                max_framerate: Some(15),
                prefer_detail: true,
                opus_dtx: false,
            },
            StreamKind::CameraAudio => EncodingPolicy {
                max_bitrate_bps: 64_000,
                max_framerate: None,
                prefer_detail: false,
                opus_dtx: true,
            },
            StreamKind::ScreenAudio => EncodingPolicy {
                max_bitrate_bps: 64_000,
                max_framerate: None,
                prefer_detail: false,
                opus_dtx: false,
            },
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding parameters handed to the media engine with each produce call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingPolicy {
    /// Upper bound for the encoder bitrate.
    pub max_bitrate_bps: u32,
    /// Upper bound for the frame rate (video only).
    pub max_framerate: Option<u32>,
    /// Favour resolution over motion (screen content).
    pub prefer_detail: bool,
    /// Enable Opus discontinuous transmission.
    pub opus_dtx: bool,
}

/// Check the pairing table for one operation.
///
/// `requested` are the kinds the operation is about to create, `occupied` the
/// kinds that already have a Negotiating or Active lease.
///
/// # Errors
///
/// Returns `PublisherError::PairingViolation` naming the first requested kind
/// whose requirement is neither occupied nor part of `requested`.
pub fn admit_pairing(
    requested: &[StreamKind],
    occupied: &HashSet<StreamKind>,
) -> Result<(), PublisherError> {
    for kind in requested {
        if let Some(required) = kind.requires() {
            if !occupied.contains(&required) && !requested.contains(&required) {
                return Err(PublisherError::PairingViolation {
                    kind: *kind,
                    requires: required,
                });
            }
        }
    }
    Ok(())
}
