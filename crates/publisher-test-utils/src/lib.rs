//! # Publisher Test Utilities
//!
//! Mocks and fixtures for exercising the publisher session core without a
//! routing server, a WebRTC stack or capture devices.
//!
//! ## Modules
//!
//! - `mock_signaling` - Scriptable signaling channel with call counters
//! - `mock_engine` - Media engine whose send transport drives the negotiator
//! - `mock_capture` - Counting tracks and a capture source
//! - `fixtures` - Config, payloads, capture handles and a ready-made rig
//!
//! ## Usage
//!
//! ```rust,ignore
//! use publisher_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let rig = TestRig::builder()
//!         .signaling(MockSignaling::builder().failing_connect().build())
//!         .build();
//!     rig.ready().await;
//!
//!     let camera = TestCapture::camera();
//!     let result = rig
//!         .controller
//!         .start_publishing(StreamKind::CameraVideo, &camera.handle)
//!         .await;
//!     assert!(result.is_err());
//! }
//! ```

pub mod fixtures;
pub mod mock_capture;
pub mod mock_engine;
pub mod mock_signaling;

pub use fixtures::*;
pub use mock_capture::*;
pub use mock_engine::*;
pub use mock_signaling::*;
