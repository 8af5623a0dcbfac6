//! Session lifecycle tests: connect, join, transport preparation and teardown.
//!
//! Collaborators are the mocks from `publisher-test-utils`. Timeout tests run
//! with paused time so they complete instantly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use publisher::capture::MediaTrack;
use publisher::media::StreamKind;
use publisher::session::{LeaseEvent, LeaseState, SessionState};
use publisher::PublisherError;
use publisher_test_utils::*;
use tokio::sync::broadcast;

/// Lease events received so far, as (kind, state) pairs.
fn drain(events: &mut broadcast::Receiver<LeaseEvent>) -> Vec<(StreamKind, LeaseState)> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.kind, event.state));
    }
    seen
}

async fn wait_for_state(rig: &TestRig, target: SessionState) {
    let mut states = rig.controller.subscribe_state();
    tokio::time::timeout(Duration::from_secs(1), states.wait_for(|s| *s == target))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_publish_duplicate_and_stop_camera() {
    let rig = TestRig::new();
    let mut events = rig.controller.subscribe_leases();

    rig.controller.connect(TEST_SERVER).await.unwrap();
    assert_eq!(rig.controller.state(), SessionState::Connected);

    let identity = rig
        .controller
        .join("exam-1", "alice", "student")
        .await
        .unwrap();
    assert_eq!(identity.session_id, "exam-1");
    assert_eq!(identity.participant_id, "alice");
    assert_eq!(identity.role, "student");
    assert_eq!(rig.controller.state(), SessionState::CapabilityFetch);

    rig.controller.prepare_transport().await.unwrap();
    assert_eq!(rig.controller.state(), SessionState::TransportReady);

    let camera = TestCapture::camera();
    let leases = rig
        .controller
        .start_publishing(StreamKind::CameraVideo, &camera.handle)
        .await
        .unwrap();

    let video = leases
        .iter()
        .find(|l| l.kind == StreamKind::CameraVideo)
        .unwrap();
    assert_eq!(video.state, LeaseState::Active);
    assert!(!video.remote_producer_id.as_deref().unwrap_or_default().is_empty());
    assert_eq!(rig.controller.state(), SessionState::Publishing);

    let second = TestCapture::camera();
    let duplicate = rig
        .controller
        .start_publishing(StreamKind::CameraVideo, &second.handle)
        .await;
    assert_eq!(
        duplicate,
        Err(PublisherError::DuplicateStreamKind(StreamKind::CameraVideo))
    );

    rig.controller
        .stop_publishing(StreamKind::CameraVideo)
        .await
        .unwrap();
    assert_eq!(rig.controller.state(), SessionState::TransportReady);
    assert!(rig.controller.snapshot().await.leases.is_empty());
    assert!(camera.video.as_ref().unwrap().is_stopped());
    assert_eq!(second.video_stops(), 0);

    assert_eq!(
        drain(&mut events),
        vec![
            (StreamKind::CameraVideo, LeaseState::Negotiating),
            (StreamKind::CameraAudio, LeaseState::Negotiating),
            (StreamKind::CameraVideo, LeaseState::Active),
            (StreamKind::CameraAudio, LeaseState::Active),
            (StreamKind::CameraVideo, LeaseState::Closed),
            (StreamKind::CameraAudio, LeaseState::Closed),
        ]
    );
}

#[tokio::test]
async fn test_join_uses_server_assigned_participant_id() {
    let rig = TestRig::builder()
        .signaling(MockSignaling::builder().assigning_peer_id("peer-7").build())
        .build();
    rig.ready().await;

    let identity = rig.controller.identity().await.unwrap();
    assert_eq!(identity.participant_id, "peer-7");

    let camera = TestCapture::camera();
    rig.controller
        .start_publishing(StreamKind::CameraVideo, &camera.handle)
        .await
        .unwrap();

    let requests = rig.signaling.produce_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.participant_id == "peer-7"));
    assert!(requests.iter().all(|r| r.session_id == TEST_SESSION));
}

// ============================================================================
// Connect / join failures
// ============================================================================

#[tokio::test]
async fn test_connect_failure_is_retryable() {
    let rig = TestRig::builder()
        .signaling(MockSignaling::builder().failing_open().build())
        .build();

    let result = rig.controller.connect(TEST_SERVER).await;
    assert!(matches!(result, Err(PublisherError::SignalingUnavailable(_))));
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(rig.controller.state(), SessionState::Connecting);

    rig.signaling.configure(|b| b.fail_open = false);
    rig.controller.connect(TEST_SERVER).await.unwrap();
    assert_eq!(rig.controller.state(), SessionState::Connected);
    assert_eq!(rig.signaling.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_join_timeout_leaves_join_retryable() {
    let rig = TestRig::builder()
        .signaling(MockSignaling::builder().silent_join().build())
        .build();
    rig.controller.connect(TEST_SERVER).await.unwrap();

    let result = rig
        .controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await;
    assert_eq!(result, Err(PublisherError::JoinTimeout(TEST_TIMEOUT)));
    assert_ne!(rig.controller.state(), SessionState::Disconnected);
    assert_eq!(rig.controller.state(), SessionState::Joining);
    assert!(rig.controller.identity().await.is_none());

    rig.signaling.configure(|b| b.silent_join = false);
    rig.controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await
        .unwrap();
    assert_eq!(rig.controller.state(), SessionState::CapabilityFetch);
    assert_eq!(rig.signaling.join_count(), 2);
}

#[tokio::test]
async fn test_join_rejected() {
    let rig = TestRig::builder()
        .signaling(MockSignaling::builder().rejecting_join("exam is closed").build())
        .build();
    rig.controller.connect(TEST_SERVER).await.unwrap();

    let result = rig
        .controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await;
    assert_eq!(
        result,
        Err(PublisherError::JoinRejected("exam is closed".to_string()))
    );
    assert!(!result.unwrap_err().is_retryable());
}

// ============================================================================
// Transport preparation
// ============================================================================

#[tokio::test]
async fn test_capability_failure_is_retryable() {
    let rig = TestRig::builder()
        .signaling(MockSignaling::builder().failing_capabilities().build())
        .build();
    rig.controller.connect(TEST_SERVER).await.unwrap();
    rig.controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await
        .unwrap();

    let result = rig.controller.prepare_transport().await;
    assert!(matches!(result, Err(PublisherError::CapabilityUnavailable(_))));
    assert_eq!(rig.controller.state(), SessionState::CapabilityFetch);

    rig.signaling.configure(|b| b.fail_capabilities = false);
    rig.controller.prepare_transport().await.unwrap();
    assert_eq!(rig.controller.state(), SessionState::TransportReady);
}

#[tokio::test]
async fn test_capabilities_are_fetched_once_across_retries() {
    let rig = TestRig::builder()
        .engine(MockMediaEngine::builder().failing_load().build())
        .build();
    rig.controller.connect(TEST_SERVER).await.unwrap();
    rig.controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await
        .unwrap();

    let result = rig.controller.prepare_transport().await;
    assert!(matches!(result, Err(PublisherError::CapabilityUnavailable(_))));

    rig.engine.set_fail_load(false);
    rig.controller.prepare_transport().await.unwrap();

    assert_eq!(rig.signaling.capability_count(), 1);
    assert_eq!(rig.engine.load_count(), 2);
}

#[tokio::test]
async fn test_transport_failures() {
    let rig = TestRig::builder()
        .signaling(MockSignaling::builder().failing_transport().build())
        .build();
    rig.controller.connect(TEST_SERVER).await.unwrap();
    rig.controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await
        .unwrap();

    let result = rig.controller.prepare_transport().await;
    assert!(matches!(result, Err(PublisherError::TransportSetupFailed(_))));
    assert_eq!(rig.controller.state(), SessionState::CapabilityFetch);

    let rig = TestRig::builder()
        .engine(MockMediaEngine::builder().failing_create_transport().build())
        .build();
    rig.controller.connect(TEST_SERVER).await.unwrap();
    rig.controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await
        .unwrap();

    let result = rig.controller.prepare_transport().await;
    assert!(matches!(result, Err(PublisherError::TransportSetupFailed(_))));
    assert_eq!(rig.engine.transport_count(), 0);
}

// ============================================================================
// State guards
// ============================================================================

#[tokio::test]
async fn test_operations_rejected_in_wrong_state() {
    let rig = TestRig::new();

    let join = rig
        .controller
        .join(TEST_SESSION, TEST_PARTICIPANT, TEST_ROLE)
        .await;
    assert_eq!(
        join,
        Err(PublisherError::InvalidState {
            operation: "join",
            state: SessionState::Idle,
        })
    );

    let prepare = rig.controller.prepare_transport().await;
    assert_eq!(
        prepare,
        Err(PublisherError::InvalidState {
            operation: "prepare_transport",
            state: SessionState::Idle,
        })
    );

    let camera = TestCapture::camera();
    let publish = rig
        .controller
        .start_publishing(StreamKind::CameraVideo, &camera.handle)
        .await;
    assert_eq!(
        publish,
        Err(PublisherError::InvalidState {
            operation: "start_publishing",
            state: SessionState::Idle,
        })
    );

    rig.ready().await;
    let connect = rig.controller.connect(TEST_SERVER).await;
    assert!(matches!(
        connect,
        Err(PublisherError::InvalidState {
            operation: "connect",
            ..
        })
    ));
    assert_eq!(rig.signaling.open_count(), 1);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_disconnect_closes_everything_once() {
    let rig = TestRig::new();
    rig.ready().await;
    let mut events = rig.controller.subscribe_leases();

    let camera = TestCapture::camera();
    let screen = TestCapture::screen();
    rig.controller
        .start_publishing(StreamKind::CameraVideo, &camera.handle)
        .await
        .unwrap();
    rig.controller
        .start_publishing(StreamKind::ScreenVideo, &screen.handle)
        .await
        .unwrap();
    drain(&mut events);

    rig.controller.disconnect().await.unwrap();
    assert_eq!(rig.controller.state(), SessionState::Disconnected);
    assert!(rig.controller.identity().await.is_none());
    assert!(rig.controller.snapshot().await.leases.is_empty());

    let closed = drain(&mut events);
    assert_eq!(closed.len(), 3);
    assert!(closed.iter().all(|(_, state)| *state == LeaseState::Closed));

    let transport = rig.engine.transport().unwrap();
    assert!(transport.is_closed());
    assert!(transport.produced().iter().all(|p| p.close_count() == 1));
    assert_eq!(rig.signaling.close_count(), 1);

    // Idempotent.
    rig.controller.disconnect().await.unwrap();
    assert_eq!(rig.signaling.close_count(), 1);
    assert_eq!(transport.close_count(), 1);
    assert!(drain(&mut events).is_empty());

    let after = rig
        .controller
        .start_publishing(StreamKind::ScreenVideo, &TestCapture::screen().handle)
        .await;
    assert_eq!(
        after,
        Err(PublisherError::InvalidState {
            operation: "start_publishing",
            state: SessionState::Disconnected,
        })
    );
}

#[tokio::test]
async fn test_disconnect_reports_close_failure_after_teardown() {
    let rig = TestRig::builder()
        .signaling(MockSignaling::builder().failing_close().build())
        .build();
    rig.ready().await;

    let result = rig.controller.disconnect().await;
    assert!(matches!(result, Err(PublisherError::SignalingUnavailable(_))));
    assert_eq!(rig.controller.state(), SessionState::Disconnected);
    assert!(rig.engine.transport().unwrap().is_closed());
}

#[tokio::test]
async fn test_disconnect_before_connect() {
    let rig = TestRig::new();
    rig.controller.disconnect().await.unwrap();
    assert_eq!(rig.controller.state(), SessionState::Disconnected);

    let connect = rig.controller.connect(TEST_SERVER).await;
    assert!(matches!(connect, Err(PublisherError::InvalidState { .. })));
}

#[tokio::test]
async fn test_signaling_loss_tears_down_session() {
    let rig = TestRig::new();
    rig.ready().await;

    let camera = TestCapture::camera();
    rig.controller
        .start_publishing(StreamKind::CameraVideo, &camera.handle)
        .await
        .unwrap();

    rig.signaling.emit_disconnect("server restarted");
    wait_for_state(&rig, SessionState::Disconnected).await;

    let transport = rig.engine.transport().unwrap();
    assert!(transport.is_closed());
    assert!(transport.produced().iter().all(|p| p.close_count() == 1));
    assert!(camera.video.as_ref().unwrap().is_stopped());
    assert!(camera.audio.as_ref().unwrap().is_stopped());

    // The channel is already gone; nothing closes it again.
    assert_eq!(rig.signaling.close_count(), 0);
    rig.controller.disconnect().await.unwrap();
    assert_eq!(rig.signaling.close_count(), 0);
}

#[tokio::test]
async fn test_snapshot_reflects_session() {
    let rig = TestRig::new();
    rig.ready().await;

    let screen = TestCapture::screen_with_audio();
    rig.controller
        .start_publishing(StreamKind::ScreenVideo, &screen.handle)
        .await
        .unwrap();

    let snapshot = rig.controller.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Publishing);
    assert_eq!(snapshot.identity, Some(test_identity()));
    assert_eq!(snapshot.leases.len(), 2);
    assert_eq!(
        snapshot.lease(StreamKind::ScreenAudio).map(|l| l.state),
        Some(LeaseState::Active)
    );
    assert!(snapshot.lease(StreamKind::CameraVideo).is_none());
}
