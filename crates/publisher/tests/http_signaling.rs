//! HTTP signaling channel tests against a wiremock routing server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use publisher::config::{Config, Timeouts};
use publisher::media::{DtlsParameters, MediaKind, RtpParameters, StreamKind};
use publisher::signaling::{
    HttpSignalingChannel, JoinRequest, ProduceRequest, SignalingChannel, SignalingError,
    SignalingEvent,
};
use publisher::session::{SessionController, SessionState};
use publisher::PublisherError;
use publisher_test_utils::MockMediaEngine;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn open_channel(server: &MockServer) -> HttpSignalingChannel {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(server)
        .await;

    let channel = HttpSignalingChannel::new("student", Duration::from_secs(2)).unwrap();
    channel.open(&server.uri()).await.unwrap();
    channel
}

fn join_request(role: &str) -> JoinRequest {
    JoinRequest {
        session_id: "exam-1".to_string(),
        participant_id: "alice".to_string(),
        role: role.to_string(),
    }
}

#[tokio::test]
async fn test_join_sends_exam_and_user() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/join-exam"))
        .and(body_json(json!({
            "examId": "exam-1",
            "userId": "alice",
            "role": "student"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "peerId": "peer-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = channel.send_join(join_request("student")).await.unwrap();
    assert_eq!(identity.session_id, "exam-1");
    assert_eq!(identity.participant_id, "peer-42");
    assert_eq!(identity.role, "student");
}

#[tokio::test]
async fn test_join_without_peer_id_keeps_requested_id() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/join-exam"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    let identity = channel.send_join(join_request("student")).await.unwrap();
    assert_eq!(identity.participant_id, "alice");
}

#[tokio::test]
async fn test_error_status_is_rejection() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/join-exam"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "exam is closed"
        })))
        .mount(&server)
        .await;

    let result = channel.send_join(join_request("student")).await;
    assert_eq!(
        result,
        Err(SignalingError::Rejected("status 403: exam is closed".to_string()))
    );
}

#[tokio::test]
async fn test_success_false_is_rejection() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/join-exam"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "exam full"
        })))
        .mount(&server)
        .await;

    let result = channel.send_join(join_request("student")).await;
    assert_eq!(result, Err(SignalingError::Rejected("exam full".to_string())));
}

#[tokio::test]
async fn test_capabilities_and_transport_setup() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/join-exam"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "peerId": "peer-1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rtp-capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rtpCapabilities": { "codecs": [{ "mimeType": "video/VP8" }] }
        })))
        .mount(&server)
        .await;
    // Role recorded on join is used for transport setup.
    Mock::given(method("POST"))
        .and(path("/api/setup-transports"))
        .and(body_json(json!({ "peerId": "peer-1", "role": "proctor" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transports": {
                "send": {
                    "id": "send-1",
                    "iceParameters": { "usernameFragment": "u" },
                    "iceCandidates": [{ "ip": "198.51.100.1", "port": 40000 }],
                    "dtlsParameters": { "role": "auto" }
                },
                "recv": { "id": "recv-1" }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = channel.send_join(join_request("proctor")).await.unwrap();

    let capabilities = channel.fetch_capabilities().await.unwrap();
    assert!(capabilities.rtp_capabilities["codecs"].is_array());

    let descriptor = channel
        .request_transport(&identity.participant_id)
        .await
        .unwrap();
    assert_eq!(descriptor.transport_id, "send-1");
    assert_eq!(descriptor.ice_candidates.len(), 1);
    assert_eq!(descriptor.dtls_parameters, DtlsParameters(json!({ "role": "auto" })));
}

#[tokio::test]
async fn test_connect_and_produce_bodies() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/connect-transports"))
        .and(body_json(json!({
            "peerId": "alice",
            "sendDtlsParameters": { "role": "client" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/produce"))
        .and(body_json(json!({
            "peerId": "alice",
            "examId": "exam-1",
            "kind": "audio",
            "rtpParameters": { "mid": "1" },
            "streamType": "screen-audio"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "producerId": "p-9" })))
        .expect(1)
        .mount(&server)
        .await;

    channel
        .connect_transport("alice", &DtlsParameters(json!({ "role": "client" })))
        .await
        .unwrap();

    let producer_id = channel
        .request_produce(ProduceRequest {
            participant_id: "alice".to_string(),
            session_id: "exam-1".to_string(),
            kind: MediaKind::Audio,
            rtp_parameters: RtpParameters(json!({ "mid": "1" })),
            stream_kind: StreamKind::ScreenAudio,
        })
        .await
        .unwrap();
    assert_eq!(producer_id, "p-9");
}

#[tokio::test]
async fn test_unexpected_shape_is_protocol_error() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/produce"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .mount(&server)
        .await;

    let result = channel
        .request_produce(ProduceRequest {
            participant_id: "alice".to_string(),
            session_id: "exam-1".to_string(),
            kind: MediaKind::Video,
            rtp_parameters: RtpParameters(json!({})),
            stream_kind: StreamKind::CameraVideo,
        })
        .await;
    assert!(matches!(result, Err(SignalingError::Protocol(_))));
}

#[tokio::test]
async fn test_request_failure_keeps_channel_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rtp-capabilities"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "rtpCapabilities": {} }))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rtp-capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rtpCapabilities": {} })))
        .mount(&server)
        .await;

    let channel = HttpSignalingChannel::new("student", Duration::from_millis(200)).unwrap();
    channel.open(&server.uri()).await.unwrap();
    let mut events = channel.subscribe();

    let result = channel.fetch_capabilities().await;
    assert!(matches!(result, Err(SignalingError::Unavailable(_))));
    assert!(events.try_recv().is_err());

    // The same channel serves the retry.
    channel.fetch_capabilities().await.unwrap();
}

#[tokio::test]
async fn test_liveness_failures_close_channel_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Every later check outlives the request timeout.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let channel = HttpSignalingChannel::new("student", Duration::from_millis(100))
        .unwrap()
        .with_liveness_interval(Duration::from_millis(50));
    let mut events = channel.subscribe();
    channel.open(&server.uri()).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("no Disconnected event in time")
        .unwrap();
    assert!(matches!(event, SignalingEvent::Disconnected { .. }));

    assert_eq!(
        channel.fetch_capabilities().await,
        Err(SignalingError::NotOpen)
    );
    channel.close().await.unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_close_stops_liveness_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let channel = HttpSignalingChannel::new("student", Duration::from_secs(1))
        .unwrap()
        .with_liveness_interval(Duration::from_millis(20));
    channel.open(&server.uri()).await.unwrap();
    channel.close().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_capability_timeout_is_retryable_through_controller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/join-exam"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "peerId": "peer-7" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rtp-capabilities"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "rtpCapabilities": {} }))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rtp-capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rtpCapabilities": { "codecs": [] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/setup-transports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transports": {
                "send": {
                    "id": "send-1",
                    "iceParameters": {},
                    "iceCandidates": [],
                    "dtlsParameters": {}
                }
            }
        })))
        .mount(&server)
        .await;

    let channel = HttpSignalingChannel::new("student", Duration::from_millis(300)).unwrap();
    let controller = SessionController::new(
        Config::with_timeouts(server.uri(), Timeouts::uniform(Duration::from_secs(5))),
        Arc::new(channel),
        Arc::new(MockMediaEngine::capable()),
    );

    controller.connect(&server.uri()).await.unwrap();
    controller.join("exam-1", "alice", "student").await.unwrap();

    let result = controller.prepare_transport().await;
    assert!(matches!(
        result,
        Err(PublisherError::CapabilityUnavailable(_))
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.state(), SessionState::CapabilityFetch);

    controller.prepare_transport().await.unwrap();
    assert_eq!(controller.state(), SessionState::TransportReady);

    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_open_unreachable_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let channel = HttpSignalingChannel::new("student", Duration::from_secs(1)).unwrap();
    let mut events = channel.subscribe();

    let result = channel.open(&address).await;
    assert!(matches!(result, Err(SignalingError::Unavailable(_))));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_close_emits_once_and_blocks_requests() {
    let server = MockServer::start().await;
    let channel = open_channel(&server).await;
    let mut events = channel.subscribe();

    channel.close().await.unwrap();
    channel.close().await.unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        SignalingEvent::Disconnected {
            reason: "closed by client".to_string()
        }
    );
    assert!(events.try_recv().is_err());
    assert_eq!(
        channel.fetch_capabilities().await,
        Err(SignalingError::NotOpen)
    );
}
