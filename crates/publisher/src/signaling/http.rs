//! HTTP/JSON signaling channel.
//!
//! Speaks the routing server's REST surface:
//!
//! | Operation          | Request                           |
//! |--------------------|-----------------------------------|
//! | open               | `GET {base}/`                     |
//! | send_join          | `POST api/join-exam`              |
//! | fetch_capabilities | `GET api/rtp-capabilities`        |
//! | request_transport  | `POST api/setup-transports`       |
//! | connect_transport  | `POST api/connect-transports`     |
//! | request_produce    | `POST api/produce`                |
//!
//! `api/join-exam` is the server's REST counterpart of the `joinExam`
//! socket event; it answers with the assigned `peerId`.
//!
//! A failed request is reported as `Unavailable` to its caller only. Loss of
//! the channel is decided by a liveness watcher that polls the base URL while
//! the channel is open; after [`LIVENESS_MAX_FAILURES`] consecutive failed
//! checks it closes the channel and emits [`SignalingEvent::Disconnected`].
//! Non-success statuses and `success: false` bodies are rejections.

use super::{JoinRequest, ProduceRequest, SignalingChannel, SignalingError, SignalingEvent};
use crate::config::{Config, DEFAULT_LIVENESS_INTERVAL_MS};
use crate::media::{CapabilitySet, DtlsParameters, SessionIdentity, TransportDescriptor};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Maximum length for error bodies carried in error messages.
const MAX_ERROR_BODY_LEN: usize = 256;

/// Push event buffer.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Consecutive failed liveness checks after which the channel is lost.
pub const LIVENESS_MAX_FAILURES: u32 = 3;

#[derive(Serialize)]
struct JoinBody<'a> {
    #[serde(rename = "examId")]
    exam_id: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    role: &'a str,
}

#[derive(Deserialize)]
struct JoinResponse {
    #[serde(rename = "peerId")]
    peer_id: Option<String>,
}

#[derive(Serialize)]
struct SetupTransportsBody<'a> {
    #[serde(rename = "peerId")]
    peer_id: &'a str,
    role: &'a str,
}

#[derive(Deserialize)]
struct SetupTransportsResponse {
    transports: Transports,
}

#[derive(Deserialize)]
struct Transports {
    send: TransportDescriptor,
}

#[derive(Serialize)]
struct ConnectTransportsBody<'a> {
    #[serde(rename = "peerId")]
    peer_id: &'a str,
    #[serde(rename = "sendDtlsParameters")]
    send_dtls_parameters: &'a DtlsParameters,
}

#[derive(Serialize)]
struct ProduceBody<'a> {
    #[serde(rename = "peerId")]
    peer_id: &'a str,
    #[serde(rename = "examId")]
    exam_id: &'a str,
    kind: &'static str,
    #[serde(rename = "rtpParameters")]
    rtp_parameters: &'a Value,
    #[serde(rename = "streamType")]
    stream_type: &'static str,
}

#[derive(Deserialize)]
struct ProduceResponse {
    #[serde(rename = "producerId")]
    producer_id: String,
}

/// Signaling channel over the routing server's REST endpoints.
pub struct HttpSignalingChannel {
    client: Client,
    base: Arc<RwLock<Option<Url>>>,
    role: RwLock<String>,
    events: broadcast::Sender<SignalingEvent>,
    liveness_interval: Duration,
    liveness: Mutex<Option<CancellationToken>>,
}

impl HttpSignalingChannel {
    /// Create a channel with the given per-request timeout.
    ///
    /// `role` is sent with transport setup until a join records the role the
    /// participant joined with.
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::Unavailable` if the HTTP client cannot be
    /// built.
    pub fn new(role: impl Into<String>, request_timeout: Duration) -> Result<Self, SignalingError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SignalingError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base: Arc::new(RwLock::new(None)),
            role: RwLock::new(role.into()),
            events,
            liveness_interval: Duration::from_millis(DEFAULT_LIVENESS_INTERVAL_MS),
            liveness: Mutex::new(None),
        })
    }

    /// Set the interval between liveness checks of an open channel.
    #[must_use]
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Create a channel from configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpSignalingChannel::new`].
    pub fn from_config(config: &Config) -> Result<Self, SignalingError> {
        Ok(Self::new(config.role.clone(), config.http_timeout)?
            .with_liveness_interval(config.liveness_interval))
    }

    fn endpoint(&self, path: &str) -> Result<Url, SignalingError> {
        let base = self
            .base
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SignalingError::NotOpen)?;

        base.join(path)
            .map_err(|e| SignalingError::Protocol(format!("invalid endpoint {path}: {e}")))
    }

    fn role(&self) -> String {
        self.role
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn unavailable(err: &reqwest::Error) -> SignalingError {
        warn!(
            target: "publisher.signaling",
            error = %err,
            "Signaling request failed at transport level"
        );
        SignalingError::Unavailable(err.to_string())
    }

    fn start_liveness(&self, base: Url) {
        let token = CancellationToken::new();
        let previous = self
            .liveness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        tokio::spawn(watch_liveness(
            self.client.clone(),
            base,
            Arc::clone(&self.base),
            self.events.clone(),
            self.liveness_interval,
            token,
        ));
    }

    fn stop_liveness(&self) {
        let token = self
            .liveness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, SignalingError> {
        let url = self.endpoint(path)?;
        debug!(target: "publisher.signaling", %url, "GET");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::unavailable(&e))?;

        self.decode(response).await
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, SignalingError> {
        let url = self.endpoint(path)?;
        debug!(target: "publisher.signaling", %url, "POST");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Self::unavailable(&e))?;

        self.decode(response).await
    }

    async fn decode<R: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<R, SignalingError> {
        let status = response.status();
        let text = response.text().await.map_err(|e| Self::unavailable(&e))?;

        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) if !status.is_success() => {
                    return Err(SignalingError::Rejected(format!(
                        "status {}: {}",
                        status.as_u16(),
                        truncate(&text)
                    )));
                }
                Err(e) => {
                    return Err(SignalingError::Protocol(format!("invalid JSON body: {e}")));
                }
            }
        };

        if !status.is_success() {
            let reason = error_message(&body).unwrap_or_else(|| truncate(&text));
            return Err(SignalingError::Rejected(format!(
                "status {}: {reason}",
                status.as_u16()
            )));
        }

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = error_message(&body).unwrap_or_else(|| "request refused".to_string());
            return Err(SignalingError::Rejected(reason));
        }

        serde_json::from_value(body)
            .map_err(|e| SignalingError::Protocol(format!("unexpected response shape: {e}")))
    }
}

impl Drop for HttpSignalingChannel {
    fn drop(&mut self) {
        self.stop_liveness();
    }
}

/// Poll `base` until cancelled. Closes the channel and emits `Disconnected`
/// once the server has failed [`LIVENESS_MAX_FAILURES`] checks in a row.
async fn watch_liveness(
    client: Client,
    base: Url,
    current: Arc<RwLock<Option<Url>>>,
    events: broadcast::Sender<SignalingEvent>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let error = match client.get(base.clone()).send().await {
                    Ok(_) => {
                        failures = 0;
                        continue;
                    }
                    Err(e) => e,
                };

                failures += 1;
                warn!(
                    target: "publisher.signaling",
                    failures,
                    error = %error,
                    "Signaling liveness check failed"
                );
                if failures < LIVENESS_MAX_FAILURES {
                    continue;
                }

                // Only the channel this watcher was started for may be closed.
                let mut open = current.write().unwrap_or_else(PoisonError::into_inner);
                if token.is_cancelled() || open.as_ref() != Some(&base) {
                    break;
                }
                *open = None;
                drop(open);

                info!(target: "publisher.signaling", %base, "Signaling channel lost");
                let _ = events.send(SignalingEvent::Disconnected {
                    reason: format!("signaling server unreachable: {error}"),
                });
                break;
            }
        }
    }

    debug!(target: "publisher.signaling", "Liveness watcher stopped");
}

fn error_message(body: &Value) -> Option<String> {
    body.get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY_LEN {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", text.get(..end).unwrap_or_default())
}

#[async_trait]
impl SignalingChannel for HttpSignalingChannel {
    #[instrument(skip_all, name = "publisher.signaling.open")]
    async fn open(&self, address: &str) -> Result<(), SignalingError> {
        let normalized = if address.ends_with('/') {
            address.to_string()
        } else {
            format!("{address}/")
        };
        let base = Url::parse(&normalized)
            .map_err(|e| SignalingError::Unavailable(format!("invalid address {address}: {e}")))?;

        // Any HTTP answer means the server is reachable.
        let response = self
            .client
            .get(base.clone())
            .send()
            .await
            .map_err(|e| SignalingError::Unavailable(e.to_string()))?;

        debug!(
            target: "publisher.signaling",
            %base,
            status = response.status().as_u16(),
            "Signaling server reachable"
        );

        *self.base.write().unwrap_or_else(PoisonError::into_inner) = Some(base.clone());
        self.start_liveness(base);
        Ok(())
    }

    #[instrument(skip_all, name = "publisher.signaling.join", fields(session_id = %request.session_id))]
    async fn send_join(&self, request: JoinRequest) -> Result<SessionIdentity, SignalingError> {
        let body = JoinBody {
            exam_id: &request.session_id,
            user_id: &request.participant_id,
            role: &request.role,
        };
        let response: JoinResponse = self.post_json("api/join-exam", &body).await?;

        *self.role.write().unwrap_or_else(PoisonError::into_inner) = request.role.clone();

        Ok(SessionIdentity {
            session_id: request.session_id,
            participant_id: response
                .peer_id
                .filter(|id| !id.is_empty())
                .unwrap_or(request.participant_id),
            role: request.role,
        })
    }

    async fn fetch_capabilities(&self) -> Result<CapabilitySet, SignalingError> {
        self.get_json("api/rtp-capabilities").await
    }

    async fn request_transport(
        &self,
        participant_id: &str,
    ) -> Result<TransportDescriptor, SignalingError> {
        let role = self.role();
        let body = SetupTransportsBody {
            peer_id: participant_id,
            role: &role,
        };
        let response: SetupTransportsResponse =
            self.post_json("api/setup-transports", &body).await?;
        Ok(response.transports.send)
    }

    async fn connect_transport(
        &self,
        participant_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalingError> {
        let body = ConnectTransportsBody {
            peer_id: participant_id,
            send_dtls_parameters: dtls_parameters,
        };
        let _: Value = self.post_json("api/connect-transports", &body).await?;
        Ok(())
    }

    #[instrument(skip_all, name = "publisher.signaling.produce", fields(stream_kind = %request.stream_kind))]
    async fn request_produce(&self, request: ProduceRequest) -> Result<String, SignalingError> {
        let body = ProduceBody {
            peer_id: &request.participant_id,
            exam_id: &request.session_id,
            kind: request.kind.as_str(),
            rtp_parameters: &request.rtp_parameters.0,
            stream_type: request.stream_kind.wire_tag(),
        };
        let response: ProduceResponse = self.post_json("api/produce", &body).await?;

        if response.producer_id.is_empty() {
            return Err(SignalingError::Protocol("empty producerId".to_string()));
        }
        Ok(response.producer_id)
    }

    async fn close(&self) -> Result<(), SignalingError> {
        self.stop_liveness();

        let was_open = self
            .base
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();

        if was_open {
            let _ = self.events.send(SignalingEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}
