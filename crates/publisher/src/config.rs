//! Publisher configuration.
//!
//! Configuration is loaded from environment variables. Timeouts are given in
//! milliseconds and must be non-zero.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default participant role sent with join requests.
pub const DEFAULT_ROLE: &str = "student";

/// Default join acknowledgment timeout in milliseconds.
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;

/// Default capability fetch timeout in milliseconds.
pub const DEFAULT_CAPABILITY_TIMEOUT_MS: u64 = 5_000;

/// Default transport descriptor fetch timeout in milliseconds.
pub const DEFAULT_TRANSPORT_TIMEOUT_MS: u64 = 5_000;

/// Default connect negotiation timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default produce negotiation timeout in milliseconds.
pub const DEFAULT_PRODUCE_TIMEOUT_MS: u64 = 10_000;

/// Default per-request HTTP timeout in milliseconds.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;

/// Default interval between signaling liveness checks in milliseconds.
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 5_000;

/// Default session id used by the preflight binary.
pub const DEFAULT_SESSION_ID: &str = "EXAM001";

/// Prefix of generated participant ids.
pub const DEFAULT_USER_ID_PREFIX: &str = "STUDENT";

/// Log output format for the binary's subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Per-operation timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Join acknowledgment.
    pub join: Duration,
    /// Capability set fetch.
    pub capability: Duration,
    /// Transport descriptor fetch.
    pub transport: Duration,
    /// DTLS connect negotiation.
    pub connect: Duration,
    /// Produce negotiation, per stream.
    pub produce: Duration,
}

impl Timeouts {
    /// Same timeout for every operation.
    #[must_use]
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            join: timeout,
            capability: timeout,
            transport: timeout,
            connect: timeout,
            produce: timeout,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            join: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            capability: Duration::from_millis(DEFAULT_CAPABILITY_TIMEOUT_MS),
            transport: Duration::from_millis(DEFAULT_TRANSPORT_TIMEOUT_MS),
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            produce: Duration::from_millis(DEFAULT_PRODUCE_TIMEOUT_MS),
        }
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the routing server's signaling surface.
    pub signaling_url: String,

    /// Role sent with join requests (default: "student").
    pub role: String,

    /// Negotiation timeouts.
    pub timeouts: Timeouts,

    /// Per-request HTTP timeout for the signaling channel.
    pub http_timeout: Duration,

    /// Interval between liveness checks of an open signaling channel.
    pub liveness_interval: Duration,

    /// Log output format (default: text).
    pub log_format: LogFormat,

    /// Session to join from the preflight binary (default: "EXAM001").
    pub session_id: String,

    /// Participant id to join as (default: `STUDENT_<random>`).
    pub user_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_url = vars
            .get("PUBLISHER_SIGNALING_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("PUBLISHER_SIGNALING_URL".to_string()))?
            .clone();

        let role = vars
            .get("PUBLISHER_ROLE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());

        let timeouts = Timeouts {
            join: parse_timeout(vars, "PUBLISHER_JOIN_TIMEOUT_MS", DEFAULT_JOIN_TIMEOUT_MS)?,
            capability: parse_timeout(
                vars,
                "PUBLISHER_CAPABILITY_TIMEOUT_MS",
                DEFAULT_CAPABILITY_TIMEOUT_MS,
            )?,
            transport: parse_timeout(
                vars,
                "PUBLISHER_TRANSPORT_TIMEOUT_MS",
                DEFAULT_TRANSPORT_TIMEOUT_MS,
            )?,
            connect: parse_timeout(
                vars,
                "PUBLISHER_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?,
            produce: parse_timeout(
                vars,
                "PUBLISHER_PRODUCE_TIMEOUT_MS",
                DEFAULT_PRODUCE_TIMEOUT_MS,
            )?,
        };

        let http_timeout =
            parse_timeout(vars, "PUBLISHER_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)?;
        let liveness_interval = parse_timeout(
            vars,
            "PUBLISHER_LIVENESS_INTERVAL_MS",
            DEFAULT_LIVENESS_INTERVAL_MS,
        )?;

        let log_format = match vars.get("PUBLISHER_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "PUBLISHER_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        let session_id = vars
            .get("PUBLISHER_SESSION_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());

        let user_id = vars
            .get("PUBLISHER_USER_ID")
            .cloned()
            .unwrap_or_else(generate_user_id);

        Ok(Config {
            signaling_url,
            role,
            timeouts,
            http_timeout,
            liveness_interval,
            log_format,
            session_id,
            user_id,
        })
    }

    /// Build a configuration in code with explicit timeouts.
    pub fn with_timeouts(signaling_url: impl Into<String>, timeouts: Timeouts) -> Self {
        Config {
            signaling_url: signaling_url.into(),
            role: DEFAULT_ROLE.to_string(),
            timeouts,
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            liveness_interval: Duration::from_millis(DEFAULT_LIVENESS_INTERVAL_MS),
            log_format: LogFormat::Text,
            session_id: DEFAULT_SESSION_ID.to_string(),
            user_id: generate_user_id(),
        }
    }
}

fn parse_timeout(
    vars: &HashMap<String, String>,
    name: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(Duration::from_millis(default_ms));
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        ))),
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(e) => Err(ConfigError::InvalidValue(format!(
            "{name} must be a number of milliseconds: {e}"
        ))),
    }
}

fn generate_user_id() -> String {
    let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
    let short_suffix = uuid_suffix.get(..6).unwrap_or("000000").to_uppercase();
    format!("{DEFAULT_USER_ID_PREFIX}_{short_suffix}")
}
