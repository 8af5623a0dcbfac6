//! Publisher Preflight
//!
//! Checks that a routing server is ready to accept a publisher before a
//! session starts, using the same signaling channel the controller uses.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Open the signaling channel
//! 3. Join the configured session
//! 4. Fetch the capability set
//! 5. Request a send transport descriptor
//! 6. Print a summary and close the channel

#![warn(clippy::pedantic)]

use anyhow::{Context, Result};
use publisher::config::{Config, LogFormat};
use publisher::signaling::{HttpSignalingChannel, JoinRequest, SignalingChannel};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    init_tracing(config.log_format);

    info!(
        signaling_url = %config.signaling_url,
        session_id = %config.session_id,
        user_id = %config.user_id,
        role = %config.role,
        "Starting publisher preflight"
    );

    let channel = HttpSignalingChannel::from_config(&config)?;

    let outcome = run(&config, &channel).await;

    if let Err(e) = channel.close().await {
        error!(error = %e, "Failed to close signaling channel");
    }

    match outcome {
        Ok(summary) => {
            println!("{summary}");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Preflight failed");
            Err(e)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "publisher=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(config: &Config, channel: &HttpSignalingChannel) -> Result<String> {
    channel
        .open(&config.signaling_url)
        .await
        .context("signaling server unreachable")?;

    let join = JoinRequest {
        session_id: config.session_id.clone(),
        participant_id: config.user_id.clone(),
        role: config.role.clone(),
    };
    let identity = tokio::time::timeout(config.timeouts.join, channel.send_join(join))
        .await
        .context("join timed out")?
        .context("join failed")?;
    info!(participant_id = %identity.participant_id, "Joined");

    let capabilities = tokio::time::timeout(config.timeouts.capability, channel.fetch_capabilities())
        .await
        .context("capability fetch timed out")?
        .context("capability fetch failed")?;

    let codecs = capabilities
        .rtp_capabilities
        .get("codecs")
        .and_then(serde_json::Value::as_array)
        .map_or(0, Vec::len);

    let descriptor = tokio::time::timeout(
        config.timeouts.transport,
        channel.request_transport(&identity.participant_id),
    )
    .await
    .context("transport request timed out")?
    .context("transport request failed")?;

    Ok(format!(
        "preflight ok: session={} participant={} codecs={} transport={} ice_candidates={}",
        identity.session_id,
        identity.participant_id,
        codecs,
        descriptor.transport_id,
        descriptor.ice_candidates.len()
    ))
}
