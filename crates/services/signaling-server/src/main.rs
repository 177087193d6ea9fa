//! Signaling server binary entry point
//!
//! Runs a PeerLink signaling hub that peers reach over WebSocket at `/ws`.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8080, public STUN servers, 10s offer timeout
//! cargo run -p peerlink-signaling-server
//!
//! # LAN-only hub with a shorter offer timeout
//! cargo run -p peerlink-signaling-server -- \
//!   --listen 127.0.0.1:9000 \
//!   --lan \
//!   --offer-timeout-ms 3000
//!
//! # Custom STUN servers, forward candidates to registered peers
//! cargo run -p peerlink-signaling-server -- \
//!   --stun-servers stun:stun.example.org:3478,stun:stun2.example.org:3478 \
//!   --candidate-routing registered
//! ```

use anyhow::Context;
use clap::Parser;
use peerlink_signaling::{CandidateRouting, HubConfig, HubEvent, SignalingHub, SignalingServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PeerLink Signaling Server
///
/// Relays offers, answers and ICE candidates between peers connected over
/// WebSocket.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "SIGNALING_LISTEN")]
    listen: SocketAddr,

    /// STUN servers recommended to peers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "SIGNALING_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Recommend no ICE servers at all
    #[arg(long, conflicts_with = "stun_servers")]
    lan: bool,

    /// Bound on each forwarded offer, in milliseconds
    #[arg(long, default_value_t = 10_000, env = "SIGNALING_OFFER_TIMEOUT_MS")]
    offer_timeout_ms: u64,

    /// WebSocket keep-alive ping interval, in seconds
    #[arg(long, default_value_t = 30, env = "SIGNALING_KEEPALIVE_SECS")]
    keepalive_secs: u64,

    /// sendCandidateTo routing: 'self-only' or 'registered'
    #[arg(long, default_value = "self-only", env = "SIGNALING_CANDIDATE_ROUTING")]
    candidate_routing: CandidateRouting,

    /// Log output format
    #[arg(long, default_value = "text", env = "SIGNALING_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

impl Args {
    fn hub_config(&self) -> anyhow::Result<HubConfig> {
        let mut config = if self.lan {
            HubConfig::lan_preset()
        } else {
            HubConfig::default()
        };
        if !self.stun_servers.is_empty() {
            config = config.with_stun_servers(self.stun_servers.iter().cloned());
        }
        let config = config
            .with_offer_timeout(Duration::from_millis(self.offer_timeout_ms))
            .with_keepalive_interval(Duration::from_secs(self.keepalive_secs))
            .with_candidate_routing(self.candidate_routing);

        config.validate().context("invalid hub configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        "PeerLink signaling server starting"
    );

    let config = args.hub_config()?;
    info!(
        ice_servers = config.rtc_configuration.ice_servers.len(),
        offer_timeout_ms = config.offer_timeout_ms,
        candidate_routing = ?config.candidate_routing,
        keepalive_ms = config.keepalive_interval_ms,
        "Hub configuration"
    );

    let (event_tx, event_rx) = mpsc::channel(256);
    let hub = SignalingHub::new_with_events(config, Some(event_tx));
    tokio::spawn(log_events(event_rx));

    let server = SignalingServer::new(args.listen, hub)
        .start()
        .await
        .with_context(|| format!("failed to start signaling server on {}", args.listen))?;

    info!(url = %server.url(), "Server running. Press Ctrl+C to shutdown.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Shutting down");
    server.shutdown().await;
    Ok(())
}

async fn log_events(mut events: mpsc::Receiver<HubEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::PeerConnected { peer_id } => info!(%peer_id, "peer connected"),
            HubEvent::PeerReady { peer_id } => info!(%peer_id, "peer ready"),
            HubEvent::PeerDisconnected { peer_id, reason } => {
                info!(%peer_id, %reason, "peer disconnected")
            }
        }
    }
}

fn init_tracing(format: LogFormat) {
    // RUST_LOG wins over the default level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_build_valid_config() {
        let args = Args::parse_from(["signaling-server"]);
        let config = args.hub_config().unwrap();
        assert_eq!(config, HubConfig::default());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "signaling-server",
            "--lan",
            "--offer-timeout-ms",
            "2500",
            "--candidate-routing",
            "registered",
            "--log-format",
            "json",
        ]);
        let config = args.hub_config().unwrap();
        assert!(config.rtc_configuration.ice_servers.is_empty());
        assert_eq!(config.offer_timeout_ms, 2500);
        assert_eq!(config.candidate_routing, CandidateRouting::Registered);
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn test_zero_offer_timeout_is_rejected() {
        let args = Args::parse_from(["signaling-server", "--offer-timeout-ms", "0"]);
        assert!(args.hub_config().is_err());
    }
}
