//! Configuration types for the signaling hub and peer sessions

use crate::negotiation::Role;
use crate::rtc::{IceServer, RtcConfiguration};
use crate::transport::ConnectOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// STUN servers recommended to peers when nothing else is configured
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun.l.google.com:19305",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
    "stun:stun.cloudflare.com:53",
];

/// How the hub routes `sendCandidateTo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateRouting {
    /// Forward only when `toId` is the caller's own id
    #[default]
    SelfOnly,

    /// Forward to any ready peer other than the caller
    Registered,
}

impl std::str::FromStr for CandidateRouting {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "self-only" => Ok(CandidateRouting::SelfOnly),
            "registered" => Ok(CandidateRouting::Registered),
            other => Err(crate::Error::InvalidConfig(format!(
                "candidate routing must be self-only or registered, got {}",
                other
            ))),
        }
    }
}

/// Signaling hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Returned verbatim by getRecommendedRPCConfiguration
    pub rtc_configuration: RtcConfiguration,

    /// Bound on each nested sendOffer during a broadcast (default: 10000ms)
    pub offer_timeout_ms: u64,

    /// sendCandidateTo routing policy (default: SelfOnly)
    pub candidate_routing: CandidateRouting,

    /// WebSocket keep-alive ping interval (default: 30s)
    pub keepalive_interval_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            rtc_configuration: RtcConfiguration {
                ice_servers: DEFAULT_STUN_SERVERS
                    .iter()
                    .map(|url| IceServer::stun(*url))
                    .collect(),
            },
            offer_timeout_ms: 10_000,
            candidate_routing: CandidateRouting::SelfOnly,
            keepalive_interval_ms: 30_000,
        }
    }
}

impl HubConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `offer_timeout_ms` is zero
    /// - `keepalive_interval_ms` is zero
    /// - an ICE server entry has no URLs
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.offer_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "offer_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.keepalive_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "keepalive_interval_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(pos) = self
            .rtc_configuration
            .ice_servers
            .iter()
            .position(|server| server.urls.is_empty())
        {
            return Err(Error::InvalidConfig(format!(
                "ice server #{} has no urls",
                pos
            )));
        }

        Ok(())
    }

    /// Configuration for peers on the same network: no ICE servers
    pub fn lan_preset() -> Self {
        Self {
            rtc_configuration: RtcConfiguration::default(),
            ..Self::default()
        }
    }

    /// Replace the recommended ICE servers with plain STUN URLs
    pub fn with_stun_servers<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rtc_configuration.ice_servers = urls.into_iter().map(IceServer::stun).collect();
        self
    }

    /// Add one ICE server entry (e.g. TURN with credentials)
    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.rtc_configuration.ice_servers.push(server);
        self
    }

    /// Set the nested sendOffer bound
    pub fn with_offer_timeout(mut self, timeout: Duration) -> Self {
        self.offer_timeout_ms = millis(timeout);
        self
    }

    /// Set the candidate routing policy
    pub fn with_candidate_routing(mut self, routing: CandidateRouting) -> Self {
        self.candidate_routing = routing;
        self
    }

    /// Set the keep-alive interval
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = millis(interval);
        self
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Peer session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket URL of the hub (ws:// or wss://)
    pub signaling_url: String,

    /// Glare-resolution role (default: impolite, the initiator)
    pub role: Role,

    /// Connect plus handshake bound (default: 10000ms)
    pub connect_timeout_ms: u64,

    /// WebSocket keep-alive ping interval (default: 30s)
    pub keepalive_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws".to_string(),
            role: Role::Impolite,
            connect_timeout_ms: 10_000,
            keepalive_interval_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Configuration for `signaling_url` with default settings
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ..Self::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a valid WebSocket URL
    /// - `connect_timeout_ms` or `keepalive_interval_ms` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.keepalive_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "keepalive_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Set the glare-resolution role
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    /// Set the keep-alive interval
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = millis(interval);
        self
    }

    /// Transport options derived from this configuration
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
        }
    }
}
