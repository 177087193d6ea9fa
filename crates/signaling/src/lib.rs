//! Peer-to-peer session signaling for PeerLink
//!
//! This crate drives offer/answer/ICE-candidate exchange between two
//! endpoints through a relay hub, with deterministic resolution of
//! simultaneous ("glare") offers.
//!
//! # Features
//!
//! - **JSON-RPC 2.0 channel**: correlated, pipelined calls in both directions
//!   over one text link; termination fails every pending call
//! - **Perfect negotiation**: polite/impolite roles resolve glare; a pure
//!   state machine plus a driver task
//! - **Signaling hub**: peer registry with INITIAL/READY readiness, offer
//!   broadcast with per-recipient isolation, candidate routing
//! - **Peer session**: one channel bound to one negotiation
//! - **Transports**: WebSocket (`tokio-tungstenite`) and in-memory links
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   broadcastOffer / sendCandidateTo   ┌──────────────┐
//! │ PeerSession  │ ───────────────────────────────────▶ │ SignalingHub │
//! │ ├─ RpcChannel│ ◀─────────────────────────────────── │ ├─ registry  │
//! │ └─ driver    │        sendOffer / sendCandidate     │ └─ RpcChannel│
//! │    └─ NegotiationMachine                            │    per peer  │
//! │    └─ RtcConnection (ConnectionFactory)             └──────────────┘
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use peerlink_signaling::{HubConfig, SessionConfig, Role};
//!
//! let hub = HubConfig::default();
//! assert!(hub.validate().is_ok());
//!
//! let session = SessionConfig::new("ws://localhost:8080/ws").with_role(Role::Polite);
//! assert!(session.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use peerlink_signaling::rtc::LoopbackConnectionFactory;
//! use peerlink_signaling::{PeerSession, SessionConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> peerlink_signaling::Result<()> {
//! let config = SessionConfig::new("ws://localhost:8080/ws");
//! let session = PeerSession::connect(&config, Arc::new(LoopbackConnectionFactory::new("me"))).await?;
//!
//! session.established().await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hub;
pub mod negotiation;
pub mod protocol;
pub mod rpc;
pub mod rtc;
pub mod session;
pub mod transport;

// Re-exports for public API
pub use config::{CandidateRouting, HubConfig, SessionConfig};
pub use error::{Error, Result};
pub use hub::{HubClient, HubEvent, PeerInfo, PeerState, SignalingHub, SignalingServer};
pub use negotiation::Role;
pub use protocol::PeerId;
pub use rpc::{RpcChannel, RpcService};
pub use session::PeerSession;
pub use transport::{Link, LinkSender};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
