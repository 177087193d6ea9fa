//! Connection factory boundary
//!
//! The negotiation driver never talks to a peer-connection implementation
//! directly; it goes through [`RtcConnection`], created by a
//! [`ConnectionFactory`]. Connection-side callbacks are delivered as
//! [`ConnectionEvent`]s on an unbounded channel.

mod loopback;
#[cfg(feature = "webrtc")]
mod webrtc;

pub use loopback::{LoopbackConnection, LoopbackConnectionFactory};
#[cfg(feature = "webrtc")]
pub use self::webrtc::{WebRtcConnection, WebRtcConnectionFactory};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// SDP type carried by a [`SessionDescription`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Session offer
    Offer,
    /// Session answer
    Answer,
}

/// Session description (`RTCSessionDescriptionInit` wire form)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpType,

    /// SDP payload
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// True for offers
    pub fn is_offer(&self) -> bool {
        self.kind == SdpType::Offer
    }
}

/// ICE candidate (`RTCIceCandidateInit` wire form)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the m-line the candidate belongs to
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with no m-line metadata
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Signaling state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// ICE connection state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// One ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// STUN/TURN URLs; a bare string is accepted on input
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,

    /// Username for TURN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::One(url) => vec![url],
        Urls::Many(urls) => urls,
    })
}

impl IceServer {
    /// STUN server entry without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Configuration handed to the connection factory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfiguration {
    /// ICE servers
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

/// Events raised by a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection wants a (re)negotiation
    NegotiationNeeded,

    /// A local ICE candidate was gathered (`None` = gathering complete)
    IceCandidate(Option<IceCandidate>),

    /// ICE connection state changed
    IceConnectionStateChanged(IceConnectionState),

    /// Signaling state changed
    SignalingStateChanged(SignalingState),
}

/// Receiver for a connection's events
pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Operations the negotiation driver needs from a peer connection
#[async_trait]
pub trait RtcConnection: Send + Sync {
    /// Create an offer or answer (chosen from the current signaling state),
    /// apply it locally and return it
    async fn set_local_description(&self) -> Result<SessionDescription>;

    /// Apply a remote description; an offer received in `have-local-offer`
    /// rolls back the pending local offer first
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Request an ICE restart on the next offer
    async fn restart_ice(&self) -> Result<()>;

    /// Current signaling state
    fn signaling_state(&self) -> SignalingState;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Creates peer connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a connection and its event stream
    async fn create(
        &self,
        configuration: &RtcConfiguration,
    ) -> Result<(Arc<dyn RtcConnection>, ConnectionEvents)>;
}
