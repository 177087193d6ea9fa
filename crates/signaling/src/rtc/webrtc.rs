//! Connection factory backed by webrtc-rs

use super::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, IceCandidate, IceConnectionState,
    RtcConfiguration, RtcConnection, SdpType, SessionDescription, SignalingState,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

/// Creates webrtc-rs peer connections with default codecs and interceptors
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcConnectionFactory;

impl WebRtcConnectionFactory {
    /// Create the factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcConnectionFactory {
    async fn create(
        &self,
        configuration: &RtcConfiguration,
    ) -> Result<(Arc<dyn RtcConnection>, ConnectionEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::Negotiation(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers = configuration
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(
            |e| Error::Negotiation(format!("Failed to create peer connection: {}", e)),
        )?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        install_handlers(&peer_connection, &events_tx);

        info!("Created webrtc peer connection");

        let connection = WebRtcConnection {
            peer_connection,
            events: events_tx,
            ice_restart: AtomicBool::new(false),
        };
        Ok((Arc::new(connection), events_rx))
    }
}

fn install_handlers(
    peer_connection: &RTCPeerConnection,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) {
    let tx = events.clone();
    peer_connection.on_negotiation_needed(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ConnectionEvent::NegotiationNeeded);
        })
    }));

    let tx = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            let candidate = match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => Some(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => {
                        warn!("Failed to serialize local ICE candidate: {}", e);
                        return;
                    }
                },
                None => None,
            };
            let _ = tx.send(ConnectionEvent::IceCandidate(candidate));
        })
    }));

    let tx = events.clone();
    peer_connection.on_ice_connection_state_change(Box::new(
        move |state: RTCIceConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(state) = map_ice_state(state) {
                    let _ = tx.send(ConnectionEvent::IceConnectionStateChanged(state));
                }
            })
        },
    ));

    let tx = events.clone();
    peer_connection.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        let tx = tx.clone();
        Box::pin(async move {
            if let Some(state) = map_signaling_state(state) {
                let _ = tx.send(ConnectionEvent::SignalingStateChanged(state));
            }
        })
    }));
}

fn map_signaling_state(state: RTCSignalingState) -> Option<SignalingState> {
    match state {
        RTCSignalingState::Stable => Some(SignalingState::Stable),
        RTCSignalingState::HaveLocalOffer => Some(SignalingState::HaveLocalOffer),
        RTCSignalingState::HaveRemoteOffer => Some(SignalingState::HaveRemoteOffer),
        RTCSignalingState::HaveLocalPranswer => Some(SignalingState::HaveLocalPranswer),
        RTCSignalingState::HaveRemotePranswer => Some(SignalingState::HaveRemotePranswer),
        RTCSignalingState::Closed => Some(SignalingState::Closed),
        _ => None,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

/// webrtc-rs peer connection behind [`RtcConnection`]
pub struct WebRtcConnection {
    peer_connection: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    ice_restart: AtomicBool,
}

impl WebRtcConnection {
    /// Underlying webrtc-rs connection, for adding tracks and data channels
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    async fn rollback(&self) -> Result<()> {
        // webrtc-rs has no public constructor for rollback descriptions
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({"type": "rollback", "sdp": ""}))?;
        self.peer_connection
            .set_local_description(rollback)
            .await
            .map_err(|e| Error::Negotiation(format!("Rollback failed: {}", e)))
    }
}

#[async_trait]
impl RtcConnection for WebRtcConnection {
    async fn set_local_description(&self) -> Result<SessionDescription> {
        let description = match self.peer_connection.signaling_state() {
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => self
                .peer_connection
                .create_answer(None)
                .await
                .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?,
            _ => {
                let options = self
                    .ice_restart
                    .swap(false, Ordering::SeqCst)
                    .then(|| RTCOfferOptions {
                        ice_restart: true,
                        ..Default::default()
                    });
                self.peer_connection
                    .create_offer(options)
                    .await
                    .map_err(|e| Error::Negotiation(format!("Failed to create offer: {}", e)))?
            }
        };

        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::Negotiation("No local description after set".to_string()))?;

        let kind = match local.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            other => {
                return Err(Error::Negotiation(format!(
                    "Unexpected local description type: {}",
                    other
                )))
            }
        };
        Ok(SessionDescription {
            kind,
            sdp: local.sdp,
        })
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.is_offer()
            && self.peer_connection.signaling_state() == RTCSignalingState::HaveLocalOffer
        {
            debug!("Rolling back local offer before applying remote offer");
            self.rollback().await?;
        }

        let remote = match description.kind {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| Error::Negotiation(format!("Invalid remote description: {}", e)))?;

        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| Error::CandidateApplication(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn restart_ice(&self) -> Result<()> {
        self.ice_restart.store(true, Ordering::SeqCst);
        self.events
            .send(ConnectionEvent::NegotiationNeeded)
            .map_err(|_| Error::Negotiation("Connection event receiver dropped".to_string()))
    }

    fn signaling_state(&self) -> SignalingState {
        map_signaling_state(self.peer_connection.signaling_state())
            .unwrap_or(SignalingState::Stable)
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}
