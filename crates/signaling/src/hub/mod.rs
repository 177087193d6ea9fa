//! Signaling hub
//!
//! Keeps a registry of connected peers, each bound to its own
//! [`RpcChannel`]. A peer starts INITIAL and becomes READY on its first
//! valid envelope; only READY peers can broadcast offers, route candidates,
//! or receive broadcasts.

mod client;
mod server;
mod service;

pub use client::HubClient;
pub use server::{SignalingServer, SignalingServerHandle};

use crate::config::{CandidateRouting, HubConfig};
use crate::protocol::{
    methods, BroadcastOfferEntry, CandidateParams, Envelope, PeerId, SendOfferParams,
    SendOfferResult,
};
use crate::rpc::RpcChannel;
use crate::rtc::{RtcConfiguration, SessionDescription};
use crate::transport::{Link, LinkSender};
use service::HubService;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn, Span};

/// Reason used when a peer's transport closes
pub const TERMINATED: &str = "terminated";

/// Readiness of a registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Connected, no valid envelope seen yet
    Initial,
    /// At least one valid envelope seen
    Ready,
}

/// Snapshot of one registry slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub state: PeerState,
    pub connected_at: SystemTime,
}

/// Registry lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    PeerConnected { peer_id: PeerId },
    PeerReady { peer_id: PeerId },
    PeerDisconnected { peer_id: PeerId, reason: String },
}

struct PeerSlot {
    state: PeerState,
    channel: RpcChannel,
    connected_at: SystemTime,
}

/// Server-side peer registry and call router
pub struct SignalingHub {
    peers: RwLock<HashMap<PeerId, PeerSlot>>,
    config: HubConfig,
    event_tx: Option<mpsc::Sender<HubEvent>>,
    this: Weak<SignalingHub>,
}

impl SignalingHub {
    /// Create a hub without event forwarding
    pub fn new(config: HubConfig) -> Arc<Self> {
        Self::new_with_events(config, None)
    }

    /// Create a hub with optional event forwarding
    ///
    /// When `event_tx` is provided, peer connect/ready/disconnect events are
    /// sent through the channel.
    pub fn new_with_events(config: HubConfig, event_tx: Option<mpsc::Sender<HubEvent>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            peers: RwLock::new(HashMap::new()),
            config,
            event_tx,
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Serve one peer over `link` until it closes
    #[instrument(skip_all, fields(peer_id = tracing::field::Empty))]
    pub async fn serve(&self, mut link: Link) {
        let peer_id = self.connect(link.sender()).await;
        Span::current().record("peer_id", tracing::field::display(&peer_id));
        while let Some(text) = link.recv().await {
            self.receive(&peer_id, &text).await;
        }
        let reason = link
            .close_reason()
            .map(|(code, reason)| format!("{} ({})", TERMINATED, code_reason(code, reason)))
            .unwrap_or_else(|| TERMINATED.to_string());
        self.disconnect(&peer_id, &reason).await;
    }

    /// Register a new peer writing to `sender`
    ///
    /// The slot starts INITIAL with its RPC handler already bound.
    pub async fn connect(&self, sender: LinkSender) -> PeerId {
        let peer_id = PeerId::generate();
        let service = HubService::new(self.this.clone(), peer_id.clone());
        let channel = RpcChannel::new(format!("hub:{}", peer_id), sender, service);

        self.peers.write().await.insert(
            peer_id.clone(),
            PeerSlot {
                state: PeerState::Initial,
                channel,
                connected_at: SystemTime::now(),
            },
        );

        info!(peer_id = %peer_id, "Peer connected");
        self.emit_event(HubEvent::PeerConnected {
            peer_id: peer_id.clone(),
        })
        .await;
        peer_id
    }

    /// Handle one inbound text frame from `peer_id`
    pub async fn receive(&self, peer_id: &PeerId, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(peer_id = %peer_id, "Dropping malformed envelope: {}", e);
                return;
            }
        };

        let Some(channel) = self.mark_ready(peer_id).await else {
            warn!(peer_id = %peer_id, "Envelope from unknown peer");
            return;
        };
        channel.dispatch(envelope).await;
    }

    /// Remove `peer_id` and fail its outstanding calls
    pub async fn disconnect(&self, peer_id: &PeerId, reason: &str) {
        let Some(slot) = self.peers.write().await.remove(peer_id) else {
            return;
        };
        slot.channel.terminate(TERMINATED);

        info!(peer_id = %peer_id, reason, "Peer disconnected");
        self.emit_event(HubEvent::PeerDisconnected {
            peer_id: peer_id.clone(),
            reason: reason.to_string(),
        })
        .await;
    }

    /// Snapshot of the registry
    pub async fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .read()
            .await
            .iter()
            .map(|(id, slot)| PeerInfo {
                id: id.clone(),
                state: slot.state,
                connected_at: slot.connected_at,
            })
            .collect();
        peers.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        peers
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_state(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.peers.read().await.get(peer_id).map(|slot| slot.state)
    }

    /// Emit an event if event_tx is configured
    async fn emit_event(&self, event: HubEvent) {
        if let Some(ref tx) = self.event_tx {
            if let Err(e) = tx.send(event).await {
                warn!("Failed to emit hub event: {}", e);
            }
        }
    }

    /// Flip `peer_id` to READY once; returns its channel
    async fn mark_ready(&self, peer_id: &PeerId) -> Option<RpcChannel> {
        {
            let peers = self.peers.read().await;
            let slot = peers.get(peer_id)?;
            if slot.state == PeerState::Ready {
                return Some(slot.channel.clone());
            }
        }

        let channel = {
            let mut peers = self.peers.write().await;
            let slot = peers.get_mut(peer_id)?;
            if slot.state == PeerState::Ready {
                return Some(slot.channel.clone());
            }
            slot.state = PeerState::Ready;
            slot.channel.clone()
        };

        info!(peer_id = %peer_id, "Peer ready");
        self.emit_event(HubEvent::PeerReady {
            peer_id: peer_id.clone(),
        })
        .await;
        Some(channel)
    }

    fn recommended_configuration(&self) -> &RtcConfiguration {
        &self.config.rtc_configuration
    }

    async fn is_ready(&self, peer_id: &PeerId) -> bool {
        self.peer_state(peer_id).await == Some(PeerState::Ready)
    }

    /// Fan an offer out to every other READY peer and collect their answers
    async fn broadcast_offer(
        &self,
        from: &PeerId,
        description: SessionDescription,
    ) -> Vec<BroadcastOfferEntry> {
        let targets: Vec<(PeerId, RpcChannel)> = self
            .peers
            .read()
            .await
            .iter()
            .filter(|(id, slot)| *id != from && slot.state == PeerState::Ready)
            .map(|(id, slot)| (id.clone(), slot.channel.clone()))
            .collect();

        debug!(peer_id = %from, targets = targets.len(), "Broadcasting offer");

        let params = SendOfferParams {
            from_id: from.clone(),
            description,
        };
        let offer_timeout = self.config.offer_timeout();

        let calls = targets.into_iter().map(|(target, channel)| {
            let params = &params;
            async move {
                let result = tokio::time::timeout(
                    offer_timeout,
                    channel.call_typed::<_, SendOfferResult>(methods::SEND_OFFER, params),
                )
                .await;
                (target, result)
            }
        });

        let mut entries = Vec::new();
        for (target, result) in futures::future::join_all(calls).await {
            match result {
                Ok(Ok(reply)) if reply.to_id == *from => entries.push(BroadcastOfferEntry {
                    from_id: target,
                    description: reply.description,
                }),
                Ok(Ok(reply)) => {
                    debug!(peer_id = %target, to_id = %reply.to_id, "Answer addressed elsewhere")
                }
                Ok(Err(e)) => debug!(peer_id = %target, "No answer: {}", e),
                Err(_) => warn!(peer_id = %target, ?offer_timeout, "Offer timed out"),
            }
        }

        debug!(peer_id = %from, answers = entries.len(), "Broadcast complete");
        entries
    }

    /// Forward a candidate according to the routing policy
    async fn send_candidate_to(&self, from: &PeerId, params: CandidateParams) {
        let allowed = match self.config.candidate_routing {
            CandidateRouting::SelfOnly => params.to_id == *from,
            CandidateRouting::Registered => params.to_id != *from,
        };
        if !allowed {
            debug!(
                peer_id = %from,
                to_id = %params.to_id,
                routing = ?self.config.candidate_routing,
                "Candidate not routed"
            );
            return;
        }

        let target = self
            .peers
            .read()
            .await
            .get(&params.to_id)
            .filter(|slot| slot.state == PeerState::Ready)
            .map(|slot| slot.channel.clone());

        match target {
            Some(channel) => {
                if let Err(e) = channel.notify_typed(methods::SEND_CANDIDATE, &params) {
                    debug!(to_id = %params.to_id, "Candidate not delivered: {}", e);
                }
            }
            None => debug!(to_id = %params.to_id, "Candidate target not ready"),
        }
    }
}

fn code_reason(code: u16, reason: &str) -> String {
    if reason.is_empty() {
        code.to_string()
    } else {
        format!("{}: {}", code, reason)
    }
}
