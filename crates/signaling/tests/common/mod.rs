//! Shared helpers for hub and session integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use peerlink_signaling::hub::HubClient;
use peerlink_signaling::protocol::{CandidateParams, ErrorObject, PeerRequest, SendOfferParams, SendOfferResult};
use peerlink_signaling::rtc::SessionDescription;
use peerlink_signaling::{Link, LinkSender, PeerId, RpcChannel, RpcService, SignalingHub};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerlink_signaling=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// How a scripted peer responds to sendOffer
#[derive(Debug, Clone)]
pub enum OfferBehavior {
    /// Answer with this sdp, addressed back to the offerer
    Answer(String),
    /// Answer with this sdp, addressed to someone else
    AnswerTo(String, PeerId),
    /// Never reply
    Hang,
}

struct ScriptedService {
    behavior: OfferBehavior,
    offers: mpsc::UnboundedSender<SendOfferParams>,
    candidates: mpsc::UnboundedSender<CandidateParams>,
}

#[async_trait]
impl RpcService for ScriptedService {
    type Request = PeerRequest;

    async fn handle_call(&self, request: PeerRequest) -> Result<Value, ErrorObject> {
        match request {
            PeerRequest::SendOffer(params) => {
                let _ = self.offers.send(params.clone());
                let (sdp, to_id) = match &self.behavior {
                    OfferBehavior::Answer(sdp) => (sdp.clone(), params.from_id),
                    OfferBehavior::AnswerTo(sdp, to_id) => (sdp.clone(), to_id.clone()),
                    OfferBehavior::Hang => std::future::pending().await,
                };
                Ok(serde_json::to_value(SendOfferResult {
                    to_id,
                    description: SessionDescription::answer(sdp),
                })
                .unwrap())
            }
            PeerRequest::SendCandidate(params) => {
                let _ = self.candidates.send(params);
                Ok(Value::Null)
            }
        }
    }
}

/// A hand-driven peer attached to a hub over an in-memory link
pub struct TestPeer {
    pub id: PeerId,
    pub hub: HubClient,
    pub offers: mpsc::UnboundedReceiver<SendOfferParams>,
    pub candidates: mpsc::UnboundedReceiver<CandidateParams>,
    sender: LinkSender,
    reader: JoinHandle<()>,
}

impl TestPeer {
    /// Attach to `hub`; the peer stays INITIAL until it sends something
    pub async fn join(hub: &Arc<SignalingHub>, behavior: OfferBehavior) -> TestPeer {
        let before: HashSet<PeerId> = hub.peers().await.into_iter().map(|p| p.id).collect();

        let (mut local, remote) = Link::pair();
        let server = hub.clone();
        tokio::spawn(async move { server.serve(remote).await });

        let (offers_tx, offers) = mpsc::unbounded_channel();
        let (candidates_tx, candidates) = mpsc::unbounded_channel();
        let sender = local.sender();
        let channel = RpcChannel::new(
            "test-peer",
            sender.clone(),
            ScriptedService {
                behavior,
                offers: offers_tx,
                candidates: candidates_tx,
            },
        );

        let reader = {
            let channel = channel.clone();
            tokio::spawn(async move {
                while let Some(text) = local.recv().await {
                    channel.receive(&text).await;
                }
                channel.terminate("closed");
            })
        };

        let id = eventually(|| {
            let hub = hub.clone();
            let before = before.clone();
            async move {
                hub.peers()
                    .await
                    .into_iter()
                    .map(|p| p.id)
                    .find(|id| !before.contains(id))
            }
        })
        .await;

        TestPeer {
            id,
            hub: HubClient::new(channel),
            offers,
            candidates,
            sender,
            reader,
        }
    }

    /// Join and promote to READY with a first call
    pub async fn join_ready(hub: &Arc<SignalingHub>, behavior: OfferBehavior) -> TestPeer {
        let peer = Self::join(hub, behavior).await;
        peer.hub.recommended_configuration().await.unwrap();
        peer
    }

    pub fn disconnect(&self) {
        self.sender.close(1000, "bye");
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Poll `probe` every few milliseconds until it yields a value (1s cap)
pub async fn eventually<F, Fut, T>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Some(value) = probe().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 1s")
}

/// Wait until `hub` has exactly `count` peers
pub async fn wait_for_peer_count(hub: &Arc<SignalingHub>, count: usize) {
    eventually(|| async move { (hub.peer_count().await == count).then_some(()) }).await
}
