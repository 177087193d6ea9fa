//! Client-side peer session
//!
//! A [`PeerSession`] joins a hub over one link, asks it for an RTC
//! configuration, creates a connection from a [`ConnectionFactory`] and runs
//! perfect negotiation with whichever peer answers first.

use crate::config::SessionConfig;
use crate::hub::{HubClient, TERMINATED};
use crate::negotiation::{self, Establishment, NegotiatorHandle, OfferReply, Role, SignalingSink};
use crate::protocol::{error_codes, ErrorObject, PeerId, PeerRequest, SendOfferResult};
use crate::rpc::{RpcChannel, RpcService};
use crate::rtc::{ConnectionFactory, IceCandidate, RtcConnection, SessionDescription};
use crate::transport::{self, Link, CLOSE_NORMAL};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Remote peer id plus candidates gathered before it was known
#[derive(Default)]
struct RemotePeer {
    inner: Mutex<RemoteState>,
}

#[derive(Default)]
struct RemoteState {
    id: Option<PeerId>,
    queued: Vec<IceCandidate>,
}

impl RemotePeer {
    fn id(&self) -> Option<PeerId> {
        self.inner.lock().id.clone()
    }

    /// Remember `id` if none is known yet; returns candidates to flush
    fn bind(&self, id: &PeerId) -> Vec<IceCandidate> {
        let mut state = self.inner.lock();
        match &state.id {
            Some(existing) if existing != id => {
                debug!(remote = %existing, other = %id, "Remote peer already bound");
                Vec::new()
            }
            Some(_) => Vec::new(),
            None => {
                info!(remote = %id, "Remote peer bound");
                state.id = Some(id.clone());
                std::mem::take(&mut state.queued)
            }
        }
    }

    /// Target for `candidate`, or queue it until a remote is known
    fn target_for(&self, candidate: IceCandidate) -> Option<(IceCandidate, PeerId)> {
        let mut state = self.inner.lock();
        match state.id.clone() {
            Some(id) => Some((candidate, id)),
            None => {
                state.queued.push(candidate);
                None
            }
        }
    }
}

fn flush_candidates(hub: &HubClient, to_id: &PeerId, candidates: Vec<IceCandidate>) {
    for candidate in candidates {
        if let Err(e) = hub.send_candidate_to(candidate, to_id.clone()) {
            warn!(to_id = %to_id, "Failed to send queued candidate: {}", e);
        }
    }
}

/// Peer-side handler for hub-originated requests
struct PeerService {
    negotiator: NegotiatorHandle,
    remote: Arc<RemotePeer>,
    hub: HubClient,
}

#[async_trait]
impl RpcService for PeerService {
    type Request = PeerRequest;

    async fn handle_call(&self, request: PeerRequest) -> std::result::Result<Value, ErrorObject> {
        match request {
            PeerRequest::SendOffer(params) => {
                debug!(from_id = %params.from_id, "Offer received");
                let reply = self.negotiator.offer_received(params.description).await;
                match reply {
                    Ok(OfferReply::Answer(description)) => {
                        let queued = self.remote.bind(&params.from_id);
                        flush_candidates(&self.hub, &params.from_id, queued);
                        serde_json::to_value(SendOfferResult {
                            to_id: params.from_id,
                            description,
                        })
                        .map_err(|e| ErrorObject::internal(e.to_string()))
                    }
                    Ok(OfferReply::Ignored) => Err(ErrorObject::new(
                        error_codes::OFFER_IGNORED,
                        "Offer ignored due to collision",
                    )),
                    Ok(OfferReply::Failed(e)) => {
                        Err(ErrorObject::new(error_codes::OFFER_INVALID, e.to_string()))
                    }
                    Err(_) => Err(ErrorObject::internal("negotiation stopped")),
                }
            }
            PeerRequest::SendCandidate(params) => {
                self.negotiator.candidate_received(params.candidate);
                Ok(Value::Null)
            }
        }
    }
}

/// Sends offers and candidates through the hub
struct HubSink {
    hub: HubClient,
    remote: Arc<RemotePeer>,
}

#[async_trait]
impl SignalingSink for HubSink {
    async fn send_offer(&self, offer: SessionDescription) -> Result<Vec<SessionDescription>> {
        let entries = self.hub.broadcast_offer(offer).await?;
        debug!(answers = entries.len(), "Broadcast returned");

        if let Some(first) = entries.first() {
            let queued = self.remote.bind(&first.from_id);
            flush_candidates(&self.hub, &first.from_id, queued);
        }
        Ok(entries.into_iter().map(|entry| entry.description).collect())
    }

    fn send_candidate(&self, candidate: IceCandidate) -> Result<()> {
        match self.remote.target_for(candidate) {
            Some((candidate, to_id)) => self.hub.send_candidate_to(candidate, to_id),
            None => {
                debug!("Remote peer unknown, queueing candidate");
                Ok(())
            }
        }
    }
}

/// One peer's signaling session with a hub
pub struct PeerSession {
    channel: RpcChannel,
    negotiator: NegotiatorHandle,
    connection: Arc<dyn RtcConnection>,
    establishment: Establishment,
    remote: Arc<RemotePeer>,
    reader: JoinHandle<()>,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    /// Connect to the hub at `config.signaling_url` and start negotiating
    pub async fn connect(config: &SessionConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate()?;
        let link = transport::connect(&config.signaling_url, &config.connect_options()).await?;
        Self::start(link, config.role, factory).await
    }

    /// Start a session over an already-open link
    pub async fn start(
        mut link: Link,
        role: Role,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        let (negotiator, inbox) = negotiation::channel();
        let remote = Arc::new(RemotePeer::default());

        let sender = link.sender();
        // Notification-only view of the same link; holds no reference to `channel`
        let notifier = HubClient::new(RpcChannel::client("session-notify", sender.clone()));
        let service = PeerService {
            negotiator: negotiator.clone(),
            remote: remote.clone(),
            hub: notifier,
        };
        let channel = RpcChannel::new("session", sender, service);
        let hub = HubClient::new(channel.clone());

        let reader = {
            let channel = channel.clone();
            let negotiator = negotiator.clone();
            tokio::spawn(async move {
                while let Some(text) = link.recv().await {
                    channel.receive(&text).await;
                }
                info!("Signaling link closed");
                channel.terminate(TERMINATED);
                negotiator.shutdown();
            })
        };

        let configuration = match hub.recommended_configuration().await {
            Ok(configuration) => configuration,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };
        debug!(ice_servers = configuration.ice_servers.len(), "Received RTC configuration");

        let (connection, events) = match factory.create(&configuration).await {
            Ok(created) => created,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };

        let sink = Arc::new(HubSink {
            hub,
            remote: remote.clone(),
        });
        let (driver, establishment) =
            negotiation::spawn(inbox, role, connection.clone(), events, sink);

        info!(?role, "Peer session started");
        Ok(Self {
            channel,
            negotiator,
            connection,
            establishment,
            remote,
            reader,
            driver,
        })
    }

    /// Wait for the first stable signaling state
    pub async fn established(&self) -> Result<()> {
        self.establishment.wait().await
    }

    /// Underlying connection
    pub fn connection(&self) -> Arc<dyn RtcConnection> {
        self.connection.clone()
    }

    /// Peer this session negotiated with, once known
    pub fn remote_peer(&self) -> Option<PeerId> {
        self.remote.id()
    }

    /// Signaling channel to the hub
    pub fn channel(&self) -> &RpcChannel {
        &self.channel
    }

    /// Close the signaling link and the connection
    pub async fn close(self) -> Result<()> {
        info!("Closing peer session");
        self.channel.terminate("closed");
        self.channel.link_sender().close(CLOSE_NORMAL, "closed");
        self.negotiator.shutdown();
        let _ = self.driver.await;
        self.reader.abort();
        self.connection.close().await
    }
}
