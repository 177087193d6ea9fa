use super::SignalingHub;
use crate::protocol::{error_codes, ErrorObject, HubRequest, PeerId};
use crate::rpc::RpcService;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Hub-side handler bound to one peer's channel
pub(super) struct HubService {
    hub: Weak<SignalingHub>,
    peer_id: PeerId,
}

impl HubService {
    pub(super) fn new(hub: Weak<SignalingHub>, peer_id: PeerId) -> Self {
        Self { hub, peer_id }
    }

    fn hub(&self) -> Result<Arc<SignalingHub>, ErrorObject> {
        self.hub
            .upgrade()
            .ok_or_else(|| ErrorObject::internal("hub is shutting down"))
    }

    async fn require_ready(&self, hub: &SignalingHub) -> Result<(), ErrorObject> {
        if hub.is_ready(&self.peer_id).await {
            Ok(())
        } else {
            Err(ErrorObject::new(
                error_codes::PEER_NOT_READY,
                format!("Peer {} is not ready", self.peer_id),
            ))
        }
    }
}

#[async_trait]
impl RpcService for HubService {
    type Request = HubRequest;

    async fn handle_call(&self, request: HubRequest) -> Result<Value, ErrorObject> {
        let hub = self.hub()?;
        debug!(peer_id = %self.peer_id, method = request.method_name(), "Hub request");

        match request {
            HubRequest::GetRecommendedConfiguration => {
                serde_json::to_value(hub.recommended_configuration())
                    .map_err(|e| ErrorObject::internal(e.to_string()))
            }
            HubRequest::BroadcastOffer(params) => {
                self.require_ready(&hub).await?;
                let entries = hub.broadcast_offer(&self.peer_id, params.description).await;
                serde_json::to_value(entries).map_err(|e| ErrorObject::internal(e.to_string()))
            }
            HubRequest::SendCandidateTo(params) => {
                self.require_ready(&hub).await?;
                hub.send_candidate_to(&self.peer_id, params).await;
                Ok(Value::Null)
            }
        }
    }
}
