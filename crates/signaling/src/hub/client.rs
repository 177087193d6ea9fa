use crate::protocol::{
    methods, BroadcastOfferEntry, BroadcastOfferParams, CandidateParams, PeerId,
};
use crate::rpc::RpcChannel;
use crate::rtc::{IceCandidate, RtcConfiguration, SessionDescription};
use crate::Result;
use serde_json::Value;

/// Typed calls a peer makes to the hub
#[derive(Debug, Clone)]
pub struct HubClient {
    channel: RpcChannel,
}

impl HubClient {
    pub fn new(channel: RpcChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &RpcChannel {
        &self.channel
    }

    /// getRecommendedRPCConfiguration
    pub async fn recommended_configuration(&self) -> Result<RtcConfiguration> {
        let result = self
            .channel
            .call(methods::GET_RECOMMENDED_CONFIGURATION, Value::Null)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// broadcastOffer: answers from every peer that accepted the offer
    pub async fn broadcast_offer(
        &self,
        description: SessionDescription,
    ) -> Result<Vec<BroadcastOfferEntry>> {
        self.channel
            .call_typed(methods::BROADCAST_OFFER, &BroadcastOfferParams { description })
            .await
    }

    /// sendCandidateTo as a notification
    pub fn send_candidate_to(&self, candidate: IceCandidate, to_id: PeerId) -> Result<()> {
        self.channel
            .notify_typed(methods::SEND_CANDIDATE_TO, &CandidateParams { candidate, to_id })
    }
}
