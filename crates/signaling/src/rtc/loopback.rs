//! In-process connection that simulates the offer/answer state machine
//!
//! Descriptions carry synthetic SDP (`<label>-offer-<n>`, `<label>-answer-<n>`)
//! and every local offer gathers exactly one synthetic host candidate. No
//! media or ICE traffic is produced. Used by tests and by embedders that
//! only need the signaling flow.

use super::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, IceCandidate, IceConnectionState,
    RtcConfiguration, RtcConnection, SdpType, SessionDescription, SignalingState,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Factory producing [`LoopbackConnection`]s
#[derive(Default)]
pub struct LoopbackConnectionFactory {
    label: String,
    created: Mutex<Vec<Arc<LoopbackConnection>>>,
    counter: AtomicUsize,
}

impl LoopbackConnectionFactory {
    /// Create a factory whose connections are labelled `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            created: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    /// Connections created so far, oldest first
    pub fn connections(&self) -> Vec<Arc<LoopbackConnection>> {
        self.created.lock().clone()
    }

    /// Most recently created connection
    pub fn last(&self) -> Option<Arc<LoopbackConnection>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl ConnectionFactory for LoopbackConnectionFactory {
    async fn create(
        &self,
        configuration: &RtcConfiguration,
    ) -> Result<(Arc<dyn RtcConnection>, ConnectionEvents)> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let label = if n == 0 {
            self.label.clone()
        } else {
            format!("{}{}", self.label, n)
        };
        debug!(
            label = %label,
            ice_servers = configuration.ice_servers.len(),
            "Creating loopback connection"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(LoopbackConnection::new(label, tx));
        self.created.lock().push(connection.clone());
        Ok((connection, rx))
    }
}

#[derive(Debug)]
struct LoopbackState {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied_candidates: Vec<IceCandidate>,
    offers: usize,
    answers: usize,
    ice_restarts: usize,
    reject_remote: bool,
}

/// Simulated peer connection
pub struct LoopbackConnection {
    label: String,
    state: Mutex<LoopbackState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl LoopbackConnection {
    fn new(label: String, events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            label,
            state: Mutex::new(LoopbackState {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                applied_candidates: Vec::new(),
                offers: 0,
                answers: 0,
                ice_restarts: 0,
                reject_remote: false,
            }),
            events,
        }
    }

    /// Connection label used in synthetic SDP
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Raise `negotiationneeded`
    pub fn trigger_negotiation_needed(&self) {
        self.emit(ConnectionEvent::NegotiationNeeded);
    }

    /// Simulate an ICE connection state change
    pub fn set_ice_connection_state(&self, state: IceConnectionState) {
        self.emit(ConnectionEvent::IceConnectionStateChanged(state));
    }

    /// Make every following `set_remote_description` fail
    pub fn reject_remote_descriptions(&self, reject: bool) {
        self.state.lock().reject_remote = reject;
    }

    /// Current local description
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    /// Current remote description
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Remote candidates applied so far
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().applied_candidates.clone()
    }

    /// Number of ICE restarts requested
    pub fn ice_restarts(&self) -> usize {
        self.state.lock().ice_restarts
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            debug!(label = %self.label, "Connection event receiver dropped");
        }
    }

    fn transition(&self, state: &mut LoopbackState, next: SignalingState) {
        if state.signaling != next {
            state.signaling = next;
            self.emit(ConnectionEvent::SignalingStateChanged(next));
        }
    }
}

#[async_trait]
impl RtcConnection for LoopbackConnection {
    async fn set_local_description(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        match state.signaling {
            SignalingState::Stable => {
                state.offers += 1;
                let offer =
                    SessionDescription::offer(format!("{}-offer-{}", self.label, state.offers));
                state.local = Some(offer.clone());
                self.transition(&mut state, SignalingState::HaveLocalOffer);

                let mut candidate =
                    IceCandidate::new(format!("{}-candidate-{}", self.label, state.offers));
                candidate.sdp_mid = Some("0".to_string());
                candidate.sdp_mline_index = Some(0);
                self.emit(ConnectionEvent::IceCandidate(Some(candidate)));
                Ok(offer)
            }
            SignalingState::HaveRemoteOffer => {
                state.answers += 1;
                let answer =
                    SessionDescription::answer(format!("{}-answer-{}", self.label, state.answers));
                state.local = Some(answer.clone());
                self.transition(&mut state, SignalingState::Stable);
                Ok(answer)
            }
            SignalingState::HaveLocalOffer => state
                .local
                .clone()
                .ok_or_else(|| Error::Negotiation("local offer missing".to_string())),
            other => Err(Error::Negotiation(format!(
                "cannot set local description in state {:?}",
                other
            ))),
        }
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        if state.reject_remote {
            return Err(Error::Negotiation(format!(
                "remote description rejected: {}",
                description.sdp
            )));
        }

        match (description.kind, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                if state.signaling == SignalingState::HaveLocalOffer {
                    debug!(label = %self.label, "Rolling back local offer");
                    state.local = None;
                }
                state.remote = Some(description);
                self.transition(&mut state, SignalingState::HaveRemoteOffer);
                Ok(())
            }
            (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                state.remote = Some(description);
                self.transition(&mut state, SignalingState::Stable);
                Ok(())
            }
            (kind, signaling) => Err(Error::Negotiation(format!(
                "cannot apply remote {:?} in state {:?}",
                kind, signaling
            ))),
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(Error::CandidateApplication(
                "no remote description".to_string(),
            ));
        }
        state.applied_candidates.push(candidate);
        Ok(())
    }

    async fn restart_ice(&self) -> Result<()> {
        self.state.lock().ice_restarts += 1;
        self.emit(ConnectionEvent::NegotiationNeeded);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.transition(&mut state, SignalingState::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connection(label: &str) -> (Arc<LoopbackConnection>, ConnectionEvents) {
        let factory = LoopbackConnectionFactory::new(label);
        let (_, events) = factory
            .create(&RtcConfiguration::default())
            .await
            .unwrap();
        (factory.last().unwrap(), events)
    }

    #[tokio::test]
    async fn test_offer_answer_cycle() {
        let (a, mut a_events) = connection("a").await;
        let (b, _b_events) = connection("b").await;

        let offer = a.set_local_description().await.unwrap();
        assert_eq!(offer, SessionDescription::offer("a-offer-1"));
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);
        assert_eq!(
            a_events.recv().await,
            Some(ConnectionEvent::SignalingStateChanged(
                SignalingState::HaveLocalOffer
            ))
        );
        assert!(matches!(
            a_events.recv().await,
            Some(ConnectionEvent::IceCandidate(Some(_)))
        ));

        b.set_remote_description(offer).await.unwrap();
        let answer = b.set_local_description().await.unwrap();
        assert_eq!(answer.kind, SdpType::Answer);
        assert_eq!(b.signaling_state(), SignalingState::Stable);

        a.set_remote_description(answer).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::Stable);
    }

    #[tokio::test]
    async fn test_remote_offer_rolls_back_local_offer() {
        let (b, _events) = connection("b").await;
        b.set_local_description().await.unwrap();

        b.set_remote_description(SessionDescription::offer("a-offer-1"))
            .await
            .unwrap();
        assert_eq!(b.signaling_state(), SignalingState::HaveRemoteOffer);
        assert!(b.local_description().is_none());
    }

    #[tokio::test]
    async fn test_candidate_needs_remote_description() {
        let (a, _events) = connection("a").await;
        let err = a.add_ice_candidate(IceCandidate::new("c")).await.unwrap_err();
        assert!(matches!(err, Error::CandidateApplication(_)));
    }

    #[tokio::test]
    async fn test_unexpected_answer_is_rejected() {
        let (a, _events) = connection("a").await;
        assert!(a
            .set_remote_description(SessionDescription::answer("x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_restart_ice_raises_negotiation_needed() {
        let (a, mut events) = connection("a").await;
        a.restart_ice().await.unwrap();
        assert_eq!(a.ice_restarts(), 1);
        assert_eq!(events.recv().await, Some(ConnectionEvent::NegotiationNeeded));
    }
}
