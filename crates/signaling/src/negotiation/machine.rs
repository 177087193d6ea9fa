//! Perfect-negotiation transition function
//!
//! [`NegotiationMachine::handle`] never performs I/O. It consumes one
//! [`Event`] and returns the [`Action`]s the driver must execute; results of
//! those actions come back as further events.

use crate::rtc::{IceCandidate, IceConnectionState, SdpType, SessionDescription, SignalingState};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Glare-resolution role, fixed for a pair's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Yields to a colliding remote offer
    Polite,
    /// Keeps its own in-flight offer
    Impolite,
}

impl Role {
    pub fn is_polite(self) -> bool {
        self == Role::Polite
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "polite" => Ok(Role::Polite),
            "impolite" => Ok(Role::Impolite),
            other => Err(Error::InvalidConfig(format!(
                "role must be polite or impolite, got {}",
                other
            ))),
        }
    }
}

/// Why a local description is being set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionPurpose {
    Offer,
    Answer,
}

/// Input to the state machine
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection asked for (re)negotiation
    NegotiationNeeded {
        /// Signaling state when the request was picked up
        signaling_state: SignalingState,
    },

    /// A `SetLocalDescription` action finished
    LocalDescriptionSet {
        purpose: DescriptionPurpose,
        result: Result<SessionDescription, Error>,
        /// Signaling state right after the attempt
        signaling_state: SignalingState,
    },

    /// A description arrived over signaling
    DescriptionReceived {
        description: SessionDescription,
        /// Local signaling state when the description was picked up
        signaling_state: SignalingState,
    },

    /// A `SetRemoteDescription` action finished
    RemoteDescriptionSet {
        kind: SdpType,
        result: Result<(), Error>,
    },

    /// A remote candidate arrived over signaling
    CandidateReceived(IceCandidate),

    /// An `AddIceCandidate` action finished
    CandidateApplied(Result<(), Error>),

    /// The connection gathered a local candidate (`None` = complete)
    LocalCandidate(Option<IceCandidate>),

    IceConnectionStateChanged(IceConnectionState),

    SignalingStateChanged(SignalingState),

    /// The signaling channel could not deliver an offer
    SignalingFailed(Error),
}

/// Work the driver must perform
#[derive(Debug, Clone)]
pub enum Action {
    /// Create and apply an offer or answer
    SetLocalDescription(DescriptionPurpose),
    /// Apply a remote description
    SetRemoteDescription(SessionDescription),
    /// Apply a remote candidate
    AddIceCandidate(IceCandidate),
    /// Restart ICE on the connection
    RestartIce,
    /// Send the local offer to the other side
    SendOffer(SessionDescription),
    /// Reply to the pending inbound offer with this answer
    SendAnswer(SessionDescription),
    /// Send a local candidate to the other side
    SendCandidate(IceCandidate),
    /// Reply to the pending inbound offer: dropped by glare
    OfferIgnored,
    /// Reply to the pending inbound offer: could not be applied
    RejectOffer(Error),
    /// Resolve the establishment outcome
    Settle(Result<(), Error>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Established,
    Failed,
}

/// Per-pair negotiation state
#[derive(Debug)]
pub struct NegotiationMachine {
    role: Role,
    making_offer: bool,
    ignore_offer: bool,
    /// A remote offer was accepted while our own offer was being made
    offer_superseded: bool,
    /// Between accepting a remote offer and setting the local answer
    answering: bool,
    has_remote_description: bool,
    /// Buffered remote candidates, each with whether its failure is masked
    pending_candidates: Vec<(IceCandidate, bool)>,
    /// Failure masks of issued `AddIceCandidate` actions, in issue order
    applying: VecDeque<bool>,
    outcome: Outcome,
}

impl NegotiationMachine {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            making_offer: false,
            ignore_offer: false,
            offer_superseded: false,
            answering: false,
            has_remote_description: false,
            pending_candidates: Vec::new(),
            applying: VecDeque::new(),
            outcome: Outcome::Pending,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// True while a local offer is being created
    pub fn making_offer(&self) -> bool {
        self.making_offer
    }

    /// True when the last inbound offer was dropped by glare
    pub fn ignore_offer(&self) -> bool {
        self.ignore_offer
    }

    /// True once the establishment outcome has been resolved
    pub fn is_settled(&self) -> bool {
        self.outcome != Outcome::Pending
    }

    /// Apply one event and return the resulting actions
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::NegotiationNeeded { signaling_state } => {
                self.on_negotiation_needed(signaling_state)
            }
            Event::LocalDescriptionSet {
                purpose,
                result,
                signaling_state,
            } => self.on_local_description_set(purpose, result, signaling_state),
            Event::DescriptionReceived {
                description,
                signaling_state,
            } => self.on_description_received(description, signaling_state),
            Event::RemoteDescriptionSet { kind, result } => {
                self.on_remote_description_set(kind, result)
            }
            Event::CandidateReceived(candidate) => self.on_candidate_received(candidate),
            Event::CandidateApplied(result) => self.on_candidate_applied(result),
            Event::LocalCandidate(Some(candidate)) => vec![Action::SendCandidate(candidate)],
            Event::LocalCandidate(None) => {
                debug!("Local ICE gathering complete");
                Vec::new()
            }
            Event::IceConnectionStateChanged(state) => self.on_ice_state(state),
            Event::SignalingStateChanged(state) => self.on_signaling_state(state),
            Event::SignalingFailed(err) => {
                self.fail(Error::Negotiation(format!("signaling failed: {}", err)))
            }
        }
    }

    fn on_negotiation_needed(&mut self, signaling_state: SignalingState) -> Vec<Action> {
        if self.making_offer || self.answering || signaling_state != SignalingState::Stable {
            debug!(
                making_offer = self.making_offer,
                answering = self.answering,
                ?signaling_state,
                "Negotiation already in progress, skipping negotiationneeded"
            );
            return Vec::new();
        }
        self.making_offer = true;
        self.offer_superseded = false;
        vec![Action::SetLocalDescription(DescriptionPurpose::Offer)]
    }

    fn on_local_description_set(
        &mut self,
        purpose: DescriptionPurpose,
        result: Result<SessionDescription, Error>,
        signaling_state: SignalingState,
    ) -> Vec<Action> {
        match purpose {
            DescriptionPurpose::Offer => {
                self.making_offer = false;
                let superseded = std::mem::take(&mut self.offer_superseded);
                match result {
                    Ok(offer)
                        if offer.is_offer()
                            && !superseded
                            && signaling_state == SignalingState::HaveLocalOffer =>
                    {
                        vec![Action::SendOffer(offer)]
                    }
                    Ok(_) => {
                        debug!(?signaling_state, "Local offer superseded, not sending");
                        Vec::new()
                    }
                    Err(err) => self.fail(Error::Negotiation(format!(
                        "failed to create local offer: {}",
                        err
                    ))),
                }
            }
            DescriptionPurpose::Answer => {
                self.answering = false;
                match result {
                    Ok(answer) => vec![Action::SendAnswer(answer)],
                    Err(err) => {
                        let err =
                            Error::Negotiation(format!("failed to create local answer: {}", err));
                        let mut actions = vec![Action::RejectOffer(err.clone())];
                        actions.extend(self.fail(err));
                        actions
                    }
                }
            }
        }
    }

    fn on_description_received(
        &mut self,
        description: SessionDescription,
        signaling_state: SignalingState,
    ) -> Vec<Action> {
        let collision = description.is_offer()
            && (self.making_offer || signaling_state != SignalingState::Stable);

        self.ignore_offer = !self.role.is_polite() && collision;
        if self.ignore_offer {
            debug!(role = ?self.role, ?signaling_state, "Ignoring colliding offer");
            return vec![Action::OfferIgnored];
        }

        if collision {
            info!("Offer collision, yielding to remote offer");
            if self.making_offer {
                self.offer_superseded = true;
            }
        }
        if description.is_offer() {
            self.answering = true;
        }
        vec![Action::SetRemoteDescription(description)]
    }

    fn on_remote_description_set(&mut self, kind: SdpType, result: Result<(), Error>) -> Vec<Action> {
        match result {
            Ok(()) => {
                self.has_remote_description = true;
                let pending = std::mem::take(&mut self.pending_candidates);
                let mut actions: Vec<Action> = pending
                    .into_iter()
                    .map(|(candidate, masked)| self.apply_candidate(candidate, masked))
                    .collect();
                if kind == SdpType::Offer {
                    actions.push(Action::SetLocalDescription(DescriptionPurpose::Answer));
                }
                actions
            }
            Err(err) => {
                let err = Error::Negotiation(format!(
                    "failed to apply remote {:?}: {}",
                    kind, err
                ));
                let mut actions = Vec::new();
                if kind == SdpType::Offer {
                    self.answering = false;
                    actions.push(Action::RejectOffer(err.clone()));
                }
                actions.extend(self.fail(err));
                actions
            }
        }
    }

    fn on_candidate_received(&mut self, candidate: IceCandidate) -> Vec<Action> {
        // The mask is fixed by the offer state when the candidate arrived
        let masked = self.ignore_offer;
        if self.has_remote_description {
            vec![self.apply_candidate(candidate, masked)]
        } else {
            debug!(masked, "No remote description yet, buffering candidate");
            self.pending_candidates.push((candidate, masked));
            Vec::new()
        }
    }

    fn apply_candidate(&mut self, candidate: IceCandidate, masked: bool) -> Action {
        self.applying.push_back(masked);
        Action::AddIceCandidate(candidate)
    }

    fn on_candidate_applied(&mut self, result: Result<(), Error>) -> Vec<Action> {
        let masked = self.applying.pop_front().unwrap_or(self.ignore_offer);
        match result {
            Ok(()) => Vec::new(),
            Err(err) if masked => {
                debug!("Ignoring candidate failure for dropped offer: {}", err);
                Vec::new()
            }
            Err(err) => self.fail(Error::CandidateApplication(err.to_string())),
        }
    }

    fn on_ice_state(&mut self, state: IceConnectionState) -> Vec<Action> {
        debug!(?state, "ICE connection state changed");
        if state == IceConnectionState::Failed {
            warn!("ICE connection failed, restarting ICE");
            return vec![Action::RestartIce];
        }
        Vec::new()
    }

    fn on_signaling_state(&mut self, state: SignalingState) -> Vec<Action> {
        debug!(?state, "Signaling state changed");
        if state == SignalingState::Stable && self.outcome == Outcome::Pending {
            info!(role = ?self.role, "Negotiation reached stable");
            self.outcome = Outcome::Established;
            return vec![Action::Settle(Ok(()))];
        }
        Vec::new()
    }

    fn fail(&mut self, err: Error) -> Vec<Action> {
        if self.outcome == Outcome::Pending {
            error!("Negotiation failed: {}", err);
            self.outcome = Outcome::Failed;
            vec![Action::Settle(Err(err))]
        } else {
            warn!("Negotiation error after settlement: {}", err);
            Vec::new()
        }
    }
}
