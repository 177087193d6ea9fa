//! Task that runs a [`NegotiationMachine`] against a live connection
//!
//! Connection operations execute one at a time on an operations task, in
//! the order the machine requested them, and report back as events.
//! Outbound offers run on their own task since they wait on the remote side.

use super::machine::{Action, DescriptionPurpose, Event, NegotiationMachine, Role};
use crate::rtc::{
    ConnectionEvent, ConnectionEvents, IceCandidate, RtcConnection, SessionDescription,
    SignalingState,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outbound half of the signaling path used by the driver
#[async_trait]
pub trait SignalingSink: Send + Sync + 'static {
    /// Deliver a local offer and return the answers it produced
    async fn send_offer(&self, offer: SessionDescription) -> Result<Vec<SessionDescription>>;

    /// Deliver a local candidate without waiting
    fn send_candidate(&self, candidate: IceCandidate) -> Result<()>;
}

/// How an inbound offer was resolved
#[derive(Debug, Clone)]
pub enum OfferReply {
    /// Local answer to send back
    Answer(SessionDescription),
    /// Dropped by the impolite side of a collision
    Ignored,
    /// Could not be applied, or was superseded by a newer offer
    Failed(Error),
}

enum Command {
    Offer {
        description: SessionDescription,
        reply: oneshot::Sender<OfferReply>,
    },
    Answer(SessionDescription),
    Candidate(IceCandidate),
    Event(Event),
    Shutdown,
}

/// Feeds signaling input into a running negotiation; cheap to clone
#[derive(Debug, Clone)]
pub struct NegotiatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Offer { .. } => f.write_str("Offer"),
            Command::Answer(_) => f.write_str("Answer"),
            Command::Candidate(_) => f.write_str("Candidate"),
            Command::Event(event) => write!(f, "Event({:?})", event),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl NegotiatorHandle {
    /// Hand over an inbound offer; the receiver yields how it was resolved
    pub fn offer_received(&self, description: SessionDescription) -> oneshot::Receiver<OfferReply> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Offer { description, reply }).is_err() {
            debug!("Negotiator stopped, dropping inbound offer");
        }
        rx
    }

    /// Hand over an inbound answer
    pub fn answer_received(&self, description: SessionDescription) {
        if self.tx.send(Command::Answer(description)).is_err() {
            debug!("Negotiator stopped, dropping inbound answer");
        }
    }

    /// Hand over an inbound candidate
    pub fn candidate_received(&self, candidate: IceCandidate) {
        if self.tx.send(Command::Candidate(candidate)).is_err() {
            debug!("Negotiator stopped, dropping inbound candidate");
        }
    }

    /// Stop the driver
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Commands queued before the driver starts
pub struct NegotiatorInbox {
    rx: mpsc::UnboundedReceiver<Command>,
    loopback: mpsc::WeakUnboundedSender<Command>,
}

/// Create a handle/inbox pair; input sent before [`spawn`] is kept
pub fn channel() -> (NegotiatorHandle, NegotiatorInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let loopback = tx.downgrade();
    (NegotiatorHandle { tx }, NegotiatorInbox { rx, loopback })
}

/// Establishment outcome of a negotiation
#[derive(Debug, Clone)]
pub struct Establishment {
    rx: watch::Receiver<Option<Result<()>>>,
}

impl Establishment {
    /// Wait until the first stable state, or the fatal cause
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(Error::Terminated("negotiation stopped".to_string())))
    }

    /// Outcome so far, if settled
    pub fn current(&self) -> Option<Result<()>> {
        self.rx.borrow().clone()
    }
}

/// Start the driver task
pub fn spawn(
    inbox: NegotiatorInbox,
    role: Role,
    connection: Arc<dyn RtcConnection>,
    events: ConnectionEvents,
    sink: Arc<dyn SignalingSink>,
) -> (JoinHandle<()>, Establishment) {
    let (outcome_tx, outcome_rx) = watch::channel(None);
    let (ops_tx, ops_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_operations(
        connection.clone(),
        ops_rx,
        inbox.loopback.clone(),
    ));

    let driver = Driver {
        machine: NegotiationMachine::new(role),
        connection,
        sink,
        commands: inbox.rx,
        loopback: inbox.loopback,
        events,
        ops: ops_tx,
        pending_reply: None,
        outcome: outcome_tx,
    };

    info!(?role, "Starting negotiation driver");
    let handle = tokio::spawn(driver.run());
    (handle, Establishment { rx: outcome_rx })
}

struct Driver {
    machine: NegotiationMachine,
    connection: Arc<dyn RtcConnection>,
    sink: Arc<dyn SignalingSink>,
    commands: mpsc::UnboundedReceiver<Command>,
    loopback: mpsc::WeakUnboundedSender<Command>,
    events: ConnectionEvents,
    ops: mpsc::UnboundedSender<Operation>,
    pending_reply: Option<oneshot::Sender<OfferReply>>,
    outcome: watch::Sender<Option<Result<()>>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = self.events.recv() => {
                    let event = connection_event(event, self.connection.signaling_state());
                    self.apply(event);
                }
            }
        }

        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(OfferReply::Failed(Error::Terminated(
                "negotiation stopped".to_string(),
            )));
        }
        self.outcome.send_if_modified(|outcome| {
            if outcome.is_none() {
                *outcome = Some(Err(Error::Terminated("negotiation stopped".to_string())));
                true
            } else {
                false
            }
        });
        info!("Negotiation driver stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Offer { description, reply } => {
                if let Some(previous) = self.pending_reply.replace(reply) {
                    let _ = previous.send(OfferReply::Failed(Error::Negotiation(
                        "superseded by a newer offer".to_string(),
                    )));
                }
                let signaling_state = self.connection.signaling_state();
                self.apply(Event::DescriptionReceived {
                    description,
                    signaling_state,
                });
            }
            Command::Answer(description) => {
                let signaling_state = self.connection.signaling_state();
                self.apply(Event::DescriptionReceived {
                    description,
                    signaling_state,
                });
            }
            Command::Candidate(candidate) => self.apply(Event::CandidateReceived(candidate)),
            Command::Event(event) => self.apply(event),
            Command::Shutdown => {}
        }
    }

    fn apply(&mut self, event: Event) {
        for action in self.machine.handle(event) {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::SetLocalDescription(purpose) => self.queue(Operation::SetLocal(purpose)),
            Action::SetRemoteDescription(description) => {
                self.queue(Operation::SetRemote(description))
            }
            Action::AddIceCandidate(candidate) => self.queue(Operation::AddCandidate(candidate)),
            Action::RestartIce => self.queue(Operation::RestartIce),
            Action::SendOffer(offer) => {
                let sink = self.sink.clone();
                let loopback = self.loopback.clone();
                tokio::spawn(async move {
                    let command = match sink.send_offer(offer).await {
                        Ok(answers) => {
                            let mut answers = answers.into_iter();
                            let Some(first) = answers.next() else {
                                debug!("No peer answered the offer");
                                return;
                            };
                            let extra = answers.count();
                            if extra > 0 {
                                warn!(extra, "Multiple answers to one offer, applying the first");
                            }
                            Command::Answer(first)
                        }
                        Err(e) => Command::Event(Event::SignalingFailed(e)),
                    };
                    post(&loopback, command);
                });
            }
            Action::SendAnswer(answer) => self.reply(OfferReply::Answer(answer)),
            Action::OfferIgnored => self.reply(OfferReply::Ignored),
            Action::RejectOffer(err) => self.reply(OfferReply::Failed(err)),
            Action::SendCandidate(candidate) => {
                if let Err(e) = self.sink.send_candidate(candidate) {
                    warn!("Failed to send local candidate: {}", e);
                }
            }
            Action::Settle(outcome) => {
                self.outcome.send_replace(Some(outcome));
            }
        }
    }

    fn queue(&self, operation: Operation) {
        if self.ops.send(operation).is_err() {
            warn!("Connection operations task stopped");
        }
    }

    fn reply(&mut self, reply: OfferReply) {
        match self.pending_reply.take() {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(?reply, "No inbound offer awaiting a reply"),
        }
    }
}

enum Operation {
    SetLocal(DescriptionPurpose),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    RestartIce,
}

async fn run_operations(
    connection: Arc<dyn RtcConnection>,
    mut ops: mpsc::UnboundedReceiver<Operation>,
    loopback: mpsc::WeakUnboundedSender<Command>,
) {
    while let Some(operation) = ops.recv().await {
        let event = match operation {
            Operation::SetLocal(purpose) => {
                let result = connection.set_local_description().await;
                Event::LocalDescriptionSet {
                    purpose,
                    result,
                    signaling_state: connection.signaling_state(),
                }
            }
            Operation::SetRemote(description) => {
                let kind = description.kind;
                let result = connection.set_remote_description(description).await;
                Event::RemoteDescriptionSet { kind, result }
            }
            Operation::AddCandidate(candidate) => {
                Event::CandidateApplied(connection.add_ice_candidate(candidate).await)
            }
            Operation::RestartIce => {
                if let Err(e) = connection.restart_ice().await {
                    warn!("ICE restart failed: {}", e);
                }
                continue;
            }
        };
        post(&loopback, Command::Event(event));
    }
}

fn post(loopback: &mpsc::WeakUnboundedSender<Command>, command: Command) {
    match loopback.upgrade() {
        Some(tx) => {
            let _ = tx.send(command);
        }
        None => debug!(?command, "Negotiator gone, dropping result"),
    }
}

fn connection_event(event: ConnectionEvent, signaling_state: SignalingState) -> Event {
    match event {
        ConnectionEvent::NegotiationNeeded => Event::NegotiationNeeded { signaling_state },
        ConnectionEvent::IceCandidate(candidate) => Event::LocalCandidate(candidate),
        ConnectionEvent::IceConnectionStateChanged(state) => {
            Event::IceConnectionStateChanged(state)
        }
        ConnectionEvent::SignalingStateChanged(state) => Event::SignalingStateChanged(state),
    }
}
