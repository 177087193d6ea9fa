//! Perfect negotiation
//!
//! One [`NegotiationMachine`] per peer pair resolves glare by role: the
//! impolite side keeps its own offer, the polite side yields. The
//! [`driver`] runs a machine against an [`RtcConnection`](crate::rtc::RtcConnection)
//! and a [`SignalingSink`].

pub mod driver;
mod machine;

pub use driver::{
    channel, spawn, Establishment, NegotiatorHandle, NegotiatorInbox, OfferReply, SignalingSink,
};
pub use machine::{Action, DescriptionPurpose, Event, NegotiationMachine, Role};
