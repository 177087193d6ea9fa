//! Message transport adapters
//!
//! - [`Link`]: bidirectional text channel (in-memory via [`Link::pair`])
//! - [`websocket`]: WebSocket client connect and the stream pump shared with
//!   the hub server

mod link;
pub mod websocket;

pub use link::{Frame, Link, LinkSender, CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL};
pub use websocket::{connect, ConnectOptions};
