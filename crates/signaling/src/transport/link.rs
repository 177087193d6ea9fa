//! Bidirectional text-message channel

use crate::{Error, Result};
use tokio::sync::mpsc;
use tracing::debug;

/// Normal closure code
pub const CLOSE_NORMAL: u16 = 1000;

/// Closure code used when the peer stopped answering keep-alive pings
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Closure code for abnormal transport loss
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Unit carried by a [`Link`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One text message
    Text(String),
    /// Close request with code and reason
    Close {
        /// Close code (WebSocket numbering)
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Sending half of a [`Link`]; cheap to clone
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl LinkSender {
    /// Queue a text message
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] once the other side is gone.
    pub fn send(&self, text: String) -> Result<()> {
        self.tx
            .send(Frame::Text(text))
            .map_err(|_| Error::Transport("link closed".to_string()))
    }

    /// Ask the other side to close
    pub fn close(&self, code: u16, reason: &str) {
        let frame = Frame::Close {
            code,
            reason: reason.to_string(),
        };
        if self.tx.send(frame).is_err() {
            debug!(code, reason, "Link already closed");
        }
    }

    /// True once the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn send_frame(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::Transport("link closed".to_string()))
    }
}

/// One end of a bidirectional text-message channel
#[derive(Debug)]
pub struct Link {
    sender: LinkSender,
    receiver: mpsc::UnboundedReceiver<Frame>,
    close: Option<(u16, String)>,
}

impl Link {
    /// Create two connected in-memory ends
    pub fn pair() -> (Link, Link) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Link {
            sender: LinkSender { tx: a_tx },
            receiver: b_rx,
            close: None,
        };
        let b = Link {
            sender: LinkSender { tx: b_tx },
            receiver: a_rx,
            close: None,
        };
        (a, b)
    }

    /// Sending handle for this end
    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    /// Next text message, or `None` once the link is closed
    pub async fn recv(&mut self) -> Option<String> {
        match self.recv_frame().await? {
            Frame::Text(text) => Some(text),
            Frame::Close { .. } => None,
        }
    }

    /// Close code and reason, once the link has closed
    pub fn close_reason(&self) -> Option<(u16, &str)> {
        self.close
            .as_ref()
            .map(|(code, reason)| (*code, reason.as_str()))
    }

    pub(crate) async fn recv_frame(&mut self) -> Option<Frame> {
        if self.close.is_some() {
            return None;
        }
        match self.receiver.recv().await {
            Some(Frame::Close { code, reason }) => {
                debug!(code, reason = %reason, "Link closed by remote");
                self.close = Some((code, reason.clone()));
                Some(Frame::Close { code, reason })
            }
            Some(frame) => Some(frame),
            None => {
                self.close = Some((CLOSE_ABNORMAL, "link dropped".to_string()));
                None
            }
        }
    }
}
