//! WebSocket transport
//!
//! A spawned pump task bridges one WebSocket stream and the I/O end of a
//! [`Link::pair`]; the application keeps the other end. The pump also runs
//! the keep-alive: a ping every interval, force-close when the previous ping
//! went unanswered.

use super::link::{Frame, Link, CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Client connect options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Maximum time for TCP connect plus WebSocket handshake
    pub connect_timeout: Duration,

    /// Keep-alive ping interval
    pub keepalive_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// Open a WebSocket connection to a signaling hub
///
/// # Errors
///
/// [`Error::ConnectTimeout`] when the handshake does not finish within
/// `connect_timeout`, [`Error::Transport`] when it fails.
pub async fn connect(url: &str, options: &ConnectOptions) -> Result<Link> {
    info!("Connecting to signaling hub at {}", url);

    let (ws_stream, _response) =
        tokio::time::timeout(options.connect_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| {
                Error::ConnectTimeout(format!(
                    "{} did not accept within {:?}",
                    url, options.connect_timeout
                ))
            })?
            .map_err(|e| Error::Transport(format!("Failed to connect to {}: {}", url, e)))?;

    info!("Connected to signaling hub at {}", url);
    Ok(spawn_pump(ws_stream, options.keepalive_interval, url.to_string()))
}

/// Bridge a WebSocket stream to a [`Link`] on a background task
pub(crate) fn spawn_pump<S>(ws_stream: WebSocketStream<S>, keepalive: Duration, label: String) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (app, io) = Link::pair();
    tokio::spawn(pump(ws_stream, io, keepalive, label));
    app
}

async fn pump<S>(ws_stream: WebSocketStream<S>, mut io: Link, keepalive: Duration, label: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let app = io.sender();

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
    let mut awaiting_pong = false;

    let (code, reason) = loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if app.send(text).is_err() {
                        break (CLOSE_NORMAL, "application closed".to_string());
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    awaiting_pong = false;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(label = %label, "WebSocket closed by remote");
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    break (code, reason);
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(label = %label, "Dropping binary WebSocket frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(label = %label, "WebSocket error: {}", e);
                    break (CLOSE_ABNORMAL, e.to_string());
                }
                None => break (CLOSE_ABNORMAL, "stream ended".to_string()),
            },
            frame = io.recv_frame() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        warn!(label = %label, "Failed to send WebSocket message: {}", e);
                        break (CLOSE_ABNORMAL, e.to_string());
                    }
                }
                Some(Frame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break (code, reason);
                }
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break (CLOSE_NORMAL, "link dropped".to_string());
                }
            },
            _ = ticker.tick() => {
                if awaiting_pong {
                    warn!(label = %label, "No pong since last keep-alive ping, closing");
                    let frame = CloseFrame {
                        code: CloseCode::from(CLOSE_GOING_AWAY),
                        reason: "keep-alive timeout".into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break (CLOSE_GOING_AWAY, "keep-alive timeout".to_string());
                }
                awaiting_pong = true;
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                    break (CLOSE_ABNORMAL, e.to_string());
                }
            }
        }
    };

    debug!(label = %label, code, reason = %reason, "WebSocket pump stopped");
    app.close(code, &reason);
}
