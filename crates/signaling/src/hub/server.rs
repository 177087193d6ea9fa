//! WebSocket front end for a [`SignalingHub`]

use super::SignalingHub;
use crate::transport::websocket::spawn_pump;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, instrument, warn};

/// Path peers must upgrade on
pub const WS_PATH: &str = "/ws";

/// WebSocket signaling server
pub struct SignalingServer {
    /// Server address
    addr: SocketAddr,

    hub: Arc<SignalingHub>,
}

impl SignalingServer {
    /// Create a server for `hub` listening on `addr` (port 0 picks a free port)
    pub fn new(addr: SocketAddr, hub: Arc<SignalingHub>) -> Self {
        Self { addr, hub }
    }

    /// Hub served by this server
    pub fn hub(&self) -> Arc<SignalingHub> {
        Arc::clone(&self.hub)
    }

    /// Bind and start accepting connections
    ///
    /// Returns a handle that can be used to shut down the server.
    pub async fn start(self) -> Result<SignalingServerHandle> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!("Failed to bind signaling server to {}: {}", self.addr, e);
            e
        })?;
        let local_addr = listener.local_addr()?;

        info!(
            "Signaling server listening on ws://{}{}",
            local_addr, WS_PATH
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let hub = self.hub;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                debug!("Accepted TCP connection from {}", peer_addr);
                                let hub = Arc::clone(&hub);
                                tokio::spawn(handle_connection(stream, peer_addr, hub));
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Signaling server received shutdown signal");
                        break;
                    }
                }
            }
            info!("Signaling server accept loop exited");
        });

        Ok(SignalingServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

#[instrument(skip(stream, hub))]
async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, hub: Arc<SignalingHub>) {
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == WS_PATH {
            Ok(response)
        } else {
            debug!(path = %request.uri().path(), "Rejecting upgrade on unknown path");
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    info!("WebSocket connection established");
    let link = spawn_pump(
        ws_stream,
        hub.config().keepalive_interval(),
        peer_addr.to_string(),
    );
    hub.serve(link).await;
    info!("WebSocket connection closed");
}

/// Handle for controlling the signaling server
pub struct SignalingServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SignalingServerHandle {
    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL peers connect to
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.local_addr, WS_PATH)
    }

    /// Stop accepting connections; established ones run until they close
    pub async fn shutdown(self) {
        info!("Sending shutdown signal to signaling server");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Signaling server task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::SignalingHub;

    #[tokio::test]
    async fn test_rejects_unknown_path() {
        let hub = SignalingHub::new(HubConfig::lan_preset());
        let handle = SignalingServer::new("127.0.0.1:0".parse().unwrap(), hub)
            .start()
            .await
            .unwrap();

        let url = format!("ws://{}/elsewhere", handle.local_addr());
        let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
        match err {
            tokio_tungstenite::tungstenite::Error::Http(response) => {
                assert_eq!(response.status(), StatusCode::NOT_FOUND);
            }
            other => panic!("expected HTTP rejection, got {:?}", other),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_accepts_ws_path_and_registers_peer() {
        let hub = SignalingHub::new(HubConfig::lan_preset());
        let handle = SignalingServer::new("127.0.0.1:0".parse().unwrap(), hub.clone())
            .start()
            .await
            .unwrap();

        let (_ws, _) = tokio_tungstenite::connect_async(handle.url()).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while hub.peer_count().await != 1 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown().await;
    }
}
