//! End-to-end tests over real WebSocket connections

mod common;

use common::{init_tracing, wait_for_peer_count};
use futures::{SinkExt, StreamExt};
use peerlink_signaling::hub::SignalingServerHandle;
use peerlink_signaling::rtc::{LoopbackConnectionFactory, RtcConnection, SignalingState};
use peerlink_signaling::{HubConfig, PeerSession, PeerState, Role, SessionConfig, SignalingHub, SignalingServer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

async fn start_server(config: HubConfig) -> (Arc<SignalingHub>, SignalingServerHandle) {
    let hub = SignalingHub::new(config);
    let handle = SignalingServer::new("127.0.0.1:0".parse().unwrap(), hub.clone())
        .start()
        .await
        .unwrap();
    (hub, handle)
}

#[tokio::test]
async fn test_sessions_negotiate_over_websocket() {
    init_tracing();
    let (hub, server) = start_server(HubConfig::lan_preset()).await;

    let factory_a = Arc::new(LoopbackConnectionFactory::new("A"));
    let factory_b = Arc::new(LoopbackConnectionFactory::new("B"));

    let a = PeerSession::connect(
        &SessionConfig::new(server.url()).with_role(Role::Impolite),
        factory_a.clone(),
    )
    .await
    .unwrap();
    let b = PeerSession::connect(
        &SessionConfig::new(server.url()).with_role(Role::Polite),
        factory_b.clone(),
    )
    .await
    .unwrap();
    wait_for_peer_count(&hub, 2).await;

    let conn_a = factory_a.last().unwrap();
    let conn_b = factory_b.last().unwrap();
    conn_a.trigger_negotiation_needed();

    timeout(Duration::from_secs(5), a.established())
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(5), b.established())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(conn_b.remote_description(), conn_a.local_description());
    assert_eq!(conn_a.signaling_state(), SignalingState::Stable);

    a.close().await.unwrap();
    wait_for_peer_count(&hub, 1).await;
    b.close().await.unwrap();
    wait_for_peer_count(&hub, 0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_raw_client_sees_json_rpc_wire_format() {
    let (hub, server) =
        start_server(HubConfig::default().with_stun_servers(["stun:stun.example.org:3478"])).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
    wait_for_peer_count(&hub, 1).await;
    let peer_id = hub.peers().await[0].id.clone();
    assert_eq!(hub.peer_state(&peer_id).await, Some(PeerState::Initial));

    let call = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "getRecommendedRPCConfiguration",
        "params": null
    });
    ws.send(Message::Text(call.to_string())).await.unwrap();

    let reply = timeout(Duration::from_secs(1), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    })
    .await
    .unwrap();

    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], 7);
    assert_eq!(
        reply["result"]["iceServers"][0]["urls"][0],
        "stun:stun.example.org:3478"
    );
    assert_eq!(hub.peer_state(&peer_id).await, Some(PeerState::Ready));

    ws.close(None).await.unwrap();
    wait_for_peer_count(&hub, 0).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_to_missing_server_fails() {
    let config = SessionConfig::new("ws://127.0.0.1:1/ws")
        .with_connect_timeout(Duration::from_millis(500));
    let factory = Arc::new(LoopbackConnectionFactory::new("nobody"));

    let err = PeerSession::connect(&config, factory).await.unwrap_err();
    assert!(err.is_transport_error());
}
