//! Peer sessions negotiating through an in-process hub
//!
//! Connections come from [`LoopbackConnectionFactory`], so descriptions are
//! labelled strings and the resulting state can be inspected directly.

mod common;

use common::{eventually, init_tracing};
use peerlink_signaling::rtc::{
    LoopbackConnection, LoopbackConnectionFactory, RtcConnection, SignalingState,
};
use peerlink_signaling::{CandidateRouting, HubConfig, Link, PeerSession, Role, SignalingHub};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;

async fn join(
    hub: &Arc<SignalingHub>,
    role: Role,
    label: &str,
) -> (PeerSession, Arc<LoopbackConnection>) {
    let (local, remote) = Link::pair();
    let server = hub.clone();
    tokio::spawn(async move { server.serve(remote).await });

    let factory = Arc::new(LoopbackConnectionFactory::new(label));
    let session = timeout(
        Duration::from_secs(1),
        PeerSession::start(local, role, factory.clone()),
    )
    .await
    .unwrap()
    .unwrap();
    let connection = factory.last().unwrap();
    (session, connection)
}

#[tokio::test]
async fn test_single_offerer_establishes_both_sides() {
    init_tracing();
    let hub = SignalingHub::new(HubConfig::lan_preset());

    let (a, conn_a) = join(&hub, Role::Impolite, "A").await;
    let (b, conn_b) = join(&hub, Role::Polite, "B").await;

    conn_a.trigger_negotiation_needed();

    assert_ok!(timeout(Duration::from_secs(2), a.established()).await.unwrap());
    assert_ok!(timeout(Duration::from_secs(2), b.established()).await.unwrap());

    let offer = conn_a.local_description().unwrap();
    assert_eq!(conn_b.remote_description().unwrap(), offer);
    assert_eq!(
        conn_a.remote_description().unwrap(),
        conn_b.local_description().unwrap()
    );
    assert_eq!(conn_a.signaling_state(), SignalingState::Stable);
    assert_eq!(conn_b.signaling_state(), SignalingState::Stable);

    // Each side learns who it negotiated with
    let (a_ref, b_ref) = (&a, &b);
    let a_id = eventually(|| async move { b_ref.remote_peer() }).await;
    let b_id = eventually(|| async move { a_ref.remote_peer() }).await;
    assert_ne!(a_id, b_id);

    assert_ok!(a.close().await);
    assert_ok!(b.close().await);
}

#[tokio::test]
async fn test_glare_resolves_to_impolite_offer() {
    init_tracing();
    let hub = SignalingHub::new(HubConfig::lan_preset());

    let (a, conn_a) = join(&hub, Role::Impolite, "A").await;
    let (b, conn_b) = join(&hub, Role::Polite, "B").await;

    // Both sides want to negotiate before anything has been exchanged
    conn_a.trigger_negotiation_needed();
    conn_b.trigger_negotiation_needed();

    assert_ok!(timeout(Duration::from_secs(2), a.established()).await.unwrap());
    assert_ok!(timeout(Duration::from_secs(2), b.established()).await.unwrap());

    // The impolite side's offer survives intact; the polite side answered it
    let a_offer = conn_a.local_description().unwrap();
    assert_eq!(a_offer.sdp, "A-offer-1");

    let (conn_a, conn_b, a_offer) = (&conn_a, &conn_b, &a_offer);
    eventually(|| async move {
        (conn_b.remote_description().as_ref() == Some(a_offer)).then_some(())
    })
    .await;
    eventually(|| async move {
        (conn_a.signaling_state() == SignalingState::Stable
            && conn_b.signaling_state() == SignalingState::Stable)
            .then_some(())
    })
    .await;
    assert!(conn_a
        .remote_description()
        .map(|d| d.sdp.starts_with("B-answer"))
        .unwrap_or(false));
}

#[tokio::test]
async fn test_candidates_flow_with_registered_routing() {
    init_tracing();
    let hub = SignalingHub::new(
        HubConfig::lan_preset().with_candidate_routing(CandidateRouting::Registered),
    );

    let (a, conn_a) = join(&hub, Role::Impolite, "A").await;
    let (b, conn_b) = join(&hub, Role::Polite, "B").await;

    conn_a.trigger_negotiation_needed();
    assert_ok!(timeout(Duration::from_secs(2), a.established()).await.unwrap());
    assert_ok!(timeout(Duration::from_secs(2), b.established()).await.unwrap());

    // A gathered one candidate with its offer; it was queued until B answered
    let conn_b = &conn_b;
    eventually(|| async move {
        conn_b
            .applied_candidates()
            .iter()
            .any(|c| c.candidate == "A-candidate-1")
            .then_some(())
    })
    .await;
}

#[tokio::test]
async fn test_hub_loss_fails_pending_establishment() {
    init_tracing();
    let hub = SignalingHub::new(HubConfig::lan_preset());

    let (local, remote) = Link::pair();
    let server = hub.clone();
    let serving = tokio::spawn(async move { server.serve(remote).await });

    let factory = Arc::new(LoopbackConnectionFactory::new("lonely"));
    let session = PeerSession::start(local, Role::Polite, factory)
        .await
        .unwrap();

    // Nobody else is around; take the hub side down
    serving.abort();
    for peer in hub.peers().await {
        hub.disconnect(&peer.id, "gone").await;
    }

    let err = timeout(Duration::from_secs(2), session.established())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_terminated());
}
