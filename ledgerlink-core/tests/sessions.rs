/*
    Session and Fault Integration Tests

    Gateway lifecycle and infrastructure failures:
    - disconnect is idempotent and releases every connection
    - in-flight calls fail with a connection error on disconnect
    - per-call cancellation and deadlines
    - evaluate retries on another peer, submit never retries
    - commit timeouts, lagging peers and unknown channels or contracts
    - channels recover from endpoint outages at first use
*/

mod common;

use common::*;
use ledgerlink_core::contract::{ContractError, TransactionRequest, TxOptions};
use ledgerlink_core::gateway::{DiscoveryOptions, GatewayError, GatewayOptions};
use ledgerlink_core::sim::VotingChaincode;
use ledgerlink_core::transport::RetryPolicy;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

async fn votes_on(contract: &ledgerlink_core::contract::Contract, item: &str) -> u64 {
    let result = contract.evaluate_transaction("QueryItem", &[item]).await.unwrap();
    let item: Value = result.payload.parse_json().unwrap().unwrap();
    item["votesnum"].as_u64().unwrap()
}

#[tokio::test]
async fn test_double_disconnect_is_not_an_error() {
    let network = voting_network();
    let (gateway, contract) = voting_session(&network).await;
    assert!(network.open_connections() > 0);
    assert!(gateway.connection_count().await > 0);

    gateway.disconnect().await;
    gateway.disconnect().await;

    assert!(!gateway.is_connected());
    assert_eq!(network.open_connections(), 0);
    assert!(matches!(
        contract.evaluate_transaction("QueryAllItems", &[]).await,
        Err(ContractError::Connection(_))
    ));
    assert!(matches!(
        gateway.get_network(CHANNEL).await,
        Err(GatewayError::Connection(_))
    ));
}

#[tokio::test]
async fn test_scoped_session_disconnects_on_error() {
    let network = voting_network();
    let identity = enroll_user(&network, memory_wallet(), "appUser").await;
    let gateway = connect(&network, identity, test_options()).await;
    let handle = gateway.clone();

    let result = gateway
        .scoped(|gateway| async move {
            let contract = gateway.get_network(CHANNEL).await?.get_contract(CONTRACT);
            contract.evaluate_transaction("QueryItem", &["99"]).await?;
            Ok::<_, ledgerlink_core::LedgerError>(())
        })
        .await;

    assert!(result.unwrap_err().is_application());
    assert!(!handle.is_connected());
    assert_eq!(network.open_connections(), 0);
}

#[tokio::test]
async fn test_disconnect_during_inflight_call() {
    let network = voting_network();
    let (gateway, contract) = voting_session(&network).await;
    for peer in [PEER0_ORG1, PEER1_ORG1, PEER0_ORG2] {
        network.set_peer_latency(peer, Duration::from_secs(2));
    }

    let call = tokio::spawn(async move { contract.evaluate_transaction("QueryAllItems", &[]).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    gateway.disconnect().await;

    let result = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("call must not hang after disconnect")
        .unwrap();
    assert!(matches!(result, Err(ContractError::Connection(_))));
}

#[tokio::test]
async fn test_cancelled_call() {
    let network = voting_network();
    let (gateway, contract) = voting_session(&network).await;
    network.set_peer_latency(PEER0_ORG1, Duration::from_secs(2));

    let token = CancellationToken::new();
    let options = TxOptions::default().with_cancel(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let request = TransactionRequest::submit("CreateVoter", &[] as &[&str]);
    let result = contract.submit(&request, &options).await;
    assert_eq!(result.unwrap_err(), ContractError::Cancelled);
    canceller.await.unwrap();

    // The session itself stays usable
    assert!(gateway.is_connected());
    network.set_peer_latency(PEER0_ORG1, Duration::ZERO);
    contract.evaluate_transaction("QueryAllItems", &[]).await.unwrap();
    gateway.disconnect().await;
}

#[tokio::test]
async fn test_call_deadline() {
    let network = voting_network();
    let (gateway, contract) = voting_session(&network).await;
    for peer in [PEER0_ORG1, PEER1_ORG1, PEER0_ORG2] {
        network.set_peer_latency(peer, Duration::from_millis(500));
    }

    let request = TransactionRequest::evaluate("QueryAllItems", &[] as &[&str]);
    let options = TxOptions::default().with_timeout(Duration::from_millis(100));
    let started = std::time::Instant::now();
    let result = contract.evaluate(&request, &options).await;

    assert!(matches!(result, Err(ContractError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_millis(450));
    gateway.disconnect().await;
}

#[tokio::test]
async fn test_evaluate_retries_on_next_peer() {
    let network = voting_network();
    let (gateway, contract) = voting_session(&network).await;
    network.set_peer_online(PEER0_ORG1, false);

    let result = contract.evaluate_transaction("QueryAllItems", &[]).await.unwrap();
    assert!(!result.payload.is_empty());
    assert_eq!(network.peer_invocations(PEER0_ORG1), 0);
    assert_eq!(network.peer_invocations(PEER1_ORG1), 1);

    gateway.disconnect().await;
}

#[tokio::test]
async fn test_evaluate_without_retries_reports_unavailable() {
    let network = voting_network();
    let identity = enroll_user(&network, memory_wallet(), "appUser").await;
    let options = GatewayOptions {
        retry: RetryPolicy::none(),
        ..test_options()
    };
    let gateway = connect(&network, identity, options).await;
    let contract = gateway.get_network(CHANNEL).await.unwrap().get_contract(CONTRACT);
    network.set_peer_online(PEER0_ORG1, false);

    let err = contract.evaluate_transaction("QueryAllItems", &[]).await.unwrap_err();
    assert!(matches!(err, ContractError::PeerUnavailable(_)));
    assert_eq!(network.peer_invocations(PEER1_ORG1), 0);

    gateway.disconnect().await;
}

/// Submit-then-evaluate may read from a peer that has not committed yet
#[tokio::test]
async fn test_lagging_peer_serves_stale_reads() {
    let network = voting_network();
    let (gateway, contract) = voting_session(&network).await;
    network.set_commit_lag(PEER1_ORG1, Duration::from_millis(300));

    contract.submit_transaction("CreateVoter", &[]).await.unwrap();
    contract.submit_transaction("Vote", &["1"]).await.unwrap();
    assert_eq!(votes_on(&contract, "1").await, 7);

    // Only the lagging peer is left to answer
    network.set_peer_online(PEER0_ORG1, false);
    assert_eq!(votes_on(&contract, "1").await, 6);

    let mut caught_up = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if votes_on(&contract, "1").await == 7 {
            caught_up = true;
            break;
        }
    }
    assert!(caught_up, "lagging peer never committed the vote");

    gateway.disconnect().await;
}

#[tokio::test]
async fn test_commit_timeout_when_orderer_drops_transactions() {
    let network = voting_network();
    let identity = enroll_user(&network, memory_wallet(), "appUser").await;
    let options = GatewayOptions {
        commit_timeout: Duration::from_millis(200),
        ..test_options()
    };
    let gateway = connect(&network, identity, options).await;
    let contract = gateway.get_network(CHANNEL).await.unwrap().get_contract(CONTRACT);
    network.set_orderer_stalled(true);

    let err = contract.submit_transaction("CreateVoter", &[]).await.unwrap_err();
    match err {
        ContractError::CommitTimeout { tx_id, timeout } => {
            assert_eq!(tx_id.len(), 64);
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("expected commit timeout, got {:?}", other),
    }

    gateway.disconnect().await;
}

#[tokio::test]
async fn test_submit_is_not_retried_when_ordering_fails() {
    let network = voting_network();
    let (gateway, contract) = voting_session(&network).await;
    network.set_orderer_online(false);

    let err = contract.submit_transaction("CreateVoter", &[]).await.unwrap_err();
    assert!(matches!(err, ContractError::OrderingFailure(_)));
    // Endorsed exactly once
    assert_eq!(network.peer_invocations(PEER0_ORG1), 1);

    gateway.disconnect().await;
}

#[tokio::test]
async fn test_unknown_channel_and_contract() {
    let network = voting_network();
    let (gateway, _) = voting_session(&network).await;

    assert_eq!(
        gateway.get_network("nochannel").await.unwrap_err(),
        GatewayError::ChannelNotFound("nochannel".to_string())
    );

    let missing = gateway.get_network(CHANNEL).await.unwrap().get_contract("nocontract");
    assert_eq!(
        missing.evaluate_transaction("QueryAllItems", &[]).await.unwrap_err(),
        ContractError::ContractNotFound {
            contract: "nocontract".to_string(),
            channel: CHANNEL.to_string(),
        }
    );

    gateway.disconnect().await;
}

#[tokio::test]
async fn test_discovery_without_localhost_rewrite_fails() {
    let network = voting_network();
    let identity = enroll_user(&network, memory_wallet(), "appUser").await;
    let options = GatewayOptions {
        discovery: DiscoveryOptions {
            enabled: true,
            as_localhost: false,
        },
        ..test_options()
    };
    let gateway = connect(&network, identity, options).await;

    assert!(matches!(
        gateway.get_network(CHANNEL).await,
        Err(GatewayError::Connection(_))
    ));
    gateway.disconnect().await;
    assert_eq!(network.open_connections(), 0);
}

#[tokio::test]
async fn test_concurrent_sessions_share_the_network() {
    let network = voting_network();
    let wallet = memory_wallet();
    let alice = enroll_user(&network, wallet.clone(), "alice").await;
    let bob = enroll_user(&network, wallet.clone(), "bob").await;

    let alice = connect(&network, alice, test_options()).await;
    let bob = connect(&network, bob, test_options()).await;
    let alice_contract = alice.get_network(CHANNEL).await.unwrap().get_contract(CONTRACT);
    let bob_contract = bob.get_network(CHANNEL).await.unwrap().get_contract(CONTRACT);

    let (a, b) = tokio::join!(
        alice_contract.submit_transaction("CreateVoter", &[]),
        bob_contract.submit_transaction("CreateVoter", &[]),
    );
    assert_eq!(a.unwrap().payload.as_str(), Some("CreateVoter ok"));
    assert_eq!(b.unwrap().payload.as_str(), Some("CreateVoter ok"));

    alice.disconnect().await;
    assert!(bob.is_connected());
    let users: Value = bob_contract
        .evaluate_transaction("QueryAllUsers", &[])
        .await
        .unwrap()
        .payload
        .parse_json()
        .unwrap()
        .unwrap();
    assert_eq!(users.as_array().unwrap().len(), 2);
    bob.disconnect().await;
}

#[tokio::test]
async fn test_channel_recovers_after_orderer_outage() {
    let network = voting_network();
    let identity = enroll_user(&network, memory_wallet(), "appUser").await;
    let gateway = connect(&network, identity, test_options()).await;

    network.set_orderer_online(false);
    let first = gateway.get_network(CHANNEL).await.unwrap().get_contract(CONTRACT);
    assert!(matches!(
        first.submit_transaction("CreateVoter", &[]).await,
        Err(ContractError::OrderingFailure(_))
    ));

    network.set_orderer_online(true);
    let created = first.submit_transaction("CreateVoter", &[]).await.unwrap();
    assert_eq!(created.payload.as_str(), Some("CreateVoter ok"));

    let second = gateway.get_network(CHANNEL).await.unwrap().get_contract(CONTRACT);
    let voted = second.submit_transaction("Vote", &["1"]).await.unwrap();
    assert_eq!(voted.payload.as_str(), Some("Voted successfully"));

    gateway.disconnect().await;
}

#[tokio::test]
async fn test_refresh_picks_up_peers_missed_at_first_use() {
    let network = voting_network();
    let identity = enroll_user(&network, memory_wallet(), "appUser").await;
    let gateway = connect(&network, identity, test_options()).await;

    network.set_peer_online(PEER0_ORG2, false);
    let channel = gateway.get_network(CHANNEL).await.unwrap();
    assert_eq!(channel.peers().len(), 2);

    network.set_peer_online(PEER0_ORG2, true);
    let other = gateway.get_network(CHANNEL).await.unwrap();
    assert_eq!(other.peers().len(), 2);

    // Every handle on the channel sees the refreshed layout
    channel.refresh().await.unwrap();
    assert_eq!(other.peers().len(), 3);
    assert!(other.peers().iter().any(|p| p.name == PEER0_ORG2));

    gateway.disconnect().await;
    assert!(matches!(channel.refresh().await, Err(GatewayError::Connection(_))));
}

#[tokio::test]
async fn test_slow_channel_lookup_does_not_hold_up_other_channels() {
    let network = voting_builder()
        .chaincode("otherchannel", CONTRACT, VotingChaincode::new())
        .build();
    let identity = enroll_user(&network, memory_wallet(), "appUser").await;
    let gateway = connect(&network, identity, test_options()).await;
    network.set_peer_latency(PEER0_ORG1, Duration::from_millis(400));

    let started = Instant::now();
    let (mine, other) = tokio::join!(
        gateway.get_network(CHANNEL),
        gateway.get_network("otherchannel"),
    );
    assert_eq!(mine.unwrap().name(), CHANNEL);
    assert_eq!(other.unwrap().name(), "otherchannel");
    // Serialized lookups would take at least twice the latency
    assert!(started.elapsed() < Duration::from_millis(750));

    gateway.disconnect().await;
}
