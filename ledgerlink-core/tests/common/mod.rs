//! Shared fixtures for integration tests

#![allow(dead_code)]

use ledgerlink_core::ca::{EnrollmentClient, EnrollmentSettings};
use ledgerlink_core::gateway::{Gateway, GatewayOptions};
use ledgerlink_core::identity::Identity;
use ledgerlink_core::sim::{SimNetwork, SimNetworkBuilder, VotingChaincode};
use ledgerlink_core::transport::RetryPolicy;
use ledgerlink_core::wallet::{MemoryWallet, Wallet};
use std::sync::Arc;
use std::time::Duration;

pub const CHANNEL: &str = "mychannel";
pub const CONTRACT: &str = "voting";
pub const MSP: &str = "Org1MSP";
pub const PEER0_ORG1: &str = "peer0.org1.example.com";
pub const PEER1_ORG1: &str = "peer1.org1.example.com";
pub const PEER0_ORG2: &str = "peer0.org2.example.com";

/// Org1 with two peers, Org2 with one, voting contract on `mychannel`
pub fn voting_builder() -> SimNetworkBuilder {
    SimNetwork::builder()
        .organization("Org1", "Org1MSP", 2)
        .organization("Org2", "Org2MSP", 1)
        .chaincode(CHANNEL, CONTRACT, VotingChaincode::new())
}

pub fn voting_network() -> SimNetwork {
    voting_builder().build()
}

pub fn memory_wallet() -> Arc<dyn Wallet> {
    Arc::new(MemoryWallet::new())
}

/// Enroll the Org1 admin, then register and enroll `user_id`
pub async fn enroll_user(network: &SimNetwork, wallet: Arc<dyn Wallet>, user_id: &str) -> Identity {
    let ca = network.ca(MSP).expect("org1 certificate authority");
    let client = EnrollmentClient::new(wallet, EnrollmentSettings::default());
    client
        .enroll_admin(ca.as_ref(), MSP)
        .await
        .expect("enroll admin");
    client
        .register_and_enroll_user(ca.as_ref(), MSP, user_id, "org1.department1")
        .await
        .expect("register user")
}

/// Short timeouts and fast retries
pub fn test_options() -> GatewayOptions {
    GatewayOptions {
        connect_timeout: Duration::from_secs(2),
        endorse_timeout: Duration::from_secs(5),
        submit_timeout: Duration::from_secs(2),
        evaluate_timeout: Duration::from_secs(2),
        commit_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            jitter_ms: 5,
        },
        ..GatewayOptions::default()
    }
}

pub async fn connect(network: &SimNetwork, identity: Identity, options: GatewayOptions) -> Gateway {
    Gateway::connect(
        network.profile("Org1").expect("org1 profile"),
        identity,
        Arc::new(network.clone()),
        options,
    )
    .await
    .expect("connect gateway")
}

/// Network, connected session for `appUser`, and the voting contract
pub async fn voting_session(network: &SimNetwork) -> (Gateway, ledgerlink_core::contract::Contract) {
    let identity = enroll_user(network, memory_wallet(), "appUser").await;
    let gateway = connect(network, identity, test_options()).await;
    let contract = gateway
        .get_network(CHANNEL)
        .await
        .expect("channel")
        .get_contract(CONTRACT);
    (gateway, contract)
}
