//! Simulated multi-organisation network
//!
//! Peers advertise their in-network host names (`peer0.org1.example.com`) to
//! discovery, but only `localhost:<port>` addresses are reachable from the
//! client, the same split a containerised test network has. Sessions must
//! therefore enable `as_localhost` when discovery is on.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::ca::SimCa;
use super::chaincode::Chaincode;
use super::orderer::SimOrderer;
use super::peer::{deliver_blocks, ChannelDeployment, Registry, SimPeer};
use crate::identity::{Creator, SigningKeypair};
use crate::profile::{
    CertificateAuthoritySection, ChannelSection, ClientSection, NetworkProfile, OrdererSection,
    OrganizationSection, PeerSection, ProfileError,
};
use crate::transport::{
    authority, ChannelMembership, CommitEvent, Connector, DiscoveredPeer, Envelope, OrdererClient,
    PeerClient, PeerTarget, ProposalResponse, RejectCode, SignedProposal, TransportError,
};

const FIRST_PEER_PORT: u16 = 7051;
const FIRST_CA_PORT: u16 = 7054;
const ORDERER_PORT: u16 = 7050;
const ORDERER_NAME: &str = "orderer.example.com";

#[derive(Debug, Clone)]
struct OrgSpec {
    name: String,
    msp_id: String,
    peers: usize,
}

struct ChannelSpec {
    chaincodes: BTreeMap<String, Arc<dyn Chaincode>>,
    required_endorsements: usize,
}

/// Builder for [`SimNetwork`]
pub struct SimNetworkBuilder {
    orgs: Vec<OrgSpec>,
    channels: BTreeMap<String, ChannelSpec>,
    batch_size: usize,
    batch_timeout: Duration,
    ca_seed: Option<[u8; 32]>,
}

impl Default for SimNetworkBuilder {
    fn default() -> Self {
        Self {
            orgs: Vec::new(),
            channels: BTreeMap::new(),
            batch_size: 10,
            batch_timeout: Duration::from_millis(20),
            ca_seed: None,
        }
    }
}

impl SimNetworkBuilder {
    /// Add an organisation with `peers` peers and its own CA
    pub fn organization(mut self, name: &str, msp_id: &str, peers: usize) -> Self {
        self.orgs.push(OrgSpec {
            name: name.to_string(),
            msp_id: msp_id.to_string(),
            peers: peers.max(1),
        });
        self
    }

    /// Create a channel joined by every peer
    pub fn channel(mut self, name: &str) -> Self {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| ChannelSpec {
                chaincodes: BTreeMap::new(),
                required_endorsements: 1,
            });
        self
    }

    /// Deploy a chaincode on a channel, creating the channel if needed
    pub fn chaincode(mut self, channel: &str, name: &str, chaincode: impl Chaincode + 'static) -> Self {
        self = self.channel(channel);
        if let Some(spec) = self.channels.get_mut(channel) {
            spec.chaincodes.insert(name.to_string(), Arc::new(chaincode));
        }
        self
    }

    /// Number of distinct peers that must endorse a transaction on `channel`
    pub fn endorsement_requirement(mut self, channel: &str, required: usize) -> Self {
        self = self.channel(channel);
        if let Some(spec) = self.channels.get_mut(channel) {
            spec.required_endorsements = required.max(1);
        }
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Derive CA keys from a seed so certificates stay valid across runs
    pub fn ca_seed(mut self, seed: [u8; 32]) -> Self {
        self.ca_seed = Some(seed);
        self
    }

    /// Start the network.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn build(self) -> SimNetwork {
        let mut cas = BTreeMap::new();
        let mut orgs = Vec::new();
        let mut peer_specs = Vec::new();
        let mut port = FIRST_PEER_PORT;

        for (org_index, org) in self.orgs.iter().enumerate() {
            let domain = org_domain(&org.name);
            let ca_name = format!("ca-{}", org.name.to_lowercase());
            let ca = match self.ca_seed {
                Some(mut seed) => {
                    seed[0] ^= org_index as u8;
                    SimCa::with_seed(&ca_name, &org.msp_id, seed)
                }
                None => SimCa::new(&ca_name, &org.msp_id),
            };
            cas.insert(org.msp_id.clone(), Arc::new(ca));

            let mut peer_names = Vec::new();
            for index in 0..org.peers {
                let name = format!("peer{}.{}", index, domain);
                peer_specs.push((name.clone(), org.msp_id.clone(), port, SigningKeypair::generate()));
                peer_names.push(name);
                port += 1000;
            }
            orgs.push(OrgInfo {
                name: org.name.clone(),
                msp_id: org.msp_id.clone(),
                peers: peer_names,
                ca_name,
                ca_port: FIRST_CA_PORT + 1000 * org_index as u16,
            });
        }

        let registry = Arc::new(Registry {
            trust_roots: cas
                .iter()
                .map(|(msp, ca)| (msp.clone(), ca.public_key()))
                .collect(),
            peer_keys: peer_specs
                .iter()
                .map(|(name, _, _, key)| (name.clone(), key.public_key()))
                .collect(),
            channels: self
                .channels
                .into_iter()
                .map(|(name, spec)| {
                    (
                        name,
                        ChannelDeployment {
                            chaincodes: spec.chaincodes,
                            required_endorsements: spec.required_endorsements,
                        },
                    )
                })
                .collect(),
        });

        let mut peers = Vec::new();
        let mut deliveries = Vec::new();
        for (name, msp_id, port, key) in peer_specs {
            let peer = Arc::new(SimPeer::new(name, msp_id, port, key, registry.clone()));
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(deliver_blocks(peer.clone(), rx));
            deliveries.push(tx);
            peers.push(peer);
        }

        let orderer = SimOrderer::start(
            ORDERER_NAME.to_string(),
            ORDERER_PORT,
            registry.clone(),
            deliveries,
            self.batch_size,
            self.batch_timeout,
        );

        debug!(
            organizations = orgs.len(),
            peers = peers.len(),
            channels = registry.channels.len(),
            "Started simulated network"
        );

        SimNetwork {
            shared: Arc::new(Shared {
                orgs,
                cas,
                peers,
                orderer,
                registry,
                open_connections: AtomicUsize::new(0),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct OrgInfo {
    name: String,
    msp_id: String,
    peers: Vec<String>,
    ca_name: String,
    ca_port: u16,
}

struct Shared {
    orgs: Vec<OrgInfo>,
    cas: BTreeMap<String, Arc<SimCa>>,
    peers: Vec<Arc<SimPeer>>,
    orderer: SimOrderer,
    registry: Arc<Registry>,
    open_connections: AtomicUsize,
}

impl Shared {
    fn peer(&self, name: &str) -> Option<&Arc<SimPeer>> {
        self.peers.iter().find(|p| p.name == name)
    }

    fn trust_roots_contain(&self, msp_id: &str) -> bool {
        self.registry.trust_roots.contains_key(msp_id)
    }

    fn peer_at(&self, address: &str) -> Option<&Arc<SimPeer>> {
        self.peers
            .iter()
            .find(|p| address == format!("localhost:{}", p.port))
    }
}

/// In-process network of peers, an orderer and one CA per organisation
#[derive(Clone)]
pub struct SimNetwork {
    shared: Arc<Shared>,
}

impl SimNetwork {
    pub fn builder() -> SimNetworkBuilder {
        SimNetworkBuilder::default()
    }

    /// Certificate authority of the organisation with `msp_id`
    pub fn ca(&self, msp_id: &str) -> Option<Arc<SimCa>> {
        self.shared.cas.get(msp_id).cloned()
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.shared.peers.iter().map(|p| p.name.clone()).collect()
    }

    pub fn set_peer_online(&self, peer: &str, online: bool) {
        if let Some(peer) = self.shared.peer(peer) {
            peer.set_online(online);
        }
    }

    /// Delay between a block being cut and `peer` committing it
    pub fn set_commit_lag(&self, peer: &str, lag: Duration) {
        if let Some(peer) = self.shared.peer(peer) {
            peer.set_commit_lag(lag);
        }
    }

    /// Delay before `peer` answers a proposal
    pub fn set_peer_latency(&self, peer: &str, latency: Duration) {
        if let Some(peer) = self.shared.peer(peer) {
            peer.set_latency(latency);
        }
    }

    pub fn set_orderer_online(&self, online: bool) {
        self.shared.orderer.set_online(online);
    }

    pub fn set_orderer_stalled(&self, stalled: bool) {
        self.shared.orderer.set_stalled(stalled);
    }

    /// Proposals simulated by `peer` so far
    pub fn peer_invocations(&self, peer: &str) -> usize {
        self.shared.peer(peer).map(|p| p.invocations()).unwrap_or(0)
    }

    pub fn ledger_height(&self, peer: &str, channel: &str) -> Option<u64> {
        self.shared.peer(peer).and_then(|p| p.ledger_height(channel))
    }

    /// Committed value of `key` on `peer`
    pub fn state_value(&self, peer: &str, channel: &str, key: &str) -> Option<Vec<u8>> {
        self.shared
            .peer(peer)
            .and_then(|p| p.state_value(channel, key))
    }

    /// Client connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Connection profile for a client of organisation `org_name`.
    ///
    /// Peer and orderer URLs use `localhost`; the static `channels` section
    /// lists every peer and the orderer.
    pub fn profile(&self, org_name: &str) -> Result<NetworkProfile, ProfileError> {
        if !self.shared.orgs.iter().any(|o| o.name == org_name) {
            return Err(ProfileError::UnknownOrganization(org_name.to_string()));
        }

        let mut organizations = BTreeMap::new();
        let mut peers = BTreeMap::new();
        let mut certificate_authorities = BTreeMap::new();
        for org in &self.shared.orgs {
            let ca_key = format!("ca.{}", org_domain(&org.name));
            organizations.insert(
                org.name.clone(),
                OrganizationSection {
                    mspid: org.msp_id.clone(),
                    peers: org.peers.clone(),
                    certificate_authorities: vec![ca_key.clone()],
                },
            );
            certificate_authorities.insert(
                ca_key,
                CertificateAuthoritySection {
                    url: format!("https://localhost:{}", org.ca_port),
                    ca_name: org.ca_name.clone(),
                    tls_ca_certs: None,
                },
            );
        }
        for peer in &self.shared.peers {
            let mut grpc_options = BTreeMap::new();
            grpc_options.insert(
                "ssl-target-name-override".to_string(),
                serde_json::Value::String(peer.name.clone()),
            );
            peers.insert(
                peer.name.clone(),
                PeerSection {
                    url: format!("grpcs://localhost:{}", peer.port),
                    tls_ca_certs: None,
                    grpc_options,
                },
            );
        }

        let mut orderers = BTreeMap::new();
        orderers.insert(
            self.shared.orderer.name.clone(),
            OrdererSection {
                url: format!("grpcs://localhost:{}", self.shared.orderer.port),
                tls_ca_certs: None,
            },
        );

        let channels = self
            .shared
            .registry
            .channels
            .keys()
            .map(|channel| {
                (
                    channel.clone(),
                    ChannelSection {
                        orderers: vec![self.shared.orderer.name.clone()],
                        peers: self
                            .shared
                            .peers
                            .iter()
                            .map(|p| (p.name.clone(), serde_json::json!({ "endorsingPeer": true })))
                            .collect(),
                    },
                )
            })
            .collect();

        Ok(NetworkProfile {
            name: format!("sim-network-{}", org_name.to_lowercase()),
            version: "1.0.0".to_string(),
            client: ClientSection {
                organization: org_name.to_string(),
            },
            organizations,
            peers,
            orderers,
            certificate_authorities,
            channels,
        })
    }

    fn membership(&self, channel: &str) -> Result<ChannelMembership, TransportError> {
        let deployment = self
            .shared
            .registry
            .channels
            .get(channel)
            .ok_or_else(|| TransportError::rejected(RejectCode::ChannelNotFound, channel))?;
        Ok(ChannelMembership {
            channel: channel.to_string(),
            peers: self
                .shared
                .peers
                .iter()
                .map(|p| DiscoveredPeer {
                    name: p.name.clone(),
                    url: p.internal_url(),
                    msp_id: p.msp_id.clone(),
                    ledger_height: p.ledger_height(channel).unwrap_or(0),
                })
                .collect(),
            orderers: vec![self.shared.orderer.internal_url()],
            required_endorsements: deployment.required_endorsements,
        })
    }
}

fn org_domain(org_name: &str) -> String {
    format!("{}.example.com", org_name.to_lowercase())
}

/// Tracks a live client connection until it is closed
struct ConnectionGuard {
    network: SimNetwork,
    closed: AtomicBool,
}

impl ConnectionGuard {
    fn open(network: &SimNetwork) -> Self {
        network.shared.open_connections.fetch_add(1, Ordering::SeqCst);
        Self {
            network: network.clone(),
            closed: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network
                .shared
                .open_connections
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

struct SimPeerClient {
    peer: Arc<SimPeer>,
    url: String,
    connection: ConnectionGuard,
}

#[async_trait]
impl PeerClient for SimPeerClient {
    fn name(&self) -> &str {
        &self.peer.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn msp_id(&self) -> &str {
        &self.peer.msp_id
    }

    async fn process_proposal(
        &self,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.connection.check()?;
        self.peer.process_proposal(proposal).await
    }

    async fn discover(
        &self,
        channel: &str,
        requester: &Creator,
    ) -> Result<ChannelMembership, TransportError> {
        self.connection.check()?;
        self.peer.check_online()?;
        self.peer.simulate_latency().await;
        let network = &self.connection.network;
        if !network.shared.trust_roots_contain(&requester.msp_id) {
            return Err(TransportError::rejected(
                RejectCode::AccessDenied,
                format!("unknown organization {}", requester.msp_id),
            ));
        }
        network.membership(channel)
    }

    async fn commit_status(&self, channel: &str, tx_id: &str) -> Result<CommitEvent, TransportError> {
        self.connection.check()?;
        self.peer.commit_status(channel, tx_id).await
    }

    async fn close(&self) {
        self.connection.close();
    }
}

struct SimOrdererClient {
    url: String,
    connection: ConnectionGuard,
}

#[async_trait]
impl OrdererClient for SimOrdererClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn broadcast(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.connection.check()?;
        self.connection.network.shared.orderer.broadcast(envelope)
    }

    async fn close(&self) {
        self.connection.close();
    }
}

#[async_trait]
impl Connector for SimNetwork {
    async fn connect_peer(&self, target: &PeerTarget) -> Result<Arc<dyn PeerClient>, TransportError> {
        let address = authority(&target.url);
        let peer = self
            .shared
            .peer_at(address)
            .ok_or_else(|| TransportError::Unavailable(format!("cannot resolve {}", address)))?;
        peer.check_online()?;
        Ok(Arc::new(SimPeerClient {
            peer: peer.clone(),
            url: target.url.clone(),
            connection: ConnectionGuard::open(self),
        }))
    }

    async fn connect_orderer(&self, url: &str) -> Result<Arc<dyn OrdererClient>, TransportError> {
        let address = authority(url);
        if address != format!("localhost:{}", self.shared.orderer.port) {
            return Err(TransportError::Unavailable(format!("cannot resolve {}", address)));
        }
        self.shared.orderer.check_online()?;
        Ok(Arc::new(SimOrdererClient {
            url: url.to_string(),
            connection: ConnectionGuard::open(self),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::VotingChaincode;

    fn network() -> SimNetwork {
        SimNetwork::builder()
            .organization("Org1", "Org1MSP", 2)
            .organization("Org2", "Org2MSP", 1)
            .chaincode("mychannel", "voting", VotingChaincode::new())
            .build()
    }

    #[tokio::test]
    async fn test_ports_and_profile() {
        let network = network();
        assert_eq!(
            network.peer_names(),
            vec![
                "peer0.org1.example.com",
                "peer1.org1.example.com",
                "peer0.org2.example.com"
            ]
        );

        let profile = network.profile("Org2").unwrap();
        assert_eq!(profile.client_msp_id().unwrap(), "Org2MSP");
        assert_eq!(profile.peers["peer0.org2.example.com"].url, "grpcs://localhost:9051");
        assert_eq!(
            profile.certificate_authority("ca.org2.example.com").unwrap().url,
            "https://localhost:8054"
        );
        assert!(profile.validate().is_ok());
        assert!(network.profile("Org3").is_err());
    }

    #[tokio::test]
    async fn test_internal_names_are_unreachable() {
        let network = network();
        let internal = PeerTarget {
            name: "peer0.org1.example.com".into(),
            url: "grpcs://peer0.org1.example.com:7051".into(),
            msp_id: "Org1MSP".into(),
        };
        assert!(matches!(
            network.connect_peer(&internal).await,
            Err(TransportError::Unavailable(_))
        ));

        let local = PeerTarget {
            url: "grpcs://localhost:7051".into(),
            ..internal
        };
        let client = network.connect_peer(&local).await.unwrap();
        assert_eq!(client.name(), "peer0.org1.example.com");
        assert_eq!(network.open_connections(), 1);

        client.close().await;
        client.close().await;
        assert_eq!(network.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_genesis_runs_chaincode_init() {
        let network = network();
        assert_eq!(network.ledger_height("peer0.org2.example.com", "mychannel"), Some(1));
        let item = network
            .state_value("peer0.org1.example.com", "mychannel", "2")
            .unwrap();
        assert_eq!(item, br#"{"name":"Choice3","votesnum":30}"#.to_vec());
    }

    #[tokio::test]
    async fn test_membership_uses_internal_urls() {
        let network = network();
        let membership = network.membership("mychannel").unwrap();
        assert_eq!(membership.peers.len(), 3);
        assert_eq!(membership.peers[0].url, "grpcs://peer0.org1.example.com:7051");
        assert_eq!(membership.orderers, vec!["grpcs://orderer.example.com:7050"]);
        assert!(matches!(
            network.membership("nochannel"),
            Err(TransportError::Rejected {
                code: RejectCode::ChannelNotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_registry_has_one_endorsement_key_per_peer() {
        let network = network();
        let keys = &network.shared.registry.peer_keys;
        let mut names: Vec<String> = keys.keys().cloned().collect();
        names.sort();
        let mut expected = network.peer_names();
        expected.sort();
        assert_eq!(names, expected);

        let distinct: std::collections::HashSet<&Vec<u8>> = keys.values().collect();
        assert_eq!(distinct.len(), keys.len());
        assert!(keys.values().all(|key| key.len() == 32));
    }
}
