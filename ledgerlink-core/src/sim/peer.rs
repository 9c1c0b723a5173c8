//! Simulated peer: world state, endorsement and block validation

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use super::chaincode::{Chaincode, ChaincodeStub, VersionedValue, WorldState};
use crate::identity::{unix_now, Certificate, Creator, SigningKeypair};
use crate::transport::{
    result_digest, ChaincodeResponse, CommitEvent, Endorsement, Envelope, ProposalResponse,
    ReadWriteSet, RejectCode, SignedProposal, TransportError, ValidationCode,
};

/// Chaincodes and endorsement requirement of one channel
#[derive(Clone)]
pub(crate) struct ChannelDeployment {
    pub chaincodes: BTreeMap<String, Arc<dyn Chaincode>>,
    pub required_endorsements: usize,
}

/// Network-wide facts every peer and the orderer agree on
pub(crate) struct Registry {
    /// MSP id to CA public key
    pub trust_roots: HashMap<String, Vec<u8>>,
    /// Peer name to endorsement public key
    pub peer_keys: HashMap<String, Vec<u8>>,
    pub channels: BTreeMap<String, ChannelDeployment>,
}

impl Registry {
    /// Check that `creator` holds a valid certificate of a known organisation
    /// and that it signed `message`
    pub fn verify_signed(
        &self,
        creator: &Creator,
        message: &[u8],
        signature_hex: &str,
    ) -> Result<Certificate, TransportError> {
        let denied = |reason: String| TransportError::rejected(RejectCode::AccessDenied, reason);

        let root = self
            .trust_roots
            .get(&creator.msp_id)
            .ok_or_else(|| denied(format!("unknown organization {}", creator.msp_id)))?;
        let cert = Certificate::from_pem(&creator.certificate)
            .map_err(|e| denied(format!("unreadable creator certificate: {}", e)))?;
        cert.verify(root)
            .map_err(|_| denied(format!("creator is not a member of {}", creator.msp_id)))?;
        if cert.body.msp_id != creator.msp_id {
            return Err(denied("creator certificate names another organization".to_string()));
        }
        if !cert.is_valid_at(unix_now()) {
            return Err(denied("creator certificate has expired".to_string()));
        }

        let public_key = cert
            .public_key_bytes()
            .map_err(|e| denied(e.to_string()))?;
        let signature = hex::decode(signature_hex)
            .map_err(|_| denied("malformed signature".to_string()))?;
        if !SigningKeypair::verify(&public_key, message, &signature) {
            return Err(denied("signature does not verify".to_string()));
        }
        Ok(cert)
    }

    /// Whether the envelope carries enough valid endorsements from distinct peers
    fn endorsement_policy_satisfied(&self, envelope: &Envelope) -> bool {
        let required = self
            .channels
            .get(envelope.channel())
            .map(|c| c.required_endorsements)
            .unwrap_or(1)
            .max(1);
        let digest = result_digest(&envelope.response, &envelope.rwset);

        let mut endorsers = HashSet::new();
        for endorsement in &envelope.endorsements {
            let Some(known_key) = self.peer_keys.get(&endorsement.endorser) else {
                continue;
            };
            if hex::encode(known_key) != endorsement.public_key {
                continue;
            }
            let Ok(signature) = hex::decode(&endorsement.signature) else {
                continue;
            };
            if SigningKeypair::verify(known_key, &digest, &signature) {
                endorsers.insert(endorsement.endorser.as_str());
            }
        }
        endorsers.len() >= required
    }
}

/// Ordered batch of transactions for one channel
#[derive(Debug)]
pub(crate) struct Block {
    pub channel: String,
    pub number: u64,
    pub transactions: Vec<Envelope>,
}

#[derive(Default)]
struct ChannelLedger {
    state: WorldState,
    /// Number of committed blocks including genesis
    height: u64,
    /// Sequence of the last transaction that wrote state
    sequence: u64,
    statuses: HashMap<String, CommitEvent>,
}

impl ChannelLedger {
    fn apply_writes(&mut self, rwset: &ReadWriteSet) {
        self.sequence += 1;
        for write in &rwset.writes {
            match &write.value {
                Some(value) => {
                    self.state.insert(
                        write.key.clone(),
                        VersionedValue {
                            value: value.clone(),
                            version: self.sequence,
                        },
                    );
                }
                None => {
                    self.state.remove(&write.key);
                }
            }
        }
    }

    fn reads_are_current(&self, rwset: &ReadWriteSet) -> bool {
        rwset
            .reads
            .iter()
            .all(|read| self.state.get(&read.key).map(|v| v.version) == read.version)
    }
}

pub(crate) struct SimPeer {
    pub name: String,
    pub msp_id: String,
    pub port: u16,
    key: SigningKeypair,
    registry: Arc<Registry>,
    ledgers: Mutex<HashMap<String, ChannelLedger>>,
    events: broadcast::Sender<(String, CommitEvent)>,
    online: AtomicBool,
    commit_lag_ms: AtomicU64,
    latency_ms: AtomicU64,
    invocations: AtomicUsize,
}

impl SimPeer {
    pub fn new(
        name: String,
        msp_id: String,
        port: u16,
        key: SigningKeypair,
        registry: Arc<Registry>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let peer = Self {
            name,
            msp_id,
            port,
            key,
            registry,
            ledgers: Mutex::new(HashMap::new()),
            events,
            online: AtomicBool::new(true),
            commit_lag_ms: AtomicU64::new(0),
            latency_ms: AtomicU64::new(0),
            invocations: AtomicUsize::new(0),
        };
        peer.join_channels();
        peer
    }

    /// Commit the genesis block of every channel, running chaincode init
    fn join_channels(&self) {
        let genesis_creator = Creator {
            msp_id: self.msp_id.clone(),
            certificate: String::new(),
        };
        let mut ledgers = self.lock();
        for (channel, deployment) in &self.registry.channels {
            let mut ledger = ChannelLedger {
                height: 1,
                ..ChannelLedger::default()
            };
            for (name, chaincode) in &deployment.chaincodes {
                let tx_id = format!("init-{}", name);
                let mut stub = ChaincodeStub::new(&ledger.state, &genesis_creator, &tx_id);
                match chaincode.init(&mut stub) {
                    Ok(()) => {
                        let rwset = stub.into_rwset();
                        ledger.apply_writes(&rwset);
                    }
                    Err(e) => debug!(peer = %self.name, chaincode = %name, error = %e, "Chaincode init failed"),
                }
            }
            ledgers.insert(channel.clone(), ledger);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ChannelLedger>> {
        self.ledgers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Endpoint as the peer advertises it inside the network
    pub fn internal_url(&self) -> String {
        format!("grpcs://{}:{}", self.name, self.port)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_commit_lag(&self, lag: Duration) {
        self.commit_lag_ms
            .store(lag.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn commit_lag(&self) -> Duration {
        Duration::from_millis(self.commit_lag_ms.load(Ordering::SeqCst))
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn ledger_height(&self, channel: &str) -> Option<u64> {
        self.lock().get(channel).map(|l| l.height)
    }

    pub fn state_value(&self, channel: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(channel)
            .and_then(|l| l.state.get(key))
            .map(|v| v.value.clone())
    }

    pub fn check_online(&self) -> Result<(), TransportError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!("{} is down", self.name)))
        }
    }

    pub(crate) async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    /// Simulate a proposal against committed state and endorse the result
    pub async fn process_proposal(
        &self,
        signed: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.check_online()?;
        self.simulate_latency().await;
        self.check_online()?;

        let proposal = &signed.proposal;
        let bytes = proposal
            .to_bytes()
            .map_err(|e| TransportError::rejected(RejectCode::BadRequest, e.to_string()))?;
        self.registry
            .verify_signed(&proposal.creator, &bytes, &signed.signature)?;

        let deployment = self.registry.channels.get(&proposal.channel).ok_or_else(|| {
            TransportError::rejected(RejectCode::ChannelNotFound, proposal.channel.clone())
        })?;
        let chaincode = deployment.chaincodes.get(&proposal.chaincode).ok_or_else(|| {
            TransportError::rejected(
                RejectCode::ChaincodeNotFound,
                format!("{} on {}", proposal.chaincode, proposal.channel),
            )
        })?;

        self.invocations.fetch_add(1, Ordering::SeqCst);
        let (result, rwset) = {
            let ledgers = self.lock();
            let ledger = ledgers.get(&proposal.channel).ok_or_else(|| {
                TransportError::rejected(RejectCode::ChannelNotFound, proposal.channel.clone())
            })?;
            let mut stub = ChaincodeStub::new(&ledger.state, &proposal.creator, &proposal.tx_id);
            let result = chaincode.invoke(&mut stub, &proposal.function, &proposal.args);
            (result, stub.into_rwset())
        };
        trace!(peer = %self.name, tx_id = %proposal.tx_id, function = %proposal.function, "Simulated proposal");

        Ok(match result {
            Ok(payload) => {
                let response = ChaincodeResponse::success(payload);
                let digest = result_digest(&response, &rwset);
                let endorsement = Endorsement {
                    endorser: self.name.clone(),
                    msp_id: self.msp_id.clone(),
                    public_key: hex::encode(self.key.public_key()),
                    signature: hex::encode(self.key.sign(&digest)),
                };
                ProposalResponse {
                    peer: self.name.clone(),
                    msp_id: self.msp_id.clone(),
                    response,
                    rwset,
                    endorsement: Some(endorsement),
                }
            }
            Err(message) => ProposalResponse {
                peer: self.name.clone(),
                msp_id: self.msp_id.clone(),
                response: ChaincodeResponse::error(message),
                rwset: Default::default(),
                endorsement: None,
            },
        })
    }

    /// Validate and commit a block in order
    pub fn commit_block(&self, block: &Block) {
        let mut events = Vec::with_capacity(block.transactions.len());
        {
            let mut ledgers = self.lock();
            let Some(ledger) = ledgers.get_mut(&block.channel) else {
                return;
            };
            if block.number < ledger.height {
                return;
            }
            for envelope in &block.transactions {
                let tx_id = envelope.tx_id().to_string();
                let code = if ledger.statuses.contains_key(&tx_id) {
                    ValidationCode::DuplicateTxid
                } else if !self.registry.endorsement_policy_satisfied(envelope) {
                    ValidationCode::EndorsementPolicyFailure
                } else if !ledger.reads_are_current(&envelope.rwset) {
                    ValidationCode::MvccReadConflict
                } else {
                    ValidationCode::Valid
                };

                if code.is_valid() {
                    ledger.apply_writes(&envelope.rwset);
                }
                let event = CommitEvent {
                    tx_id: tx_id.clone(),
                    block_number: block.number,
                    code,
                };
                if code != ValidationCode::DuplicateTxid {
                    ledger.statuses.insert(tx_id, event.clone());
                }
                events.push(event);
            }
            ledger.height = block.number + 1;
        }

        debug!(
            peer = %self.name,
            channel = %block.channel,
            block = block.number,
            transactions = events.len(),
            "Committed block"
        );
        for event in events {
            let _ = self.events.send((block.channel.clone(), event));
        }
    }

    /// Commit outcome of `tx_id`, waiting for it if not yet committed
    pub async fn commit_status(&self, channel: &str, tx_id: &str) -> Result<CommitEvent, TransportError> {
        self.check_online()?;
        let mut receiver = self.events.subscribe();
        loop {
            {
                let ledgers = self.lock();
                let ledger = ledgers.get(channel).ok_or_else(|| {
                    TransportError::rejected(RejectCode::ChannelNotFound, channel.to_string())
                })?;
                if let Some(event) = ledger.statuses.get(tx_id) {
                    return Ok(event.clone());
                }
            }
            loop {
                match receiver.recv().await {
                    Ok((event_channel, event))
                        if event_channel == channel
                            && event.tx_id == tx_id
                            && event.code != ValidationCode::DuplicateTxid =>
                    {
                        return Ok(event)
                    }
                    Ok(_) => continue,
                    // missed events; fall back to the recorded statuses
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(TransportError::Closed)
                    }
                }
            }
        }
    }
}

/// Deliver ordered blocks to `peer`, each after the peer's commit lag
pub(crate) async fn deliver_blocks(peer: Arc<SimPeer>, mut blocks: mpsc::UnboundedReceiver<Arc<Block>>) {
    while let Some(block) = blocks.recv().await {
        let lag = peer.commit_lag();
        if !lag.is_zero() {
            tokio::time::sleep(lag).await;
        }
        peer.commit_block(&block);
    }
}
