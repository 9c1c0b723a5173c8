//! Messages exchanged with peers and orderers

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::identity::{unix_now, Creator, IdentityError, SigningKeypair};

const NONCE_LEN: usize = 24;

/// Chaincode invocation as built by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub tx_id: String,
    pub channel: String,
    pub chaincode: String,
    pub function: String,
    pub args: Vec<String>,
    /// Hex-encoded random nonce
    pub nonce: String,
    pub creator: Creator,
    /// Unix seconds
    pub timestamp: u64,
}

impl Proposal {
    pub fn new(
        channel: &str,
        chaincode: &str,
        function: &str,
        args: Vec<String>,
        creator: Creator,
    ) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            tx_id: transaction_id(&nonce, &creator),
            channel: channel.to_string(),
            chaincode: chaincode.to_string(),
            function: function.to_string(),
            args,
            nonce: hex::encode(nonce),
            creator,
            timestamp: unix_now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        serde_json::to_vec(self).map_err(|e| IdentityError::Serialization(e.to_string()))
    }

    pub fn sign(self, signer: &SigningKeypair) -> Result<SignedProposal, IdentityError> {
        let signature = hex::encode(signer.sign(&self.to_bytes()?));
        Ok(SignedProposal {
            proposal: self,
            signature,
        })
    }
}

/// Transaction id: hex(SHA-256(nonce || creator))
pub fn transaction_id(nonce: &[u8], creator: &Creator) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator.to_bytes());
    hex::encode(hasher.finalize())
}

/// Proposal plus the creator's signature over its JSON encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signature: String,
}

impl SignedProposal {
    pub fn tx_id(&self) -> &str {
        &self.proposal.tx_id
    }
}

/// Chaincode reply: status 200 carries a payload, anything >= 400 an error message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeResponse {
    pub status: u16,
    pub message: String,
    pub payload: Vec<u8>,
}

impl ChaincodeResponse {
    pub const OK: u16 = 200;
    pub const ERROR: u16 = 500;

    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            status: Self::OK,
            message: String::new(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Self::ERROR,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRead {
    pub key: String,
    /// Committed version observed during simulation; `None` if the key was absent
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvWrite {
    pub key: String,
    /// `None` deletes the key
    pub value: Option<Vec<u8>>,
}

/// Keys read and written while simulating a proposal, sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadWriteSet {
    pub reads: Vec<KvRead>,
    pub writes: Vec<KvWrite>,
}

impl ReadWriteSet {
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Peer signature over a simulation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub endorser: String,
    pub msp_id: String,
    /// Hex-encoded endorser public key
    pub public_key: String,
    pub signature: String,
}

/// One peer's answer to a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub peer: String,
    pub msp_id: String,
    pub response: ChaincodeResponse,
    pub rwset: ReadWriteSet,
    /// Present only when the chaincode succeeded
    pub endorsement: Option<Endorsement>,
}

impl ProposalResponse {
    /// Digest identifying the simulation result, equal across endorsers that agree
    pub fn result_digest(&self) -> [u8; 32] {
        result_digest(&self.response, &self.rwset)
    }
}

/// SHA-256 over the chaincode response and read/write set
pub fn result_digest(response: &ChaincodeResponse, rwset: &ReadWriteSet) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(response.status.to_be_bytes());
    hasher.update((response.payload.len() as u64).to_be_bytes());
    hasher.update(&response.payload);
    // ReadWriteSet contains only strings, integers and byte vectors
    if let Ok(bytes) = serde_json::to_vec(rwset) {
        hasher.update(bytes);
    }
    hasher.finalize().into()
}

/// Endorsed transaction handed to the ordering service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub proposal: SignedProposal,
    pub response: ChaincodeResponse,
    pub rwset: ReadWriteSet,
    pub endorsements: Vec<Endorsement>,
    /// Creator signature over the endorsed result
    pub signature: String,
}

impl Envelope {
    pub fn new(
        proposal: SignedProposal,
        response: ChaincodeResponse,
        rwset: ReadWriteSet,
        endorsements: Vec<Endorsement>,
        signer: &SigningKeypair,
    ) -> Self {
        let digest = result_digest(&response, &rwset);
        let mut signed = proposal.proposal.tx_id.as_bytes().to_vec();
        signed.extend_from_slice(&digest);
        Self {
            signature: hex::encode(signer.sign(&signed)),
            proposal,
            response,
            rwset,
            endorsements,
        }
    }

    pub fn tx_id(&self) -> &str {
        self.proposal.tx_id()
    }

    pub fn channel(&self) -> &str {
        &self.proposal.proposal.channel
    }

    /// Bytes covered by the creator signature
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut bytes = self.tx_id().as_bytes().to_vec();
        bytes.extend_from_slice(&result_digest(&self.response, &self.rwset));
        bytes
    }
}

/// Validation outcome assigned to a transaction at commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Valid,
    MvccReadConflict,
    EndorsementPolicyFailure,
    DuplicateTxid,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::Valid => "VALID",
            ValidationCode::MvccReadConflict => "MVCC_READ_CONFLICT",
            ValidationCode::EndorsementPolicyFailure => "ENDORSEMENT_POLICY_FAILURE",
            ValidationCode::DuplicateTxid => "DUPLICATE_TXID",
        }
    }

    pub fn is_valid(&self) -> bool {
        *self == ValidationCode::Valid
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commit notification for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEvent {
    pub tx_id: String,
    pub block_number: u64,
    pub code: ValidationCode,
}

/// Peer as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    pub name: String,
    pub url: String,
    pub msp_id: String,
    pub ledger_height: u64,
}

/// Channel layout as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMembership {
    pub channel: String,
    pub peers: Vec<DiscoveredPeer>,
    /// Orderer endpoint URLs
    pub orderers: Vec<String>,
    /// Distinct matching endorsements needed for a valid transaction
    pub required_endorsements: usize,
}
