//! Peer and orderer transport boundary
//!
//! The gateway never talks to the network directly; it goes through a
//! [`Connector`] that opens [`PeerClient`] and [`OrdererClient`] handles for
//! endpoint URLs. Implementations may be in-memory (see `crate::sim`), gRPC,
//! or anything else that honours the message contracts in [`messages`].

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::identity::Creator;

pub mod messages;
mod retry;

pub use messages::{
    ChaincodeResponse, ChannelMembership, CommitEvent, DiscoveredPeer, Endorsement, Envelope,
    result_digest, transaction_id, KvRead, KvWrite, Proposal, ProposalResponse, ReadWriteSet,
    SignedProposal, ValidationCode,
};
pub use retry::{backoff_delay, RetryPolicy};

/// Why a peer or orderer refused a request it did receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    ChannelNotFound,
    ChaincodeNotFound,
    AccessDenied,
    BadRequest,
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectCode::ChannelNotFound => "channel not found",
            RejectCode::ChaincodeNotFound => "chaincode not found",
            RejectCode::AccessDenied => "access denied",
            RejectCode::BadRequest => "bad request",
        };
        f.write_str(s)
    }
}

/// Error model for transport operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected ({code}): {message}")]
    Rejected { code: RejectCode, message: String },

    #[error("connection closed")]
    Closed,

    #[error("internal transport error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Whether the same request may be sent to another endpoint
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_) | Self::Closed)
    }

    pub fn rejected(code: RejectCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// Connection target for a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerTarget {
    pub name: String,
    pub url: String,
    pub msp_id: String,
}

/// Connection to one peer
#[async_trait]
pub trait PeerClient: Send + Sync {
    fn name(&self) -> &str;

    fn url(&self) -> &str;

    fn msp_id(&self) -> &str;

    /// Simulate (endorse or evaluate) a signed proposal
    async fn process_proposal(
        &self,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError>;

    /// Channel membership, orderers and endorsement requirement as seen by this peer
    async fn discover(
        &self,
        channel: &str,
        requester: &Creator,
    ) -> Result<ChannelMembership, TransportError>;

    /// Commit outcome of `tx_id`. Resolves immediately when the transaction is
    /// already committed, otherwise waits for the block containing it.
    async fn commit_status(&self, channel: &str, tx_id: &str)
        -> Result<CommitEvent, TransportError>;

    /// Release the connection; later calls fail with `Closed`
    async fn close(&self);
}

/// Connection to one ordering service node
#[async_trait]
pub trait OrdererClient: Send + Sync {
    fn url(&self) -> &str;

    /// Hand an endorsed transaction to the ordering service
    async fn broadcast(&self, envelope: &Envelope) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Opens connections to endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_peer(&self, target: &PeerTarget) -> Result<Arc<dyn PeerClient>, TransportError>;

    async fn connect_orderer(&self, url: &str) -> Result<Arc<dyn OrdererClient>, TransportError>;
}

/// `host:port` part of an endpoint URL such as `grpcs://localhost:7051`
pub fn authority(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

/// Replace the host of `url` with `localhost`, keeping scheme and port
pub fn rewrite_as_localhost(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let host_port = rest.split('/').next().unwrap_or(rest);
    let path = &rest[host_port.len()..];
    let rewritten = match host_port.rsplit_once(':') {
        Some((_, port)) => format!("localhost:{}", port),
        None => "localhost".to_string(),
    };
    match scheme {
        Some(scheme) => format!("{}://{}{}", scheme, rewritten, path),
        None => format!("{}{}", rewritten, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority() {
        assert_eq!(authority("grpcs://localhost:7051"), "localhost:7051");
        assert_eq!(authority("peer0.org1.example.com:7051"), "peer0.org1.example.com:7051");
        assert_eq!(authority("https://ca.org1:7054/api/v1"), "ca.org1:7054");
    }

    #[test]
    fn test_rewrite_as_localhost() {
        assert_eq!(
            rewrite_as_localhost("grpcs://peer0.org1.example.com:7051"),
            "grpcs://localhost:7051"
        );
        assert_eq!(
            rewrite_as_localhost("orderer.example.com:7050"),
            "localhost:7050"
        );
        assert_eq!(rewrite_as_localhost("grpc://peer1"), "grpc://localhost");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Unavailable("down".into()).is_retryable());
        assert!(!TransportError::rejected(RejectCode::AccessDenied, "no").is_retryable());
        assert!(!TransportError::Internal("bug".into()).is_retryable());
    }

    #[test]
    fn test_reject_display() {
        let err = TransportError::rejected(RejectCode::ChannelNotFound, "mychannel");
        assert_eq!(err.to_string(), "request rejected (channel not found): mychannel");
    }
}
