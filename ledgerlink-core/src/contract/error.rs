//! Transaction errors

use std::time::Duration;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::transport::{RejectCode, TransportError, ValidationCode};

/// Errors from submitting or evaluating a transaction.
///
/// `Application` carries the contract's own error message verbatim; every
/// other variant comes from the client, the transport or consensus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Contract {contract} not found on channel {channel}")]
    ContractNotFound { contract: String, channel: String },

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("{message}")]
    Application { message: String },

    #[error("Endorsement failure: {0}")]
    EndorsementFailure(String),

    #[error("Transaction {tx_id} was not committed within {timeout:?}")]
    CommitTimeout { tx_id: String, timeout: Duration },

    #[error("Transaction {tx_id} failed to commit with status {code}")]
    CommitFailure { tx_id: String, code: ValidationCode },

    #[error("Ordering failure: {0}")]
    OrderingFailure(String),

    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl ContractError {
    /// Error raised by the contract itself rather than the infrastructure
    pub fn is_application(&self) -> bool {
        matches!(self, ContractError::Application { .. })
    }

    /// Map a peer's refusal or failure for a call on `contract`/`channel`
    pub(crate) fn from_peer(err: TransportError, channel: &str, contract: &str) -> Self {
        match err {
            TransportError::Rejected { code, message } => match code {
                RejectCode::ChaincodeNotFound => ContractError::ContractNotFound {
                    contract: contract.to_string(),
                    channel: channel.to_string(),
                },
                RejectCode::ChannelNotFound => ContractError::ChannelNotFound(channel.to_string()),
                RejectCode::AccessDenied => ContractError::AccessDenied(message),
                RejectCode::BadRequest => ContractError::InvalidRequest(message),
            },
            TransportError::Closed => ContractError::Connection("connection closed".to_string()),
            other => ContractError::PeerUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_message_is_verbatim() {
        let err = ContractError::Application {
            message: "7 does not exist".to_string(),
        };
        assert_eq!(err.to_string(), "7 does not exist");
        assert!(err.is_application());
    }

    #[test]
    fn test_peer_error_mapping() {
        let missing = ContractError::from_peer(
            TransportError::rejected(RejectCode::ChaincodeNotFound, "x"),
            "mychannel",
            "voting",
        );
        assert_eq!(
            missing,
            ContractError::ContractNotFound {
                contract: "voting".to_string(),
                channel: "mychannel".to_string()
            }
        );
        assert!(matches!(
            ContractError::from_peer(TransportError::Timeout, "mychannel", "voting"),
            ContractError::PeerUnavailable(_)
        ));
        assert!(matches!(
            ContractError::from_peer(TransportError::Closed, "mychannel", "voting"),
            ContractError::Connection(_)
        ));
    }

    #[test]
    fn test_commit_failure_display() {
        let err = ContractError::CommitFailure {
            tx_id: "abc".to_string(),
            code: ValidationCode::MvccReadConflict,
        };
        assert_eq!(
            err.to_string(),
            "Transaction abc failed to commit with status MVCC_READ_CONFLICT"
        );
    }
}
