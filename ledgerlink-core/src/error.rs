//! Crate-wide error type

use thiserror::Error;

use crate::ca::{CaError, EnrollmentError};
use crate::config::ConfigError;
use crate::contract::ContractError;
use crate::gateway::GatewayError;
use crate::identity::IdentityError;
use crate::logging::LoggingError;
use crate::profile::ProfileError;
use crate::transport::TransportError;
use crate::wallet::WalletError;

/// Result type for client flows
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Coarse classification used for reporting and branching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Wallet,
    Identity,
    CertificateAuthority,
    Configuration,
    Connection,
    NotFound,
    AccessDenied,
    /// Raised by the contract itself
    Application,
    Endorsement,
    Ordering,
    Commit,
    Timeout,
    Cancelled,
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Wallet => "wallet",
            ErrorKind::Identity => "identity",
            ErrorKind::CertificateAuthority => "certificate authority",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connection => "connection",
            ErrorKind::NotFound => "not found",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::Application => "application",
            ErrorKind::Endorsement => "endorsement",
            ErrorKind::Ordering => "ordering",
            ErrorKind::Commit => "commit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidRequest => "invalid request",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure of a wallet, enrollment, session or transaction operation
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Ca(#[from] CaError),

    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Wallet(WalletError::NotFound(_)) => ErrorKind::NotFound,
            LedgerError::Wallet(_) => ErrorKind::Wallet,
            LedgerError::Identity(_) => ErrorKind::Identity,
            LedgerError::Ca(_) => ErrorKind::CertificateAuthority,
            LedgerError::Enrollment(e) => match e {
                EnrollmentError::Wallet(WalletError::NotFound(_)) => ErrorKind::NotFound,
                EnrollmentError::Wallet(_) => ErrorKind::Wallet,
                EnrollmentError::Identity(_) => ErrorKind::Identity,
                EnrollmentError::Ca(_) | EnrollmentError::AdminNotEnrolled(_) => {
                    ErrorKind::CertificateAuthority
                }
            },
            LedgerError::Config(_) | LedgerError::Profile(_) | LedgerError::Logging(_) => {
                ErrorKind::Configuration
            }
            LedgerError::Transport(e) => match e {
                TransportError::Timeout => ErrorKind::Timeout,
                TransportError::Rejected { .. } => ErrorKind::InvalidRequest,
                _ => ErrorKind::Connection,
            },
            LedgerError::Gateway(e) => match e {
                GatewayError::Connection(_) => ErrorKind::Connection,
                GatewayError::ChannelNotFound(_) => ErrorKind::NotFound,
                GatewayError::AccessDenied(_) => ErrorKind::AccessDenied,
                GatewayError::Identity(_) => ErrorKind::Identity,
                GatewayError::Profile(_) => ErrorKind::Configuration,
            },
            LedgerError::Contract(e) => match e {
                ContractError::ContractNotFound { .. } | ContractError::ChannelNotFound(_) => {
                    ErrorKind::NotFound
                }
                ContractError::Application { .. } => ErrorKind::Application,
                ContractError::EndorsementFailure(_) => ErrorKind::Endorsement,
                ContractError::OrderingFailure(_) => ErrorKind::Ordering,
                ContractError::CommitFailure { .. } => ErrorKind::Commit,
                ContractError::CommitTimeout { .. } | ContractError::Timeout(_) => {
                    ErrorKind::Timeout
                }
                ContractError::PeerUnavailable(_) | ContractError::Connection(_) => {
                    ErrorKind::Connection
                }
                ContractError::AccessDenied(_) => ErrorKind::AccessDenied,
                ContractError::InvalidRequest(_) | ContractError::Decode(_) => {
                    ErrorKind::InvalidRequest
                }
                ContractError::Cancelled => ErrorKind::Cancelled,
                ContractError::Identity(_) => ErrorKind::Identity,
            },
        }
    }

    /// Error raised by the contract rather than the infrastructure
    pub fn is_application(&self) -> bool {
        self.kind() == ErrorKind::Application
    }

    /// Transient failure where the same call may succeed later.
    ///
    /// A commit timeout is not retryable: the transaction may still commit.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport(e) => e.is_retryable(),
            LedgerError::Ca(CaError::Unavailable(_))
            | LedgerError::Enrollment(EnrollmentError::Ca(CaError::Unavailable(_))) => true,
            LedgerError::Contract(ContractError::PeerUnavailable(_))
            | LedgerError::Contract(ContractError::EndorsementFailure(_)) => true,
            LedgerError::Contract(ContractError::CommitFailure { code, .. }) => {
                *code == crate::transport::ValidationCode::MvccReadConflict
            }
            _ => false,
        }
    }
}
