//! Wallet module
//!
//! Credential store API: one [`Identity`] per logical name. Implementations
//! must make `put` without overwrite exclusive, so that two writers racing on
//! the same name see exactly one success and one `AlreadyExists`.

use crate::identity::Identity;
use thiserror::Error;

pub mod file_wallet;
pub mod memory_wallet;

pub use file_wallet::FileWallet;
pub use memory_wallet::MemoryWallet;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Identity not found: {0}")]
    NotFound(String),

    #[error("Identity already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid identity label: {0}")]
    InvalidLabel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Other error: {0}")]
    Other(String),
}

/// Behaviour of [`Wallet::put`] when the label is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Fail with `AlreadyExists`
    #[default]
    CreateNew,
    /// Replace the stored identity (explicit re-enrollment)
    Overwrite,
}

/// Abstract credential store
pub trait Wallet: Send + Sync {
    /// Store `identity` under `label`
    fn put(&self, label: &str, identity: &Identity, mode: PutMode) -> Result<(), WalletError>;

    /// Load the identity stored under `label`
    fn get(&self, label: &str) -> Result<Identity, WalletError>;

    /// Whether an identity is stored under `label`; never fails
    fn exists(&self, label: &str) -> bool;

    /// Delete the identity stored under `label`
    fn remove(&self, label: &str) -> Result<(), WalletError>;

    /// All stored labels, sorted
    fn list(&self) -> Result<Vec<String>, WalletError>;
}

/// Labels double as file names, so keep them to a portable character set
pub(crate) fn validate_label(label: &str) -> Result<(), WalletError> {
    let valid = !label.is_empty()
        && label.len() <= 128
        && !label.starts_with('.')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(WalletError::InvalidLabel(label.to_string()))
    }
}
