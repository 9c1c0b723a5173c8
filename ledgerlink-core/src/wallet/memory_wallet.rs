//! In-memory wallet for testing

use super::{validate_label, PutMode, Wallet, WalletError};
use crate::identity::Identity;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

fn handle_poison<T>(_err: PoisonError<T>) -> WalletError {
    WalletError::Other("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// In-memory wallet (non-persistent, for tests)
#[derive(Clone, Default)]
pub struct MemoryWallet {
    identities: Arc<RwLock<BTreeMap<String, Identity>>>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Wallet for MemoryWallet {
    fn put(&self, label: &str, identity: &Identity, mode: PutMode) -> Result<(), WalletError> {
        validate_label(label)?;
        let mut identities = self.identities.write().map_err(handle_poison)?;
        if mode == PutMode::CreateNew && identities.contains_key(label) {
            return Err(WalletError::AlreadyExists(label.to_string()));
        }
        identities.insert(label.to_string(), identity.clone());
        Ok(())
    }

    fn get(&self, label: &str) -> Result<Identity, WalletError> {
        self.identities
            .read()
            .map_err(handle_poison)?
            .get(label)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(label.to_string()))
    }

    fn exists(&self, label: &str) -> bool {
        self.identities
            .read()
            .map(|ids| ids.contains_key(label))
            .unwrap_or(false)
    }

    fn remove(&self, label: &str) -> Result<(), WalletError> {
        self.identities
            .write()
            .map_err(handle_poison)?
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| WalletError::NotFound(label.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, WalletError> {
        Ok(self
            .identities
            .read()
            .map_err(handle_poison)?
            .keys()
            .cloned()
            .collect())
    }
}
