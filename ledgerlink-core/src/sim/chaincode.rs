//! Chaincode execution for simulated peers

use std::collections::BTreeMap;

use crate::identity::{Certificate, Creator};
use crate::transport::{KvRead, KvWrite, ReadWriteSet};

/// Committed value of a key together with its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    /// Ledger sequence of the transaction that last wrote the key
    pub version: u64,
}

/// Key-value world state of one channel on one peer
pub type WorldState = BTreeMap<String, VersionedValue>;

/// Smart contract executed by simulated peers.
///
/// An `Err` is an application error: the message reaches the client verbatim
/// and nothing is endorsed.
pub trait Chaincode: Send + Sync {
    /// Runs once when the chaincode is deployed on a channel
    fn init(&self, _stub: &mut ChaincodeStub<'_>) -> Result<(), String> {
        Ok(())
    }

    fn invoke(
        &self,
        stub: &mut ChaincodeStub<'_>,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, String>;
}

/// State access during one simulation.
///
/// Reads always see committed state (never this transaction's own writes) and
/// are recorded together with the observed version.
pub struct ChaincodeStub<'a> {
    state: &'a WorldState,
    creator: &'a Creator,
    tx_id: &'a str,
    reads: BTreeMap<String, Option<u64>>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl<'a> ChaincodeStub<'a> {
    pub fn new(state: &'a WorldState, creator: &'a Creator, tx_id: &'a str) -> Self {
        Self {
            state,
            creator,
            tx_id,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn tx_id(&self) -> &str {
        self.tx_id
    }

    pub fn get_state(&mut self, key: &str) -> Option<Vec<u8>> {
        let entry = self.state.get(key);
        self.reads
            .insert(key.to_string(), entry.map(|v| v.version));
        entry.map(|v| v.value.clone())
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) {
        self.writes.insert(key.to_string(), Some(value));
    }

    pub fn del_state(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    /// Keys in `[start, end)`; an empty bound is open
    pub fn get_state_by_range(&mut self, start: &str, end: &str) -> Vec<(String, Vec<u8>)> {
        let results: Vec<(String, Vec<u8>, u64)> = self
            .state
            .iter()
            .filter(|(key, _)| start.is_empty() || key.as_str() >= start)
            .filter(|(key, _)| end.is_empty() || key.as_str() < end)
            .map(|(key, v)| (key.clone(), v.value.clone(), v.version))
            .collect();

        results
            .into_iter()
            .map(|(key, value, version)| {
                self.reads.insert(key.clone(), Some(version));
                (key, value)
            })
            .collect()
    }

    pub fn creator(&self) -> &Creator {
        self.creator
    }

    /// Unique id of the invoking client derived from its certificate
    pub fn client_id(&self) -> Result<String, String> {
        Certificate::from_pem(&self.creator.certificate)
            .map(|cert| cert.client_id())
            .map_err(|e| format!("failed to read client identity: {}", e))
    }

    pub fn into_rwset(self) -> ReadWriteSet {
        ReadWriteSet {
            reads: self
                .reads
                .into_iter()
                .map(|(key, version)| KvRead { key, version })
                .collect(),
            writes: self
                .writes
                .into_iter()
                .map(|(key, value)| KvWrite { key, value })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_identity;

    fn state() -> WorldState {
        let mut state = WorldState::new();
        state.insert(
            "a".to_string(),
            VersionedValue {
                value: b"1".to_vec(),
                version: 3,
            },
        );
        state.insert(
            "b".to_string(),
            VersionedValue {
                value: b"2".to_vec(),
                version: 4,
            },
        );
        state
    }

    #[test]
    fn test_reads_record_versions_and_ignore_own_writes() {
        let state = state();
        let creator = sample_identity("appUser").creator();
        let mut stub = ChaincodeStub::new(&state, &creator, "tx1");

        stub.put_state("a", b"9".to_vec());
        assert_eq!(stub.get_state("a"), Some(b"1".to_vec()));
        assert_eq!(stub.get_state("missing"), None);

        let rwset = stub.into_rwset();
        assert_eq!(
            rwset.reads,
            vec![
                KvRead {
                    key: "a".into(),
                    version: Some(3)
                },
                KvRead {
                    key: "missing".into(),
                    version: None
                },
            ]
        );
        assert_eq!(rwset.writes.len(), 1);
    }

    #[test]
    fn test_range_query() {
        let state = state();
        let creator = sample_identity("appUser").creator();
        let mut stub = ChaincodeStub::new(&state, &creator, "tx1");

        assert_eq!(stub.get_state_by_range("", "").len(), 2);
        assert_eq!(stub.get_state_by_range("b", "").len(), 1);
        assert_eq!(stub.get_state_by_range("", "b").len(), 1);
        assert!(stub.into_rwset().is_read_only());
    }

    #[test]
    fn test_client_id() {
        let state = WorldState::new();
        let creator = sample_identity("appUser").creator();
        let stub = ChaincodeStub::new(&state, &creator, "tx1");

        let id = stub.client_id().unwrap();
        assert!(id.starts_with("x509::CN=appUser"));
    }
}
