//! File-based wallet with optional encryption at rest
//!
//! One file per identity, `<label>.id`, holding the JSON identity record.
//!
//! Encrypted File Format:
//! ```text
//! [Magic: 8 bytes "LLWL0001"]
//! [Version: 1 byte]
//! [Salt: 16 bytes]
//! [Nonce: 12 bytes]
//! [Ciphertext + AEAD tag: variable]
//! ```
//!
//! Without a password the record is written behind an `LLWL_RAW` marker.
//! Writes go to a temporary file first. Exclusive creation publishes the
//! temporary file with a hard link, which fails if the target already exists,
//! so concurrent writers (threads or processes) never clobber each other.

use super::{validate_label, PutMode, Wallet, WalletError};
use crate::identity::Identity;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, Params};
use rand::RngCore;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroize;

/// Magic header for encrypted wallet records
const MAGIC_HEADER: &[u8; 8] = b"LLWL0001";

/// Marker for unencrypted wallet records
const RAW_HEADER: &[u8; 8] = b"LLWL_RAW";

/// Current record format version
const FORMAT_VERSION: u8 = 1;

/// Salt length for Argon2 KDF (16 bytes = 128 bits)
const SALT_LEN: usize = 16;

/// Nonce length for AES-GCM (12 bytes = 96 bits)
const NONCE_LEN: usize = 12;

/// Header size: magic(8) + version(1) + salt(16) + nonce(12) = 37 bytes
const HEADER_SIZE: usize = 8 + 1 + SALT_LEN + NONCE_LEN;

const IDENTITY_EXTENSION: &str = "id";

/// File-based wallet
pub struct FileWallet {
    /// Directory holding one record per identity
    base_path: PathBuf,
    /// Encryption password, if records are encrypted at rest
    password: Option<String>,
}

impl FileWallet {
    /// Open (creating if needed) a wallet directory
    pub fn new(base_path: impl Into<PathBuf>, password: Option<&str>) -> Result<Self, WalletError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        info!(path = %base_path.display(), encrypted = password.is_some(), "Opened file wallet");

        Ok(FileWallet {
            base_path,
            password: password.map(|s| s.to_string()),
        })
    }

    /// Wallet directory
    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn identity_path(&self, label: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", label, IDENTITY_EXTENSION))
    }

    fn temp_path(&self, label: &str) -> PathBuf {
        self.base_path
            .join(format!(".{}.{}.tmp", label, uuid::Uuid::new_v4().simple()))
    }

    /// Returns: [magic][version][salt][nonce][ciphertext+tag]
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, WalletError> {
        let Some(password) = &self.password else {
            let mut result = Vec::with_capacity(9 + data.len());
            result.extend_from_slice(RAW_HEADER);
            result.push(FORMAT_VERSION);
            result.extend_from_slice(data);
            return Ok(result);
        };

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut key = derive_key_from_password(password, &salt)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| WalletError::Encryption(format!("Invalid key: {}", e)));
        key.zeroize();
        let ciphertext = cipher?
            .encrypt(nonce, data)
            .map_err(|e| WalletError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut result = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        result.extend_from_slice(MAGIC_HEADER);
        result.push(FORMAT_VERSION);
        result.extend_from_slice(&salt);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Expects: [magic][version][salt][nonce][ciphertext+tag] or the raw marker
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, WalletError> {
        if data.len() < 9 {
            return Err(WalletError::Decryption("File too short".to_string()));
        }

        let raw = &data[0..8] == RAW_HEADER;
        if !raw && &data[0..8] != MAGIC_HEADER {
            return Err(WalletError::Decryption("Invalid magic header".to_string()));
        }
        let version = data[8];
        if version != FORMAT_VERSION {
            return Err(WalletError::Decryption(format!(
                "Unsupported version: {}",
                version
            )));
        }

        if raw {
            if self.password.is_some() {
                return Err(WalletError::Decryption(
                    "Encrypted record expected, found unencrypted".to_string(),
                ));
            }
            return Ok(data[9..].to_vec());
        }

        // 16 is the AEAD tag size
        if data.len() < HEADER_SIZE + 16 {
            return Err(WalletError::Decryption("Truncated file".to_string()));
        }

        let Some(password) = &self.password else {
            return Err(WalletError::Decryption(
                "Password required to decrypt".to_string(),
            ));
        };

        let salt = &data[9..9 + SALT_LEN];
        let nonce = Nonce::from_slice(&data[9 + SALT_LEN..HEADER_SIZE]);
        let ciphertext = &data[HEADER_SIZE..];

        let mut key = derive_key_from_password(password, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| WalletError::Decryption(format!("Invalid key: {}", e)));
        key.zeroize();

        // AEAD tag mismatch = wrong password or corrupted record
        cipher?
            .decrypt(nonce, ciphertext)
            .map_err(|_| WalletError::InvalidPassword)
    }

    fn encode(&self, identity: &Identity) -> Result<Vec<u8>, WalletError> {
        let mut json =
            serde_json::to_vec(identity).map_err(|e| WalletError::Serialization(e.to_string()))?;
        let encoded = self.encrypt(&json);
        json.zeroize();
        encoded
    }
}

impl Wallet for FileWallet {
    fn put(&self, label: &str, identity: &Identity, mode: PutMode) -> Result<(), WalletError> {
        validate_label(label)?;
        let path = self.identity_path(label);
        let temp_path = self.temp_path(label);
        fs::write(&temp_path, self.encode(identity)?)?;

        let published = match mode {
            PutMode::Overwrite => fs::rename(&temp_path, &path),
            PutMode::CreateNew => {
                let linked = fs::hard_link(&temp_path, &path);
                let _ = fs::remove_file(&temp_path);
                linked
            }
        };

        match published {
            Ok(()) => {
                debug!(label, ?mode, "Stored identity");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(WalletError::AlreadyExists(label.to_string()))
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(WalletError::Io(e))
            }
        }
    }

    fn get(&self, label: &str) -> Result<Identity, WalletError> {
        validate_label(label)?;
        let encrypted = match fs::read(self.identity_path(label)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WalletError::NotFound(label.to_string()))
            }
            Err(e) => return Err(WalletError::Io(e)),
        };

        let mut decrypted = self.decrypt(&encrypted)?;
        let identity = serde_json::from_slice(&decrypted)
            .map_err(|e| WalletError::Serialization(e.to_string()));
        decrypted.zeroize();
        identity
    }

    fn exists(&self, label: &str) -> bool {
        validate_label(label).is_ok() && self.identity_path(label).is_file()
    }

    fn remove(&self, label: &str) -> Result<(), WalletError> {
        validate_label(label)?;
        match fs::remove_file(self.identity_path(label)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(WalletError::NotFound(label.to_string()))
            }
            Err(e) => Err(WalletError::Io(e)),
        }
    }

    fn list(&self) -> Result<Vec<String>, WalletError> {
        let mut labels = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(IDENTITY_EXTENSION) {
                continue;
            }
            if let Some(label) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_label(label).is_ok() {
                    labels.push(label.to_string());
                }
            }
        }
        labels.sort();
        Ok(labels)
    }
}

/// Derive 256-bit encryption key from password using Argon2id
fn derive_key_from_password(password: &str, salt: &[u8]) -> Result<Vec<u8>, WalletError> {
    let params = Params::new(
        19 * 1024, // 19 MiB memory cost
        2,         // 2 iterations
        1,         // 1 lane
        Some(32),  // 256-bit output for AES-256
    )
    .map_err(|e| WalletError::Encryption(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = vec![0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| WalletError::Encryption(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_identity;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get_plain() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
        let identity = sample_identity("appUser");

        wallet.put("appUser", &identity, PutMode::CreateNew).unwrap();
        assert_eq!(wallet.get("appUser").unwrap(), identity);

        let raw = fs::read(temp_dir.path().join("appUser.id")).unwrap();
        assert_eq!(&raw[..8], RAW_HEADER);
    }

    #[test]
    fn test_put_and_get_encrypted() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), Some("wallet-pass")).unwrap();
        let identity = sample_identity("admin");

        wallet.put("admin", &identity, PutMode::CreateNew).unwrap();
        assert_eq!(wallet.get("admin").unwrap(), identity);

        let raw = fs::read(temp_dir.path().join("admin.id")).unwrap();
        assert_eq!(&raw[..8], MAGIC_HEADER);
        let text = String::from_utf8_lossy(&raw);
        assert!(!text.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_wrong_password() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), Some("right")).unwrap();
        wallet
            .put("admin", &sample_identity("admin"), PutMode::CreateNew)
            .unwrap();

        let reopened = FileWallet::new(temp_dir.path(), Some("wrong")).unwrap();
        assert!(matches!(
            reopened.get("admin"),
            Err(WalletError::InvalidPassword)
        ));

        let no_password = FileWallet::new(temp_dir.path(), None).unwrap();
        assert!(matches!(
            no_password.get("admin"),
            Err(WalletError::Decryption(_))
        ));
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let identity = sample_identity("appUser");
        {
            let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
            wallet.put("appUser", &identity, PutMode::CreateNew).unwrap();
        }

        let reopened = FileWallet::new(temp_dir.path(), None).unwrap();
        assert!(reopened.exists("appUser"));
        assert_eq!(reopened.get("appUser").unwrap(), identity);
    }

    #[test]
    fn test_create_new_rejects_existing() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
        let original = sample_identity("admin");
        wallet.put("admin", &original, PutMode::CreateNew).unwrap();

        let result = wallet.put("admin", &sample_identity("admin"), PutMode::CreateNew);
        assert!(matches!(result, Err(WalletError::AlreadyExists(_))));
        assert_eq!(wallet.get("admin").unwrap(), original);

        // no temporary files left behind
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
        let replacement = sample_identity("admin");
        wallet
            .put("admin", &sample_identity("admin"), PutMode::CreateNew)
            .unwrap();
        wallet.put("admin", &replacement, PutMode::Overwrite).unwrap();

        assert_eq!(wallet.get("admin").unwrap(), replacement);
    }

    #[test]
    fn test_concurrent_create_has_single_winner() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = Arc::new(FileWallet::new(temp_dir.path(), None).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let wallet = wallet.clone();
                std::thread::spawn(move || {
                    wallet.put("racer", &sample_identity("racer"), PutMode::CreateNew)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(WalletError::AlreadyExists(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(losers, 7);
    }

    #[test]
    fn test_list_remove_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
        wallet
            .put("appUser", &sample_identity("appUser"), PutMode::CreateNew)
            .unwrap();
        wallet
            .put("admin", &sample_identity("admin"), PutMode::CreateNew)
            .unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(wallet.list().unwrap(), vec!["admin", "appUser"]);

        wallet.remove("admin").unwrap();
        assert!(!wallet.exists("admin"));
        assert!(matches!(wallet.get("admin"), Err(WalletError::NotFound(_))));
        assert!(matches!(wallet.remove("admin"), Err(WalletError::NotFound(_))));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
        let result = wallet.put("../escape", &sample_identity("x"), PutMode::CreateNew);
        assert!(matches!(result, Err(WalletError::InvalidLabel(_))));
        assert!(!wallet.exists("../escape"));
    }

    #[test]
    fn test_corrupt_record() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
        fs::write(temp_dir.path().join("broken.id"), b"garbage").unwrap();

        assert!(matches!(
            wallet.get("broken"),
            Err(WalletError::Decryption(_))
        ));
    }

    #[test]
    fn test_unknown_record_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(temp_dir.path(), None).unwrap();
        wallet
            .put("appUser", &sample_identity("appUser"), PutMode::CreateNew)
            .unwrap();

        let path = temp_dir.path().join("appUser.id");
        let mut raw = fs::read(&path).unwrap();
        raw[8] = FORMAT_VERSION + 1;
        fs::write(&path, raw).unwrap();

        match wallet.get("appUser") {
            Err(WalletError::Decryption(message)) => assert!(message.contains("version")),
            other => panic!("expected a version error, got {:?}", other.map(|i| i.label)),
        }
    }
}
