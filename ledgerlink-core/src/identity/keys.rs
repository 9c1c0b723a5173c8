//! Signing keys
//!
//! Ed25519 key material used to sign proposals, transaction envelopes and
//! certificate authority requests. Secret bytes are zeroized on drop.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{pem, IdentityError};

const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Ed25519 signing keypair
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKeypair {
    secret: [u8; 32],
}

impl SigningKeypair {
    /// Generate a fresh keypair from the thread-local CSPRNG
    pub fn generate() -> Self {
        let secret: [u8; 32] = rand::thread_rng().gen();
        Self { secret }
    }

    /// Rebuild a keypair from its 32-byte seed
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let secret: [u8; 32] = bytes.try_into().map_err(|_| {
            IdentityError::InvalidKey(format!("expected 32 secret bytes, got {}", bytes.len()))
        })?;
        Ok(Self { secret })
    }

    /// Public verification key bytes (32 bytes)
    pub fn public_key(&self) -> Vec<u8> {
        SigningKey::from_bytes(&self.secret)
            .verifying_key()
            .to_bytes()
            .to_vec()
    }

    /// Sign a message, returning the 64-byte signature
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(&self.secret)
            .sign(msg)
            .to_bytes()
            .to_vec()
    }

    /// Verify `sig` over `msg` with a raw public key
    pub fn verify(public_key: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        let Ok(public): Result<[u8; 32], _> = public_key.try_into() else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(sig) else {
            return false;
        };
        verifying_key.verify(msg, &signature).is_ok()
    }

    /// PEM encoding of the secret seed
    pub fn to_pem(&self) -> String {
        pem::encode(PRIVATE_KEY_LABEL, &self.secret)
    }

    /// Parse a PEM-encoded secret seed
    pub fn from_pem(text: &str) -> Result<Self, IdentityError> {
        let mut bytes = pem::decode(PRIVATE_KEY_LABEL, text)?;
        let result = Self::from_secret_bytes(&bytes);
        bytes.zeroize();
        result
    }
}

impl fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("public", &hex::encode(self.public_key()))
            .field("secret", &"<redacted>")
            .finish()
    }
}
