//! Enrollment certificates
//!
//! A certificate binds an enrollment id, its organisation (MSP) and role to a
//! public key, signed by the issuing certificate authority.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{pem, IdentityError, SigningKeypair};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Signed portion of a certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBody {
    pub serial: u64,
    /// Enrollment id of the holder
    pub subject: String,
    pub msp_id: String,
    pub role: String,
    pub affiliation: String,
    /// Hex-encoded Ed25519 public key of the holder
    pub public_key: String,
    /// Name of the issuing CA
    pub issuer: String,
    /// Validity window, unix seconds
    pub not_before: u64,
    pub not_after: u64,
}

impl CertificateBody {
    fn signing_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        serde_json::to_vec(self).map_err(|e| IdentityError::Serialization(e.to_string()))
    }
}

/// CA-signed certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub body: CertificateBody,
    /// Hex-encoded issuer signature over the body
    pub signature: String,
}

impl Certificate {
    /// Sign `body` with the issuer key
    pub fn issue(body: CertificateBody, issuer_key: &SigningKeypair) -> Result<Self, IdentityError> {
        let signature = hex::encode(issuer_key.sign(&body.signing_bytes()?));
        Ok(Self { body, signature })
    }

    /// Check the issuer signature
    pub fn verify(&self, issuer_public_key: &[u8]) -> Result<(), IdentityError> {
        let sig = hex::decode(&self.signature)
            .map_err(|e| IdentityError::InvalidCertificate(format!("bad signature encoding: {}", e)))?;
        if SigningKeypair::verify(issuer_public_key, &self.body.signing_bytes()?, &sig) {
            Ok(())
        } else {
            Err(IdentityError::InvalidCertificate(format!(
                "certificate {} was not issued by the trusted authority",
                self.body.serial
            )))
        }
    }

    /// Whether `now` (unix seconds) lies inside the validity window
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.body.not_before <= now && now <= self.body.not_after
    }

    /// Decoded holder public key
    pub fn public_key_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        hex::decode(&self.body.public_key)
            .map_err(|e| IdentityError::InvalidCertificate(format!("bad public key encoding: {}", e)))
    }

    /// Identifier exposed to chaincode as the client id
    pub fn client_id(&self) -> String {
        format!(
            "x509::CN={},OU={}::CN={}",
            self.body.subject, self.body.role, self.body.issuer
        )
    }

    pub fn to_pem(&self) -> Result<String, IdentityError> {
        let der = serde_json::to_vec(self).map_err(|e| IdentityError::Serialization(e.to_string()))?;
        Ok(pem::encode(CERTIFICATE_LABEL, &der))
    }

    pub fn from_pem(text: &str) -> Result<Self, IdentityError> {
        let der = pem::decode(CERTIFICATE_LABEL, text)?;
        serde_json::from_slice(&der)
            .map_err(|e| IdentityError::InvalidCertificate(format!("malformed certificate: {}", e)))
    }
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
