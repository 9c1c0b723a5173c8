//! Identity management module
//!
//! An [`Identity`] is the unit stored in a wallet: the CA-issued certificate,
//! the matching private key and the organisation (MSP) the holder belongs to.
//! Its serialized form is the on-disk wallet record:
//!
//! ```json
//! {
//!   "label": "appUser",
//!   "type": "X.509",
//!   "version": 1,
//!   "mspId": "Org1MSP",
//!   "credentials": { "certificate": "-----BEGIN CERTIFICATE-----...", "privateKey": "..." },
//!   "metadata": { "enrollmentId": "appUser", "caName": "ca-org1", "role": "client", "enrolledAt": 1700000000 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod certificate;
mod keys;
pub mod pem;

pub use certificate::{unix_now, Certificate, CertificateBody};
pub use keys::SigningKeypair;

/// Identity record type tag
pub const X509_IDENTITY: &str = "X.509";

/// Identity record format version
pub const IDENTITY_VERSION: u32 = 1;

/// Errors from identity material handling
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("PEM error: {0}")]
    Pem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Certificate and private key of an identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    certificate: String,
    private_key: String,
}

impl Credentials {
    pub fn new(certificate: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    /// PEM-encoded certificate
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// PEM-encoded private key
    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate", &format!("{} bytes", self.certificate.len()))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// How and when an identity was enrolled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentMetadata {
    pub enrollment_id: String,
    pub ca_name: String,
    pub role: String,
    /// Unix seconds
    pub enrolled_at: u64,
}

/// A CA-issued identity as stored in a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Logical name the identity is stored under
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub msp_id: String,
    pub credentials: Credentials,
    pub metadata: EnrollmentMetadata,
}

impl Identity {
    /// Assemble an X.509 identity from a freshly issued certificate
    pub fn new(
        label: impl Into<String>,
        msp_id: impl Into<String>,
        certificate: &Certificate,
        key: &SigningKeypair,
        metadata: EnrollmentMetadata,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            label: label.into(),
            kind: X509_IDENTITY.to_string(),
            version: IDENTITY_VERSION,
            msp_id: msp_id.into(),
            credentials: Credentials::new(certificate.to_pem()?, key.to_pem()),
            metadata,
        })
    }

    /// Parsed certificate
    pub fn certificate(&self) -> Result<Certificate, IdentityError> {
        Certificate::from_pem(self.credentials.certificate())
    }

    /// Signing key; fails if the stored key does not match the certificate
    pub fn signer(&self) -> Result<SigningKeypair, IdentityError> {
        let key = SigningKeypair::from_pem(self.credentials.private_key())?;
        if key.public_key() != self.certificate()?.public_key_bytes()? {
            return Err(IdentityError::InvalidKey(format!(
                "private key of '{}' does not match its certificate",
                self.label
            )));
        }
        Ok(key)
    }

    /// Public part of the identity sent along with every signed message
    pub fn creator(&self) -> Creator {
        Creator {
            msp_id: self.msp_id.clone(),
            certificate: self.credentials.certificate().to_string(),
        }
    }
}

/// Serialized public identity (MSP id + certificate) of a message signer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub msp_id: String,
    pub certificate: String,
}

impl Creator {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.msp_id.len() + self.certificate.len());
        bytes.extend_from_slice(self.msp_id.as_bytes());
        bytes.extend_from_slice(self.certificate.as_bytes());
        bytes
    }
}
