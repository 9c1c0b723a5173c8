//! Certificate authority boundary
//!
//! The [`CertificateAuthority`] trait is the only thing the client knows about
//! a CA: it enrolls an identity (exchanging an enrollment secret and a public
//! key for a certificate) and registers new identities on behalf of a
//! registrar. Every failure is one of three classes: the CA could not be
//! reached, it refused a registration, or it refused an enrollment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{Creator, Identity, IdentityError, SigningKeypair};

mod enrollment;

pub use enrollment::{EnrollmentClient, EnrollmentError, EnrollmentSettings};

/// Failure classes reported by a certificate authority
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaError {
    #[error("certificate authority unavailable: {0}")]
    Unavailable(String),

    #[error("registration denied: {0}")]
    RegistrationDenied(String),

    #[error("enrollment failed: {0}")]
    EnrollmentFailed(String),
}

/// Enrollment request; the signature proves possession of the private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub enrollment_id: String,
    pub secret: String,
    /// Hex-encoded public key to certify
    pub public_key: String,
    /// Hex-encoded signature over `enrollment_id || public_key`
    pub proof: String,
}

impl EnrollmentRequest {
    pub fn new(enrollment_id: &str, secret: &str, key: &SigningKeypair) -> Self {
        let public_key = hex::encode(key.public_key());
        let proof = hex::encode(key.sign(&Self::proof_bytes(enrollment_id, &public_key)));
        Self {
            enrollment_id: enrollment_id.to_string(),
            secret: secret.to_string(),
            public_key,
            proof,
        }
    }

    pub fn proof_bytes(enrollment_id: &str, public_key: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(enrollment_id.len() + public_key.len());
        bytes.extend_from_slice(enrollment_id.as_bytes());
        bytes.extend_from_slice(public_key.as_bytes());
        bytes
    }
}

/// Certificate returned by a successful enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentResponse {
    /// PEM-encoded certificate
    pub certificate: String,
    pub ca_name: String,
}

/// New identity to register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub enrollment_id: String,
    pub affiliation: String,
    pub role: String,
    /// 0 means unlimited
    pub max_enrollments: u32,
    /// Requested enrollment secret; the CA generates one when absent
    pub secret: Option<String>,
}

/// Registration request signed by the registrar identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRegistration {
    pub request: RegistrationRequest,
    pub registrar: Creator,
    /// Hex-encoded registrar signature over the JSON request
    pub signature: String,
}

impl SignedRegistration {
    pub fn sign(request: RegistrationRequest, registrar: &Identity) -> Result<Self, IdentityError> {
        let signer = registrar.signer()?;
        let bytes = serde_json::to_vec(&request)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        Ok(Self {
            signature: hex::encode(signer.sign(&bytes)),
            registrar: registrar.creator(),
            request,
        })
    }

    pub fn request_bytes(&self) -> Result<Vec<u8>, IdentityError> {
        serde_json::to_vec(&self.request).map_err(|e| IdentityError::Serialization(e.to_string()))
    }
}

/// Certificate authority client interface
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// CA name, e.g. `ca-org1`
    fn name(&self) -> &str;

    /// Exchange an enrollment secret and public key for a certificate
    async fn enroll(&self, request: EnrollmentRequest) -> Result<EnrollmentResponse, CaError>;

    /// Register a new identity, returning its enrollment secret
    async fn register(&self, request: SignedRegistration) -> Result<String, CaError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_identity;

    #[test]
    fn test_enrollment_proof_verifies() {
        let key = SigningKeypair::generate();
        let request = EnrollmentRequest::new("appUser", "s3cret", &key);

        let proof = hex::decode(&request.proof).unwrap();
        assert!(SigningKeypair::verify(
            &key.public_key(),
            &EnrollmentRequest::proof_bytes(&request.enrollment_id, &request.public_key),
            &proof
        ));
    }

    #[test]
    fn test_signed_registration_verifies_against_registrar() {
        let admin = sample_identity("admin");
        let signed = SignedRegistration::sign(
            RegistrationRequest {
                enrollment_id: "appUser".to_string(),
                affiliation: "org1.department1".to_string(),
                role: "client".to_string(),
                max_enrollments: 0,
                secret: None,
            },
            &admin,
        )
        .unwrap();

        let registrar_key = admin.certificate().unwrap().public_key_bytes().unwrap();
        let sig = hex::decode(&signed.signature).unwrap();
        assert!(SigningKeypair::verify(
            &registrar_key,
            &signed.request_bytes().unwrap(),
            &sig
        ));
        assert_eq!(signed.registrar.msp_id, "Org1MSP");
    }
}
