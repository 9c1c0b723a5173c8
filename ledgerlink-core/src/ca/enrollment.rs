//! Enrollment client
//!
//! Bridges a wallet and a certificate authority. Both entry points are
//! idempotent: when the wallet already holds the requested identity it is
//! returned as-is and the CA is not contacted. An identity only reaches the
//! wallet after the CA has issued a certificate that matches the locally
//! generated key, so a failed enrollment never leaves a partial record.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    CaError, CertificateAuthority, EnrollmentRequest, RegistrationRequest, SignedRegistration,
};
use crate::config::IdentityConfig;
use crate::identity::{
    unix_now, Certificate, EnrollmentMetadata, Identity, IdentityError, SigningKeypair,
};
use crate::metrics;
use crate::wallet::{PutMode, Wallet, WalletError};

/// Errors from enrollment flows
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error(transparent)]
    Ca(#[from] CaError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("An identity for the admin user '{0}' does not exist in the wallet; enroll the admin first")]
    AdminNotEnrolled(String),
}

/// Admin bootstrap credentials and defaults for new users
#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    /// Wallet label of the admin identity
    pub admin_label: String,
    pub admin_enrollment_id: String,
    pub admin_secret: String,
    /// Role assigned to registered application users
    pub user_role: String,
    /// 0 means unlimited
    pub max_enrollments: u32,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            admin_label: "admin".to_string(),
            admin_enrollment_id: "admin".to_string(),
            admin_secret: "adminpw".to_string(),
            user_role: "client".to_string(),
            max_enrollments: 0,
        }
    }
}

impl From<&IdentityConfig> for EnrollmentSettings {
    fn from(config: &IdentityConfig) -> Self {
        Self {
            admin_label: config.admin_label.clone(),
            admin_enrollment_id: config.admin_enrollment_id.clone(),
            admin_secret: config.admin_secret.clone(),
            user_role: config.user_role.clone(),
            max_enrollments: 0,
        }
    }
}

/// Enrolls admins and application users into a wallet
pub struct EnrollmentClient {
    wallet: Arc<dyn Wallet>,
    settings: EnrollmentSettings,
}

impl EnrollmentClient {
    pub fn new(wallet: Arc<dyn Wallet>, settings: EnrollmentSettings) -> Self {
        Self { wallet, settings }
    }

    pub fn wallet(&self) -> &Arc<dyn Wallet> {
        &self.wallet
    }

    /// Enroll the admin identity unless the wallet already holds it
    pub async fn enroll_admin(
        &self,
        ca: &dyn CertificateAuthority,
        msp_id: &str,
    ) -> Result<Identity, EnrollmentError> {
        let label = &self.settings.admin_label;
        if self.wallet.exists(label) {
            info!(label = %label, "Admin identity already exists in the wallet");
            return Ok(self.wallet.get(label)?);
        }

        let identity = self
            .enroll(
                ca,
                msp_id,
                label,
                &self.settings.admin_enrollment_id,
                &self.settings.admin_secret,
            )
            .await?;
        let stored = self.store(label, identity)?;
        info!(label = %label, ca = ca.name(), msp_id, "Enrolled admin identity");
        Ok(stored)
    }

    /// Register and enroll an application user unless the wallet already holds it
    pub async fn register_and_enroll_user(
        &self,
        ca: &dyn CertificateAuthority,
        msp_id: &str,
        user_id: &str,
        affiliation: &str,
    ) -> Result<Identity, EnrollmentError> {
        if self.wallet.exists(user_id) {
            info!(user_id, "User identity already exists in the wallet");
            return Ok(self.wallet.get(user_id)?);
        }

        let admin_label = &self.settings.admin_label;
        if !self.wallet.exists(admin_label) {
            warn!(admin = %admin_label, "Cannot register user without an admin identity");
            return Err(EnrollmentError::AdminNotEnrolled(admin_label.clone()));
        }
        let admin = self.wallet.get(admin_label)?;

        let registration = SignedRegistration::sign(
            RegistrationRequest {
                enrollment_id: user_id.to_string(),
                affiliation: affiliation.to_string(),
                role: self.settings.user_role.clone(),
                max_enrollments: self.settings.max_enrollments,
                secret: None,
            },
            &admin,
        )?;

        let secret = ca.register(registration).await;
        metrics::record_ca_request("register", secret.is_ok());
        let secret = secret?;
        debug!(user_id, affiliation, "Registered user with the certificate authority");

        let identity = self.enroll(ca, msp_id, user_id, user_id, &secret).await?;
        let stored = self.store(user_id, identity)?;
        info!(user_id, ca = ca.name(), msp_id, "Registered and enrolled user");
        Ok(stored)
    }

    async fn enroll(
        &self,
        ca: &dyn CertificateAuthority,
        msp_id: &str,
        label: &str,
        enrollment_id: &str,
        secret: &str,
    ) -> Result<Identity, EnrollmentError> {
        let key = SigningKeypair::generate();
        let response = ca
            .enroll(EnrollmentRequest::new(enrollment_id, secret, &key))
            .await;
        metrics::record_ca_request("enroll", response.is_ok());
        let response = response?;

        let certificate = Certificate::from_pem(&response.certificate)
            .map_err(|e| CaError::EnrollmentFailed(format!("unreadable certificate: {}", e)))?;
        if certificate.public_key_bytes()? != key.public_key() {
            return Err(CaError::EnrollmentFailed(
                "issued certificate does not certify the requested key".to_string(),
            )
            .into());
        }
        if certificate.body.msp_id != msp_id {
            return Err(CaError::EnrollmentFailed(format!(
                "certificate issued for {} but {} was requested",
                certificate.body.msp_id, msp_id
            ))
            .into());
        }

        let metadata = EnrollmentMetadata {
            enrollment_id: enrollment_id.to_string(),
            ca_name: response.ca_name,
            role: certificate.body.role.clone(),
            enrolled_at: unix_now(),
        };
        Ok(Identity::new(label, msp_id, &certificate, &key, metadata)?)
    }

    /// A concurrent enrollment may have stored the label first; keep theirs
    fn store(&self, label: &str, identity: Identity) -> Result<Identity, EnrollmentError> {
        match self.wallet.put(label, &identity, PutMode::CreateNew) {
            Ok(()) => Ok(identity),
            Err(WalletError::AlreadyExists(_)) => {
                warn!(label, "Identity was stored concurrently, using the stored one");
                Ok(self.wallet.get(label)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}
