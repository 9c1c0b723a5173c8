//! In-process certificate authority

use async_trait::async_trait;
use rand::RngCore;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::ca::{
    CaError, CertificateAuthority, EnrollmentRequest, EnrollmentResponse, SignedRegistration,
};
use crate::identity::{unix_now, Certificate, CertificateBody, SigningKeypair};

/// Certificates are valid for one year
const CERT_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

const BOOTSTRAP_ADMIN: &str = "admin";
const BOOTSTRAP_SECRET: &str = "adminpw";

#[derive(Debug, Clone)]
struct Registration {
    secret: String,
    role: String,
    affiliation: String,
    max_enrollments: u32,
    enrollments: u32,
}

#[derive(Debug, Default)]
struct CaState {
    registrations: HashMap<String, Registration>,
    affiliations: BTreeSet<String>,
}

/// Certificate authority with a bootstrap `admin`/`adminpw` identity.
///
/// Only admins may register new identities, and only under a known
/// affiliation.
pub struct SimCa {
    name: String,
    msp_id: String,
    key: SigningKeypair,
    state: Mutex<CaState>,
    next_serial: AtomicU64,
    online: AtomicBool,
    enroll_calls: AtomicUsize,
    register_calls: AtomicUsize,
}

impl SimCa {
    pub fn new(name: &str, msp_id: &str) -> Self {
        Self::with_key(name, msp_id, SigningKeypair::generate())
    }

    /// CA with a fixed signing key so its trust root is stable across runs
    pub fn with_seed(name: &str, msp_id: &str, seed: [u8; 32]) -> Self {
        // 32 bytes is always a valid Ed25519 seed
        let key = SigningKeypair::from_secret_bytes(&seed).unwrap_or_else(|_| SigningKeypair::generate());
        Self::with_key(name, msp_id, key)
    }

    fn with_key(name: &str, msp_id: &str, key: SigningKeypair) -> Self {
        let org = msp_id.trim_end_matches("MSP").to_lowercase();
        let mut state = CaState::default();
        for affiliation in [
            org.clone(),
            format!("{}.department1", org),
            format!("{}.department2", org),
        ] {
            state.affiliations.insert(affiliation);
        }
        state.registrations.insert(
            BOOTSTRAP_ADMIN.to_string(),
            Registration {
                secret: BOOTSTRAP_SECRET.to_string(),
                role: "admin".to_string(),
                affiliation: String::new(),
                max_enrollments: 0,
                enrollments: 0,
            },
        );

        Self {
            name: name.to_string(),
            msp_id: msp_id.to_string(),
            key,
            state: Mutex::new(state),
            next_serial: AtomicU64::new(1),
            online: AtomicBool::new(true),
            enroll_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
        }
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    /// Trust root for certificates issued by this CA
    pub fn public_key(&self) -> Vec<u8> {
        self.key.public_key()
    }

    pub fn add_affiliation(&self, affiliation: &str) {
        self.lock().affiliations.insert(affiliation.to_string());
    }

    /// Take the CA offline; every request then fails with `Unavailable`
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn enroll_calls(&self) -> usize {
        self.enroll_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, CaState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(&self) -> Result<(), CaError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CaError::Unavailable(format!("{} is not reachable", self.name)))
        }
    }

    fn verify_registrar(&self, request: &SignedRegistration) -> Result<(), CaError> {
        let denied = |reason: &str| CaError::RegistrationDenied(reason.to_string());

        let cert = Certificate::from_pem(&request.registrar.certificate)
            .map_err(|_| denied("registrar certificate is unreadable"))?;
        cert.verify(&self.key.public_key())
            .map_err(|_| denied("registrar certificate was not issued by this CA"))?;
        if !cert.is_valid_at(unix_now()) {
            return Err(denied("registrar certificate has expired"));
        }
        if request.registrar.msp_id != self.msp_id {
            return Err(denied("registrar belongs to a different organization"));
        }

        let registrar_key = cert
            .public_key_bytes()
            .map_err(|_| denied("registrar certificate is unreadable"))?;
        let signature =
            hex::decode(&request.signature).map_err(|_| denied("malformed registrar signature"))?;
        let bytes = request
            .request_bytes()
            .map_err(|_| denied("malformed registration request"))?;
        if !SigningKeypair::verify(&registrar_key, &bytes, &signature) {
            return Err(denied("registrar signature does not verify"));
        }

        let state = self.lock();
        match state.registrations.get(&cert.body.subject) {
            Some(reg) if reg.role == "admin" => Ok(()),
            _ => Err(CaError::RegistrationDenied(format!(
                "'{}' is not allowed to register identities",
                cert.body.subject
            ))),
        }
    }
}

#[async_trait]
impl CertificateAuthority for SimCa {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enroll(&self, request: EnrollmentRequest) -> Result<EnrollmentResponse, CaError> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let public_key = hex::decode(&request.public_key)
            .map_err(|_| CaError::EnrollmentFailed("malformed public key".to_string()))?;
        let proof = hex::decode(&request.proof)
            .map_err(|_| CaError::EnrollmentFailed("malformed proof of possession".to_string()))?;
        let signed = EnrollmentRequest::proof_bytes(&request.enrollment_id, &request.public_key);
        if !SigningKeypair::verify(&public_key, &signed, &proof) {
            return Err(CaError::EnrollmentFailed(
                "proof of possession does not verify".to_string(),
            ));
        }

        let (role, affiliation) = {
            let mut state = self.lock();
            let reg = state
                .registrations
                .get_mut(&request.enrollment_id)
                .filter(|reg| reg.secret == request.secret)
                .ok_or_else(|| {
                    CaError::EnrollmentFailed(format!(
                        "authentication failure for '{}'",
                        request.enrollment_id
                    ))
                })?;
            if reg.max_enrollments != 0 && reg.enrollments >= reg.max_enrollments {
                return Err(CaError::EnrollmentFailed(format!(
                    "'{}' has reached its enrollment limit",
                    request.enrollment_id
                )));
            }
            reg.enrollments += 1;
            (reg.role.clone(), reg.affiliation.clone())
        };

        let now = unix_now();
        let certificate = Certificate::issue(
            CertificateBody {
                serial: self.next_serial.fetch_add(1, Ordering::SeqCst),
                subject: request.enrollment_id.clone(),
                msp_id: self.msp_id.clone(),
                role,
                affiliation,
                public_key: request.public_key,
                issuer: self.name.clone(),
                not_before: now,
                not_after: now + CERT_LIFETIME_SECS,
            },
            &self.key,
        )
        .and_then(|cert| cert.to_pem())
        .map_err(|e| CaError::EnrollmentFailed(e.to_string()))?;

        debug!(ca = %self.name, enrollment_id = %request.enrollment_id, "Issued certificate");
        Ok(EnrollmentResponse {
            certificate,
            ca_name: self.name.clone(),
        })
    }

    async fn register(&self, request: SignedRegistration) -> Result<String, CaError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.verify_registrar(&request)?;

        let reg = request.request;
        let mut state = self.lock();
        if !state.affiliations.contains(&reg.affiliation) {
            return Err(CaError::RegistrationDenied(format!(
                "affiliation '{}' does not exist",
                reg.affiliation
            )));
        }
        if state.registrations.contains_key(&reg.enrollment_id) {
            return Err(CaError::RegistrationDenied(format!(
                "identity '{}' is already registered",
                reg.enrollment_id
            )));
        }

        let secret = reg.secret.clone().unwrap_or_else(|| {
            let mut bytes = [0u8; 12];
            rand::thread_rng().fill_bytes(&mut bytes);
            hex::encode(bytes)
        });
        state.registrations.insert(
            reg.enrollment_id.clone(),
            Registration {
                secret: secret.clone(),
                role: reg.role,
                affiliation: reg.affiliation,
                max_enrollments: reg.max_enrollments,
                enrollments: 0,
            },
        );

        debug!(ca = %self.name, enrollment_id = %reg.enrollment_id, "Registered identity");
        Ok(secret)
    }
}
