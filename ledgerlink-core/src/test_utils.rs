//! Test fixtures shared by unit tests

use crate::identity::{Certificate, CertificateBody, EnrollmentMetadata, Identity, SigningKeypair};

/// A self-consistent identity signed by a throwaway CA key
pub fn sample_identity(label: &str) -> Identity {
    let ca = SigningKeypair::generate();
    let key = SigningKeypair::generate();
    let cert = Certificate::issue(
        CertificateBody {
            serial: rand::random(),
            subject: label.to_string(),
            msp_id: "Org1MSP".to_string(),
            role: "client".to_string(),
            affiliation: "org1.department1".to_string(),
            public_key: hex::encode(key.public_key()),
            issuer: "ca-test".to_string(),
            not_before: 0,
            not_after: u64::MAX,
        },
        &ca,
    )
    .expect("certificate issue");

    Identity::new(
        label,
        "Org1MSP",
        &cert,
        &key,
        EnrollmentMetadata {
            enrollment_id: label.to_string(),
            ca_name: "ca-test".to_string(),
            role: "client".to_string(),
            enrolled_at: 0,
        },
    )
    .expect("identity")
}
