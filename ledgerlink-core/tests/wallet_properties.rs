/*
    Wallet Property Tests

    Stored identities come back unchanged under any valid label, for the
    in-memory store and the file store, with and without a password.
*/

use ledgerlink_core::identity::{
    Certificate, CertificateBody, EnrollmentMetadata, Identity, SigningKeypair,
};
use ledgerlink_core::wallet::{FileWallet, MemoryWallet, PutMode, Wallet, WalletError};
use proptest::prelude::*;
use tempfile::TempDir;

fn identity(label: &str, msp_id: &str, role: &str, enrolled_at: u64) -> Identity {
    let ca = SigningKeypair::generate();
    let key = SigningKeypair::generate();
    let certificate = Certificate::issue(
        CertificateBody {
            serial: enrolled_at,
            subject: label.to_string(),
            msp_id: msp_id.to_string(),
            role: role.to_string(),
            affiliation: "org1.department1".to_string(),
            public_key: hex::encode(key.public_key()),
            issuer: "ca-org1".to_string(),
            not_before: enrolled_at,
            not_after: enrolled_at.saturating_add(86_400),
        },
        &ca,
    )
    .unwrap();
    Identity::new(
        label,
        msp_id,
        &certificate,
        &key,
        EnrollmentMetadata {
            enrollment_id: label.to_string(),
            ca_name: "ca-org1".to_string(),
            role: role.to_string(),
            enrolled_at,
        },
    )
    .unwrap()
}

fn label() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9_@.-]{0,40}"
}

fn msp_id() -> impl Strategy<Value = String> {
    "Org[1-9]MSP"
}

fn role() -> impl Strategy<Value = String> {
    prop_oneof![Just("client".to_string()), Just("admin".to_string()), Just("peer".to_string())]
}

proptest! {
    #[test]
    fn memory_wallet_returns_what_was_stored(
        label in label(),
        msp in msp_id(),
        role in role(),
        enrolled_at in 0u64..4_000_000_000,
    ) {
        let wallet = MemoryWallet::new();
        let stored = identity(&label, &msp, &role, enrolled_at);

        wallet.put(&label, &stored, PutMode::CreateNew).unwrap();
        prop_assert!(wallet.exists(&label));
        prop_assert_eq!(wallet.get(&label).unwrap(), stored.clone());
        prop_assert!(matches!(
            wallet.put(&label, &stored, PutMode::CreateNew),
            Err(WalletError::AlreadyExists(_))
        ));
        prop_assert_eq!(wallet.list().unwrap(), vec![label.clone()]);
    }

    #[test]
    fn file_wallet_returns_what_was_stored(
        labels in proptest::collection::btree_set(label(), 1..5),
        msp in msp_id(),
        role in role(),
    ) {
        let dir = TempDir::new().unwrap();
        let wallet = FileWallet::new(dir.path(), None).unwrap();

        let stored: Vec<Identity> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| identity(label, &msp, &role, i as u64))
            .collect();
        for identity in &stored {
            wallet.put(&identity.label, identity, PutMode::CreateNew).unwrap();
        }

        // A second handle on the same directory sees the same records
        let reopened = FileWallet::new(dir.path(), None).unwrap();
        let mut listed = reopened.list().unwrap();
        listed.sort();
        prop_assert_eq!(listed, labels.iter().cloned().collect::<Vec<_>>());
        for identity in &stored {
            prop_assert_eq!(&reopened.get(&identity.label).unwrap(), identity);
        }
    }

    #[test]
    fn invalid_labels_are_rejected(
        label in prop_oneof!["\\.[a-z]{1,8}", "[a-z]{1,8}/[a-z]{1,8}", "[a-z]{1,8} [a-z]{1,8}"],
    ) {
        let wallet = MemoryWallet::new();
        let stored = identity("appUser", "Org1MSP", "client", 0);
        prop_assert!(matches!(
            wallet.put(&label, &stored, PutMode::CreateNew),
            Err(WalletError::InvalidLabel(_))
        ));
        prop_assert!(!wallet.exists(&label));
    }
}

proptest! {
    // Key derivation dominates each case
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn encrypted_file_wallet_needs_the_password(
        label in label(),
        password in "[ -~]{1,24}",
    ) {
        let dir = TempDir::new().unwrap();
        let stored = identity(&label, "Org1MSP", "client", 1);
        FileWallet::new(dir.path(), Some(password.as_str()))
            .unwrap()
            .put(&label, &stored, PutMode::CreateNew)
            .unwrap();

        let reopened = FileWallet::new(dir.path(), Some(password.as_str())).unwrap();
        prop_assert_eq!(reopened.get(&label).unwrap(), stored);

        let wrong = format!("{}x", password);
        let locked = FileWallet::new(dir.path(), Some(wrong.as_str())).unwrap();
        prop_assert!(locked.get(&label).is_err());

        let plain = FileWallet::new(dir.path(), None).unwrap();
        prop_assert!(plain.get(&label).is_err());
    }
}
