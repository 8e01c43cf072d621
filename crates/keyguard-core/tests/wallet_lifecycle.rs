//! Wallet lifecycle through the public facade: provisioning, PIN lockout,
//! the failure ceiling, biometric spends and the wipe paths.
//!
//! Run with: cargo test -p keyguard-core --test wallet_lifecycle

mod common;

use common::*;
use keyguard_core::seed::BIP39_CREATION_TIME;
use keyguard_core::store::key;
use keyguard_core::{
    Accessibility, AuthError, AuthEvent, AuthPolicy, BiometricResult, BitcoinProfile, KeyPurpose,
    MemorySecretStore, MemorySettings, PinOutcome, SecretStore, SecretStoreExt, Wallet,
    WalletOptions,
};
use std::sync::Arc;

// ============================================================================
// Provisioning
// ============================================================================

#[test]
fn test_generate_then_authenticate_phrase() {
    let h = harness();
    assert!(h.wallet.no_wallet());

    let phrase = h.wallet.generate_seed_phrase().expect("generate");
    assert_eq!(phrase.split_whitespace().count(), 12);
    assert!(!h.wallet.no_wallet());
    assert!(h.wallet.authenticate_phrase(&phrase));
    assert!(!h.wallet.authenticate_phrase(OTHER_PHRASE));

    // creation time is recorded for a generated wallet
    assert_eq!(h.wallet.seeds().earliest_key_time(), START);

    // only one wallet per store
    assert!(h.wallet.generate_seed_phrase().is_none());
    assert!(!h.wallet.recover_from_phrase(OTHER_PHRASE));
}

#[test]
fn test_recover_uses_bip39_epoch() {
    let h = harness();
    assert!(h.wallet.recover_from_phrase(PHRASE));
    assert!(h.wallet.authenticate_phrase(PHRASE));
    assert_eq!(h.wallet.seeds().earliest_key_time(), BIP39_CREATION_TIME);
}

#[test]
fn test_phrase_stored_in_authenticated_tier() {
    let h = provisioned();
    assert_eq!(
        h.store.accessibility_of(key::MNEMONIC),
        Some(keyguard_core::Accessibility::RequiresAuthenticatedUnlock)
    );

    // a locked device still answers phrase checks from the public key
    h.store.set_device_unlocked(false);
    assert!(h.wallet.authenticate_phrase(PHRASE));
    assert!(h.wallet.seed_phrase("123456").is_none());
}

#[test]
fn test_seed_phrase_requires_pin() {
    let h = provisioned();
    assert!(h.wallet.seed_phrase("999999").is_none());
    let phrase = h.wallet.seed_phrase("123456").expect("phrase");
    assert_eq!(phrase.as_str(), PHRASE);
}

// ============================================================================
// PIN
// ============================================================================

#[test]
fn test_force_set_pin_without_phrase() {
    let h = harness();
    assert!(h.wallet.generate_seed_phrase().is_some());

    assert!(h.wallet.force_set_pin("123456", None));
    assert!(h.wallet.gate().has_pin().unwrap());

    // with a PIN present this only checks the candidate
    assert!(!h.wallet.force_set_pin("000000", None));
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 1);

    assert!(h.wallet.force_set_pin("123456", None));
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 0);
}

#[test]
fn test_force_set_pin_with_phrase() {
    let h = provisioned();

    assert!(!h.wallet.force_set_pin("222222", Some(OTHER_PHRASE)));
    assert!(h.wallet.authenticate_pin("123456"));

    assert!(h.wallet.force_set_pin("222222", Some(PHRASE)));
    assert!(h.wallet.authenticate_pin("222222"));
    assert!(!h.wallet.authenticate_pin("123456"));
}

#[test]
fn test_short_pin_rejected() {
    let h = harness();
    assert!(h.wallet.generate_seed_phrase().is_some());
    assert!(!h.wallet.force_set_pin("12", None));
    assert!(!h.wallet.gate().has_pin().unwrap());
}

#[test]
fn test_change_pin() {
    let h = provisioned();

    assert!(!h.wallet.change_pin("000000", "654321"));
    assert!(h.wallet.authenticate_pin("123456"));

    assert!(h.wallet.change_pin("123456", "654321"));
    assert!(h.wallet.authenticate_pin("654321"));
    assert!(!h.wallet.authenticate_pin("123456"));
}

#[test]
fn test_repeated_wrong_pin_counts_once() {
    let h = provisioned();
    for _ in 0..5 {
        assert!(!h.wallet.authenticate_pin("111111"));
    }
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 1);
    assert!(!h.wallet.gate().is_wallet_disabled());
}

#[test]
fn test_success_resets_counters() {
    let h = provisioned();
    assert!(!h.wallet.authenticate_pin("111111"));
    assert!(!h.wallet.authenticate_pin("222222"));
    assert_eq!(h.wallet.gate().pin_attempts_remaining().unwrap(), 6);

    assert!(h.wallet.authenticate_pin("123456"));
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 0);
    assert_eq!(h.wallet.gate().wallet_disabled_until().unwrap(), 0);

    // a new session counts "111111" again
    assert!(!h.wallet.authenticate_pin("111111"));
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 1);
}

#[test]
fn test_lockout_window() {
    let h = provisioned();
    for pin in ["111111", "222222", "333333"] {
        assert!(!h.wallet.authenticate_pin(pin));
    }

    let until = START + 60;
    assert_eq!(h.wallet.gate().wallet_disabled_until().unwrap(), until);
    assert_eq!(h.wallet.gate().lockout_remaining(), 60);

    // even the right PIN is refused while locked, and nothing is counted
    match h.wallet.try_authenticate_pin("123456") {
        Err(AuthError::LockedOut { until: u }) => assert_eq!(u, until),
        other => panic!("expected lockout, got {:?}", other),
    }
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 3);

    h.clock.advance(59);
    assert!(h.wallet.gate().is_wallet_disabled());
    h.clock.advance(1);
    assert!(!h.wallet.gate().is_wallet_disabled());

    assert!(h.wallet.authenticate_pin("123456"));
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 0);
}

#[test]
fn test_lockout_grows_sixfold() {
    let h = provisioned();
    for pin in ["111111", "222222", "333333"] {
        assert!(!h.wallet.authenticate_pin(pin));
    }
    h.clock.advance(60);
    assert!(!h.wallet.authenticate_pin("444444"));

    assert_eq!(h.wallet.gate().fail_count().unwrap(), 4);
    assert_eq!(h.wallet.gate().lockout_remaining(), 360);
}

#[test]
fn test_wrong_pin_events() {
    let h = provisioned();
    let mut rx = h.wallet.subscribe();

    assert!(!h.wallet.authenticate_pin("111111"));
    assert_eq!(
        drain(&mut rx),
        vec![AuthEvent::PinFailed {
            attempts_remaining: 7
        }]
    );

    assert!(h.wallet.authenticate_pin("123456"));
    assert_eq!(drain(&mut rx), vec![AuthEvent::Authenticated]);
}

// ============================================================================
// Failure ceiling
// ============================================================================

#[test]
fn test_eighth_unique_failure_wipes_once() {
    let h = provisioned();
    let mut rx = h.wallet.subscribe();

    for i in 1..8u64 {
        let pin = format!("{:06}", i);
        match h.wallet.try_authenticate_pin(&pin).unwrap() {
            PinOutcome::Rejected { attempts_remaining } => {
                assert_eq!(attempts_remaining, 8 - i)
            }
            other => panic!("attempt {} gave {:?}", i, other),
        }
        // step past any lockout window
        h.clock.advance(1_000_000);
    }

    assert_eq!(
        h.wallet.try_authenticate_pin("000008").unwrap(),
        PinOutcome::WipeThresholdReached
    );

    assert!(h.wallet.no_wallet());
    assert!(h.store.keys().is_empty());
    assert!(h.engine.was_reset.load(std::sync::atomic::Ordering::SeqCst));

    // the same guess again finds no PIN and wipes nothing
    assert!(!h.wallet.authenticate_pin("000008"));
    assert!(matches!(
        h.wallet.try_authenticate_pin("000008"),
        Err(AuthError::NoPinSet)
    ));

    let events = drain(&mut rx);
    let wipes = events
        .iter()
        .filter(|e| **e == AuthEvent::WipeStarted)
        .count();
    assert_eq!(wipes, 1);
    assert!(events.contains(&AuthEvent::WalletWiped));

    // the device can be provisioned again
    assert!(h.wallet.generate_seed_phrase().is_some());
}

// ============================================================================
// Wipe
// ============================================================================

#[test]
fn test_wipe_requires_pin() {
    let h = provisioned();
    assert!(!h.wallet.wipe("000000"));
    assert!(!h.wallet.no_wallet());

    assert!(h.wallet.wipe("123456"));
    assert!(h.wallet.no_wallet());
    for name in key::ALL {
        assert!(!h.store.exists(name).unwrap(), "{} survived the wipe", name);
    }
}

#[test]
fn test_wipe_clears_settings() {
    let h = provisioned();
    assert!(h.wallet.set_spending_limit(5_000));
    assert_eq!(h.wallet.spending_limit(), 5_000);

    assert!(h.wallet.wipe("123456"));
    assert_eq!(h.wallet.spending_limit(), 0);
}

#[test]
fn test_incomplete_wipe_blocks_provisioning() {
    let h = provisioned();
    let mut rx = h.wallet.subscribe();
    h.store.fail_deletes_of(key::PIN);

    assert!(!h.wallet.wipe("123456"));
    assert!(h.wallet.wipe_incomplete());
    assert!(h.store.exists(key::PIN).unwrap());
    assert!(!h.store.exists(key::MNEMONIC).unwrap());
    assert!(drain(&mut rx).contains(&AuthEvent::WipeIncomplete {
        failed: vec![key::PIN.to_string()]
    }));

    assert!(h.wallet.generate_seed_phrase().is_none());
    assert!(!h.wallet.recover_from_phrase(PHRASE));

    h.store.clear_delete_failures();
    assert!(h.wallet.wipe("123456"));
    assert!(!h.wallet.wipe_incomplete());
    assert!(h.wallet.generate_seed_phrase().is_some());
}

#[test]
fn test_unlink_with_phrase() {
    let h = provisioned();
    assert!(h.wallet.unlink_token(OTHER_PHRASE).is_none());

    let token = h.wallet.unlink_token(PHRASE).expect("token");
    assert!(h.wallet.unlink(token));
    assert!(h.wallet.no_wallet());
    assert!(h.wallet.unlink_token(PHRASE).is_none());
}

#[test]
fn test_wipe_removes_engine_databases() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("wallet.sqlite");
    let wal = dir.path().join("wallet.sqlite-wal");
    std::fs::write(&db, b"db").unwrap();
    std::fs::write(&wal, b"wal").unwrap();

    let h = harness_with(AuthPolicy::default(), vec![db.clone()]);
    assert!(h.wallet.recover_from_phrase(PHRASE));
    assert!(h.wallet.force_set_pin("123456", None));

    assert!(h.wallet.wipe("123456"));
    assert!(!db.exists());
    assert!(!wal.exists());
}

#[test]
fn test_delete_wallet_database_keeps_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("wallet.sqlite");
    std::fs::write(&db, b"db").unwrap();

    let h = harness_with(AuthPolicy::default(), vec![db.clone()]);
    assert!(h.wallet.recover_from_phrase(PHRASE));
    assert!(h.wallet.force_set_pin("123456", None));
    let mut rx = h.wallet.subscribe();

    assert!(!h.wallet.delete_wallet_database("000000"));
    assert!(db.exists());

    assert!(h.wallet.delete_wallet_database("123456"));
    assert!(!db.exists());
    assert!(!h.wallet.no_wallet());
    assert!(h.wallet.authenticate_pin("123456"));
    assert!(drain(&mut rx).contains(&AuthEvent::WalletDatabaseDeleted));
}

// ============================================================================
// Spending and signing
// ============================================================================

#[test]
fn test_biometric_limit_window() {
    let h = provisioned();
    h.engine.set_total_sent(1_000);
    assert!(h.wallet.set_spending_limit(5_000));

    assert!(h.wallet.can_use_biometrics(&Payment::of(5_000)));
    assert!(!h.wallet.can_use_biometrics(&Payment::of(5_001)));

    // change coming back does not count
    let with_change = Payment {
        sent: 7_000,
        change: 2_000,
        signed_with: None,
    };
    assert!(h.wallet.can_use_biometrics(&with_change));
}

#[test]
fn test_pin_unlock_rebases_limit() {
    let h = provisioned();
    assert!(h.wallet.set_spending_limit(5_000));

    h.engine.set_total_sent(4_000);
    assert!(!h.wallet.can_use_biometrics(&Payment::of(2_000)));

    assert!(h.wallet.authenticate_pin("123456"));
    assert!(h.wallet.can_use_biometrics(&Payment::of(5_000)));
    assert!(!h.wallet.can_use_biometrics(&Payment::of(5_001)));
}

#[test]
fn test_no_limit_means_no_biometrics() {
    let h = provisioned();
    assert_eq!(h.wallet.spending_limit(), 0);
    assert!(!h.wallet.can_use_biometrics(&Payment::of(1)));
    assert!(h.wallet.can_use_biometrics(&Payment::of(0)));
}

#[test]
fn test_sign_with_pin() {
    let h = provisioned();
    let expected = h
        .wallet
        .seeds()
        .derive_private_key(KeyPurpose::Chain(&BitcoinProfile))
        .unwrap();

    let mut tx = Payment::of(10_000);
    assert!(!h.wallet.sign_transaction_with_pin(&mut tx, "000000"));
    assert!(tx.signed_with.is_none());

    assert!(h.wallet.sign_transaction_with_pin(&mut tx, "123456"));
    assert_eq!(tx.signed_with.as_deref(), Some(expected.secret_bytes()));
}

#[test]
fn test_sign_with_biometrics() {
    let h = provisioned();
    assert!(h.wallet.set_spending_limit(5_000));
    let mut rx = h.wallet.subscribe();

    let mut small = Payment::of(4_000);
    assert_eq!(
        h.wallet.sign_transaction_with_biometrics(&mut small, "Send 4000 sat"),
        BiometricResult::Success
    );
    assert!(small.signed_with.is_some());
    assert_eq!(
        drain(&mut rx),
        vec![
            AuthEvent::BiometricPrompting(true),
            AuthEvent::BiometricPrompting(false)
        ]
    );

    // over the ceiling: no prompt, caller falls back to the PIN
    let mut large = Payment::of(6_000);
    assert_eq!(
        h.wallet.sign_transaction_with_biometrics(&mut large, "Send 6000 sat"),
        BiometricResult::Failure
    );
    assert!(large.signed_with.is_none());
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_api_auth_key_cached() {
    let h = provisioned();
    assert!(!h.store.exists(key::API_AUTH_KEY).unwrap());

    let first = h.wallet.api_auth_key().expect("api key");
    assert!(h.store.exists(key::API_AUTH_KEY).unwrap());

    let second = h.wallet.api_auth_key().expect("api key");
    assert_eq!(first.secret_bytes(), second.secret_bytes());
}

#[test]
fn test_bitid_keys_differ_per_site() {
    let h = provisioned();
    let a = h.wallet.bitid_key("bitid://example.com/login", 0).unwrap();
    let b = h.wallet.bitid_key("bitid://example.org/login", 0).unwrap();
    let a_again = h.wallet.bitid_key("bitid://example.com/login", 0).unwrap();
    assert_ne!(a.secret_bytes(), b.secret_bytes());
    assert_eq!(a.secret_bytes(), a_again.secret_bytes());
}

// ============================================================================
// Legacy layout
// ============================================================================

fn open_over(store: &Arc<MemorySecretStore>) -> Wallet<TestEngine> {
    Wallet::open(
        Arc::new(TestEngine::default()),
        store.clone(),
        Arc::new(MemorySettings::new()),
        WalletOptions::default(),
    )
    .unwrap()
}

#[test]
fn test_open_defers_legacy_upgrade_while_device_locked() {
    let store = Arc::new(MemorySecretStore::new());
    store
        .set_string(
            key::MNEMONIC,
            Some(PHRASE),
            Accessibility::RequiresAuthenticatedUnlock,
        )
        .unwrap();
    store
        .set(key::LEGACY_SEED, Some(&[7u8; 64]), Accessibility::AfterUnlock)
        .unwrap();

    store.set_device_unlocked(false);
    let wallet = open_over(&store);
    assert!(!wallet.no_wallet());
    assert!(store.exists(key::LEGACY_SEED).unwrap());
    drop(wallet);

    store.set_device_unlocked(true);
    let wallet = open_over(&store);
    assert!(!store.exists(key::LEGACY_SEED).unwrap());
    assert!(store.exists(key::MASTER_PUB_KEY).unwrap());
    assert!(wallet.authenticate_phrase(PHRASE));
}

#[test]
fn test_open_discards_legacy_seed_without_phrase() {
    let store = Arc::new(MemorySecretStore::new());
    store
        .set(key::LEGACY_SEED, Some(&[7u8; 64]), Accessibility::AfterUnlock)
        .unwrap();

    let wallet = open_over(&store);
    assert!(wallet.no_wallet());
    assert!(wallet.recover_from_phrase(PHRASE));
}
