//! Shared fixtures for the wallet integration tests.

#![allow(dead_code)]

use keyguard_core::{
    AuthEvent, AuthPolicy, BiometricPrompt, ManualClock, MemorySecretStore, MemorySettings,
    PromptError, SigningKey, SpendHistory, Wallet, WalletEngine, WalletOptions,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const PHRASE: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";
pub const OTHER_PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// 2020-09-13, well after the BIP-39 epoch.
pub const START: u64 = 1_600_000_000;

/// A spend as the engine sees it.
#[derive(Debug, Default)]
pub struct Payment {
    pub sent: u64,
    pub change: u64,
    pub signed_with: Option<Vec<u8>>,
}

impl Payment {
    pub fn of(sent: u64) -> Self {
        Self {
            sent,
            ..Self::default()
        }
    }
}

/// Engine double with a settable cumulative outflow.
#[derive(Default)]
pub struct TestEngine {
    pub sent: AtomicU64,
    pub was_reset: AtomicBool,
}

impl TestEngine {
    pub fn set_total_sent(&self, sent: u64) {
        self.sent.store(sent, Ordering::SeqCst);
    }
}

impl SpendHistory for TestEngine {
    fn total_sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

impl WalletEngine for TestEngine {
    type Transaction = Payment;

    fn amount_sent_by_tx(&self, tx: &Payment) -> u64 {
        tx.sent
    }

    fn amount_received_from_tx(&self, tx: &Payment) -> u64 {
        tx.change
    }

    fn sign(&self, tx: &mut Payment, key: &SigningKey) -> bool {
        tx.signed_with = Some(key.secret_bytes().to_vec());
        true
    }

    fn reset_for_wipe(&self) {
        self.was_reset.store(true, Ordering::SeqCst);
    }
}

/// Biometric prompt that always answers the same way.
pub struct FixedPrompt(pub Result<(), PromptError>);

impl BiometricPrompt for FixedPrompt {
    fn can_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, _reason: &str) -> Result<(), PromptError> {
        self.0
    }
}

pub struct Harness {
    pub wallet: Wallet<TestEngine>,
    pub engine: Arc<TestEngine>,
    pub store: Arc<MemorySecretStore>,
    pub settings: Arc<MemorySettings>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(AuthPolicy::default(), Vec::new())
}

pub fn harness_with(policy: AuthPolicy, database_files: Vec<PathBuf>) -> Harness {
    let engine = Arc::new(TestEngine::default());
    let store = Arc::new(MemorySecretStore::new());
    let settings = Arc::new(MemorySettings::new());
    let clock = Arc::new(ManualClock::new(START));

    let options = WalletOptions {
        policy,
        database_files,
        clock: clock.clone(),
        biometrics: Arc::new(FixedPrompt(Ok(()))),
        ..WalletOptions::default()
    };
    let wallet = Wallet::open(engine.clone(), store.clone(), settings.clone(), options)
        .expect("open wallet");

    Harness {
        wallet,
        engine,
        store,
        settings,
        clock,
    }
}

/// Recover `PHRASE` and set PIN 123456.
pub fn provisioned() -> Harness {
    let h = harness();
    assert!(h.wallet.recover_from_phrase(PHRASE));
    assert!(h.wallet.force_set_pin("123456", None));
    h
}

/// Every event published so far.
pub fn drain(rx: &mut broadcast::Receiver<AuthEvent>) -> Vec<AuthEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
