//! Wallet facade
//!
//! Wires the store, gate, spending policy, biometric authorizer and wipe
//! coordinator around one wallet engine, and exposes the boolean/optional
//! surface the UI layer calls. Failures are logged here and collapse to
//! `false`/`None`.

use crate::biometric::{
    BiometricAuthorizer, BiometricPrompt, BiometricResult, UnavailableBiometrics,
};
use crate::clock::{Clock, SystemClock};
use crate::engine::WalletEngine;
use crate::error::{AuthError, WipeError};
use crate::events::{AuthEvent, EventBus};
use crate::gate::{AuthPolicy, AuthenticationGate, PinOutcome};
use crate::keys::SigningKey;
use crate::limit::SpendingLimitPolicy;
use crate::seed::{SeedError, SeedManager};
use crate::settings::Settings;
use crate::store::SecretStore;
use crate::wipe::{ForceWipe, WipeAuthorization, WipeCoordinator};
use bitcoin::Network;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use zeroize::Zeroizing;

/// Construction parameters for [`Wallet`].
pub struct WalletOptions {
    pub network: Network,
    pub policy: AuthPolicy,
    /// Engine databases erased by a wipe.
    pub database_files: Vec<PathBuf>,
    pub clock: Arc<dyn Clock>,
    pub biometrics: Arc<dyn BiometricPrompt>,
    pub events: EventBus,
}

impl Default for WalletOptions {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            policy: AuthPolicy::default(),
            database_files: Vec::new(),
            clock: Arc::new(SystemClock),
            biometrics: Arc::new(UnavailableBiometrics),
            events: EventBus::default(),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    wipe_incomplete: bool,
}

pub struct Wallet<E: WalletEngine + 'static> {
    engine: Arc<E>,
    seeds: Arc<SeedManager>,
    limit: Arc<SpendingLimitPolicy>,
    gate: Arc<AuthenticationGate>,
    biometrics: BiometricAuthorizer,
    wipe: WipeCoordinator,
    events: EventBus,
    /// Provisioning and wiping never overlap.
    lifecycle: Mutex<Lifecycle>,
}

impl<E: WalletEngine + 'static> Wallet<E> {
    /// Assemble a wallet and upgrade a legacy secret layout if one is found.
    /// A failed upgrade is logged and attempted again on the next open.
    pub fn open(
        engine: Arc<E>,
        store: Arc<dyn SecretStore>,
        settings: Arc<dyn Settings>,
        options: WalletOptions,
    ) -> Result<Self, SeedError> {
        let WalletOptions {
            network,
            policy,
            database_files,
            clock,
            biometrics,
            events,
        } = options;

        let seeds = Arc::new(SeedManager::new(store.clone(), clock.clone(), network));
        let limit = Arc::new(SpendingLimitPolicy::new(store.clone(), settings.clone()));
        let gate = Arc::new(AuthenticationGate::new(
            store.clone(),
            settings.clone(),
            clock,
            limit.clone(),
            engine.clone(),
            events.clone(),
            policy,
        ));
        let biometrics =
            BiometricAuthorizer::new(biometrics, limit.clone(), seeds.clone(), events.clone());
        let wipe = WipeCoordinator::new(
            store,
            settings,
            gate.clone(),
            events.clone(),
            database_files,
        );

        // retried on every open until the secret store lets it through
        if let Err(e) = seeds.migrate_legacy() {
            log::warn!("legacy seed upgrade deferred: {}", e);
        }

        Ok(Self {
            engine,
            seeds,
            limit,
            gate,
            biometrics,
            wipe,
            events,
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn gate(&self) -> &AuthenticationGate {
        &self.gate
    }

    pub fn seeds(&self) -> &SeedManager {
        &self.seeds
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// True if the secret store is readable and holds no wallet.
    pub fn no_wallet(&self) -> bool {
        self.seeds.no_wallet()
    }

    // ------------------------------------------------------------------
    // PIN
    // ------------------------------------------------------------------

    pub fn authenticate_pin(&self, pin: &str) -> bool {
        match self.try_authenticate_pin(pin) {
            Ok(outcome) => outcome.is_authenticated(),
            Err(e) => {
                log::info!("PIN authentication refused: {}", e);
                false
            }
        }
    }

    /// Like [`Wallet::authenticate_pin`] but reports why. Reaching the
    /// failure ceiling wipes the wallet before returning.
    pub fn try_authenticate_pin(&self, pin: &str) -> Result<PinOutcome, AuthError> {
        let outcome = self.gate.authenticate(pin)?;
        if outcome == PinOutcome::WipeThresholdReached {
            self.wipe_with(ForceWipe::new());
        }
        Ok(outcome)
    }

    /// Replace the PIN after verifying the current one.
    pub fn change_pin(&self, current: &str, new_pin: &str) -> bool {
        match self.try_authenticate_pin(current) {
            Ok(PinOutcome::Authenticated) => match self.gate.store_pin(new_pin) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("could not store new PIN: {}", e);
                    false
                }
            },
            Ok(_) => false,
            Err(e) => {
                log::info!("PIN change refused: {}", e);
                false
            }
        }
    }

    /// Set the PIN without knowing the current one.
    ///
    /// With a recovery phrase, the phrase must match the wallet. Without
    /// one, this only works when no PIN exists yet; if one does, `new_pin`
    /// is simply checked against it.
    pub fn force_set_pin(&self, new_pin: &str, phrase: Option<&str>) -> bool {
        match phrase {
            Some(phrase) => {
                if !self.seeds.authenticate(phrase) {
                    return false;
                }
            }
            None => match self.gate.has_pin() {
                Ok(true) => return self.authenticate_pin(new_pin),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("cannot check for an existing PIN: {}", e);
                    return false;
                }
            },
        }

        match self.gate.store_pin(new_pin) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not set PIN: {}", e);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Phrase
    // ------------------------------------------------------------------

    pub fn authenticate_phrase(&self, phrase: &str) -> bool {
        self.seeds.authenticate(phrase)
    }

    pub fn generate_seed_phrase(&self) -> Option<Zeroizing<String>> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.wipe_incomplete {
            log::error!("previous wipe did not finish, refusing to create a wallet");
            return None;
        }
        self.seeds.generate()
    }

    pub fn recover_from_phrase(&self, phrase: &str) -> bool {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.wipe_incomplete {
            log::error!("previous wipe did not finish, refusing to recover a wallet");
            return false;
        }
        self.seeds.recover(phrase)
    }

    /// The recovery phrase, for display after PIN entry.
    pub fn seed_phrase(&self, pin: &str) -> Option<Zeroizing<String>> {
        if !self.authenticate_pin(pin) {
            return None;
        }
        match self.seeds.seed_phrase() {
            Ok(phrase) => Some(phrase),
            Err(e) => {
                log::warn!("cannot read recovery phrase: {}", e);
                None
            }
        }
    }

    pub fn api_auth_key(&self) -> Option<SigningKey> {
        self.seeds.api_auth_key()
    }

    pub fn bitid_key(&self, uri: &str, index: u32) -> Option<SigningKey> {
        self.seeds.bitid_key(uri, index)
    }

    // ------------------------------------------------------------------
    // Spending
    // ------------------------------------------------------------------

    pub fn set_spending_limit(&self, delta: u64) -> bool {
        match self.limit.set_limit(delta, self.engine.total_sent()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not set spending limit: {}", e);
                false
            }
        }
    }

    /// The configured delta, 0 if none.
    pub fn spending_limit(&self) -> u64 {
        match self.limit.display_delta() {
            Ok(delta) => delta.unwrap_or(0),
            Err(e) => {
                log::warn!("cannot read spending limit: {}", e);
                0
            }
        }
    }

    pub fn can_use_biometrics(&self, tx: &E::Transaction) -> bool {
        self.biometrics
            .can_use_biometrics(self.engine.net_spend(tx), self.engine.total_sent())
    }

    pub fn sign_transaction_with_pin(&self, tx: &mut E::Transaction, pin: &str) -> bool {
        if !self.authenticate_pin(pin) {
            return false;
        }
        match self.seeds.chain_key(self.engine.profile()) {
            Ok(key) => self.engine.sign(tx, &key),
            Err(e) => {
                log::warn!("signing key unavailable: {}", e);
                false
            }
        }
    }

    /// Sign after a biometric prompt. On anything but `Success` the caller
    /// falls back to [`Wallet::sign_transaction_with_pin`].
    pub fn sign_transaction_with_biometrics(
        &self,
        tx: &mut E::Transaction,
        reason: &str,
    ) -> BiometricResult {
        self.biometrics
            .sign_transaction(self.engine.as_ref(), tx, reason)
    }

    // ------------------------------------------------------------------
    // Wipe
    // ------------------------------------------------------------------

    /// Erase the wallet after checking `pin`. `false` means not authorized
    /// or possibly partial.
    pub fn wipe(&self, pin: &str) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let result = self
            .wipe
            .try_wipe(self.engine.as_ref(), WipeAuthorization::pin(pin));
        Self::record_wipe(&mut lifecycle, result)
    }

    /// Token for unlinking this device, issued when `phrase` matches.
    pub fn unlink_token(&self, phrase: &str) -> Option<ForceWipe> {
        if self.seeds.authenticate(phrase) {
            Some(ForceWipe::new())
        } else {
            None
        }
    }

    /// Erase the wallet with a token from [`Wallet::unlink_token`].
    pub fn unlink(&self, token: ForceWipe) -> bool {
        self.wipe_with(token)
    }

    fn wipe_with(&self, token: ForceWipe) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let result = self
            .wipe
            .try_wipe(self.engine.as_ref(), WipeAuthorization::Force(token));
        Self::record_wipe(&mut lifecycle, result)
    }

    fn record_wipe(lifecycle: &mut Lifecycle, result: Result<(), WipeError>) -> bool {
        match result {
            Ok(()) => {
                lifecycle.wipe_incomplete = false;
                true
            }
            Err(WipeError::Incomplete(failed)) => {
                log::error!("wipe incomplete: {}", failed.join(", "));
                lifecycle.wipe_incomplete = true;
                false
            }
            Err(e) => {
                log::warn!("wipe refused: {}", e);
                false
            }
        }
    }

    /// Whether a wipe was left unfinished. Provisioning stays blocked until
    /// a later wipe succeeds.
    pub fn wipe_incomplete(&self) -> bool {
        self.lifecycle.lock().wipe_incomplete
    }

    /// Remove the engine databases, keeping the wallet's secrets.
    pub fn delete_wallet_database(&self, pin: &str) -> bool {
        let _lifecycle = self.lifecycle.lock();
        self.wipe
            .delete_wallet_database(self.engine.as_ref(), WipeAuthorization::pin(pin))
    }
}
