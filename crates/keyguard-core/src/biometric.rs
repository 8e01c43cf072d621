//! Biometric approval of small spends
//!
//! Face or fingerprint unlock may stand in for the PIN as long as the
//! transaction keeps cumulative outflow under the spending ceiling. The
//! platform prompt sits behind [`BiometricPrompt`]; a cancel or an explicit
//! "enter PIN" is reported back so the caller can fall back to the
//! [`crate::gate::AuthenticationGate`].

use crate::engine::WalletEngine;
use crate::error::BiometricError;
use crate::events::{AuthEvent, EventBus};
use crate::limit::SpendingLimitPolicy;
use crate::seed::SeedManager;
use std::sync::Arc;

/// Platform error code for "user cancelled" (LocalAuthentication).
pub const CODE_USER_CANCEL: i32 = -2;
/// Platform error code for "user chose fallback".
pub const CODE_USER_FALLBACK: i32 = -3;
/// Platform error code for "biometry not available".
pub const CODE_NOT_AVAILABLE: i32 = -6;

/// Why a platform prompt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptError {
    UserCancel,
    UserFallback,
    NotAvailable,
    Other(i32),
}

impl PromptError {
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_USER_CANCEL => PromptError::UserCancel,
            CODE_USER_FALLBACK => PromptError::UserFallback,
            CODE_NOT_AVAILABLE => PromptError::NotAvailable,
            other => PromptError::Other(other),
        }
    }
}

/// Platform biometric capability and prompt.
pub trait BiometricPrompt: Send + Sync {
    /// Whether biometrics are present and enrolled.
    fn can_evaluate(&self) -> bool;

    /// Show the prompt and block until the user answers.
    fn evaluate(&self, reason: &str) -> Result<(), PromptError>;
}

/// Platforms without biometrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBiometrics;

impl BiometricPrompt for UnavailableBiometrics {
    fn can_evaluate(&self) -> bool {
        false
    }

    fn evaluate(&self, _reason: &str) -> Result<(), PromptError> {
        Err(PromptError::NotAvailable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricResult {
    Success,
    Cancel,
    Fallback,
    Failure,
}

impl From<Result<(), PromptError>> for BiometricResult {
    fn from(result: Result<(), PromptError>) -> Self {
        match result {
            Ok(()) => BiometricResult::Success,
            Err(PromptError::UserCancel) => BiometricResult::Cancel,
            Err(PromptError::UserFallback) => BiometricResult::Fallback,
            Err(_) => BiometricResult::Failure,
        }
    }
}

impl From<BiometricError> for BiometricResult {
    fn from(e: BiometricError) -> Self {
        match e {
            BiometricError::Cancelled => BiometricResult::Cancel,
            BiometricError::Fallback => BiometricResult::Fallback,
            _ => BiometricResult::Failure,
        }
    }
}

pub struct BiometricAuthorizer {
    prompt: Arc<dyn BiometricPrompt>,
    limit: Arc<SpendingLimitPolicy>,
    seeds: Arc<SeedManager>,
    events: EventBus,
}

impl BiometricAuthorizer {
    pub fn new(
        prompt: Arc<dyn BiometricPrompt>,
        limit: Arc<SpendingLimitPolicy>,
        seeds: Arc<SeedManager>,
        events: EventBus,
    ) -> Self {
        Self {
            prompt,
            limit,
            seeds,
            events,
        }
    }

    /// Whether biometrics may approve a spend of `net_spend` on top of
    /// `cumulative_sent`.
    pub fn can_use_biometrics(&self, net_spend: u64, cumulative_sent: u64) -> bool {
        self.prompt.can_evaluate()
            && self
                .limit
                .can_bypass_with_biometrics(net_spend, cumulative_sent)
    }

    /// Show the platform prompt.
    pub fn authenticate(&self, reason: &str) -> BiometricResult {
        let result = self.prompt.evaluate(reason);
        if let Err(e) = &result {
            log::info!("biometric prompt did not succeed: {:?}", e);
        }
        result.into()
    }

    /// Sign `tx` after a biometric prompt.
    ///
    /// The ceiling is checked again right before prompting, since the
    /// capability check the UI did may be stale by now.
    pub fn sign_transaction<E: WalletEngine>(
        &self,
        engine: &E,
        tx: &mut E::Transaction,
        reason: &str,
    ) -> BiometricResult {
        match self.try_sign_transaction(engine, tx, reason) {
            Ok(()) => BiometricResult::Success,
            Err(e) => e.into(),
        }
    }

    pub fn try_sign_transaction<E: WalletEngine>(
        &self,
        engine: &E,
        tx: &mut E::Transaction,
        reason: &str,
    ) -> Result<(), BiometricError> {
        let net = engine.net_spend(tx);
        if !self
            .limit
            .can_bypass_with_biometrics(net, engine.total_sent())
        {
            log::info!("spend of {} exceeds the biometric limit", net);
            return Err(BiometricError::SpendLimitExceeded);
        }

        self.events.emit(AuthEvent::BiometricPrompting(true));
        let result = self.prompt.evaluate(reason);
        self.events.emit(AuthEvent::BiometricPrompting(false));

        match result {
            Ok(()) => {}
            Err(PromptError::UserCancel) => return Err(BiometricError::Cancelled),
            Err(PromptError::UserFallback) => return Err(BiometricError::Fallback),
            Err(PromptError::NotAvailable) => return Err(BiometricError::Unavailable),
            Err(PromptError::Other(code)) => {
                log::warn!("biometric prompt failed with code {}", code);
                return Err(BiometricError::Failure);
            }
        }

        let key = self.seeds.chain_key(engine.profile()).map_err(|e| {
            log::warn!("signing key unavailable: {}", e);
            BiometricError::Failure
        })?;
        if engine.sign(tx, &key) {
            Ok(())
        } else {
            Err(BiometricError::Failure)
        }
    }
}
