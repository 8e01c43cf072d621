//! Biometric spending ceiling
//!
//! The user picks a delta ("let biometrics approve up to 0.01 BTC"). The
//! policy stores it as an absolute ceiling on the wallet's cumulative sent
//! amount: `threshold = cumulative_sent_at_configuration + delta`. The
//! ceiling lives in the secret store, the delta in plain settings for
//! display.

use crate::settings::{Settings, SettingsError, SPEND_LIMIT_AMOUNT};
use crate::store::{key, SecretStore, SecretStoreExt, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LimitError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

pub struct SpendingLimitPolicy {
    store: Arc<dyn SecretStore>,
    settings: Arc<dyn Settings>,
}

impl SpendingLimitPolicy {
    pub fn new(store: Arc<dyn SecretStore>, settings: Arc<dyn Settings>) -> Self {
        Self { store, settings }
    }

    /// Allow biometric approval for `delta` more than has been sent so far.
    pub fn set_limit(&self, delta: u64, cumulative_sent: u64) -> Result<(), LimitError> {
        let threshold = cumulative_sent.saturating_add(delta);
        self.store.set_u64(key::SPEND_LIMIT, Some(threshold))?;
        self.settings.set_u64(SPEND_LIMIT_AMOUNT, delta)?;
        log::info!("biometric spending limit set, threshold {}", threshold);
        Ok(())
    }

    /// Absolute ceiling on cumulative sent. `None` when never configured.
    pub fn threshold(&self) -> Result<Option<u64>, StoreError> {
        self.store.get_u64(key::SPEND_LIMIT)
    }

    /// The delta the user configured.
    pub fn display_delta(&self) -> Result<Option<u64>, SettingsError> {
        self.settings.get_u64(SPEND_LIMIT_AMOUNT)
    }

    /// Whether a transaction with outflow `net_spend` stays under the
    /// ceiling. An unset ceiling counts as zero; an unreadable one refuses.
    pub fn can_bypass_with_biometrics(&self, net_spend: u64, cumulative_sent: u64) -> bool {
        let threshold = match self.threshold() {
            Ok(t) => t.unwrap_or(0),
            Err(e) => {
                log::warn!("cannot read spending limit: {}", e);
                return false;
            }
        };
        net_spend.saturating_add(cumulative_sent) <= threshold
    }

    /// Re-base the ceiling on the current cumulative sent after a PIN unlock,
    /// so the full delta is available again.
    pub fn refresh_after_unlock(&self, cumulative_sent: u64) -> Result<(), LimitError> {
        match self.display_delta()? {
            Some(delta) if delta > 0 => {
                self.store
                    .set_u64(key::SPEND_LIMIT, Some(cumulative_sent.saturating_add(delta)))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
