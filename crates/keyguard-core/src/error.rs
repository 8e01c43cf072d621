//! Errors of the authentication flow
//!
//! Storage, key and seed errors live next to their modules; these are the
//! outcomes a caller reacts to when unlocking, signing or wiping.

use crate::settings::SettingsError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Wrong PIN or phrase. Retry allowed, subject to lockout.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("PIN entry locked until {until}")]
    LockedOut { until: u64 },

    /// The unique-failure ceiling was reached; the wallet is being erased.
    #[error("maximum PIN failures reached")]
    WipeThresholdReached,

    #[error("no PIN is configured")]
    NoPinSet,

    #[error("PIN must be at least {min} digits")]
    PinTooShort { min: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BiometricError {
    #[error("biometric prompt cancelled")]
    Cancelled,
    #[error("user chose to enter the PIN instead")]
    Fallback,
    #[error("biometrics unavailable on this device")]
    Unavailable,
    #[error("biometric authentication failed")]
    Failure,
    #[error("amount exceeds the biometric spending limit")]
    SpendLimitExceeded,
}

#[derive(Error, Debug)]
pub enum WipeError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("wipe incomplete, could not remove: {}", .0.join(", "))]
    Incomplete(Vec<String>),
}
