//! PIN authentication with progressive lockout
//!
//! Every attempt is a read-modify-write of the persisted failure counter
//! and failure time. One mutex serializes the whole sequence, so a PIN
//! typed on one thread racing a biometric fallback on another can neither
//! lose nor double an increment.
//!
//! # Counting
//!
//! Only *unique* wrong PINs count. A PIN that already failed in this
//! session is remembered and repeating it changes nothing, so retyping the
//! same guess cannot push the lockout further out, and it cannot buy a new
//! guess either.
//!
//! # Lockout
//!
//! From the third unique failure on, attempts are refused outright until
//! `fail_time + 60 * 6^(fail_count - 3)` seconds: 1 minute, 6 minutes,
//! 36 minutes, 3.6 hours, 21.6 hours. The eighth unique failure reports
//! [`PinOutcome::WipeThresholdReached`]; the wallet facade erases the
//! wallet in response.

use crate::clock::Clock;
use crate::engine::SpendHistory;
use crate::error::AuthError;
use crate::events::{AuthEvent, EventBus};
use crate::limit::SpendingLimitPolicy;
use crate::settings::{Settings, LOCK_TIMEOUT, PIN_UNLOCK_TIME};
use crate::store::{key, Accessibility, SecretStore, SecretStoreExt};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Lockout and wipe parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Unique failures before lockout windows begin.
    pub lockout_threshold: u64,
    /// Unique failures that end the wallet.
    pub max_failures: u64,
    pub lockout_base_secs: u64,
    pub lockout_multiplier: u64,
    /// A PIN unlock is required if none happened within this interval,
    /// even when biometrics are enabled.
    pub pin_login_interval_secs: u64,
    pub default_pin_length: usize,
    pub default_lock_timeout_secs: u64,
    /// Shortest PIN accepted when setting one.
    pub min_pin_length: usize,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            lockout_threshold: 3,
            max_failures: 8,
            lockout_base_secs: 60,
            lockout_multiplier: 6,
            pin_login_interval_secs: 7 * 24 * 60 * 60,
            default_pin_length: 6,
            default_lock_timeout_secs: 60,
            min_pin_length: 4,
        }
    }
}

impl AuthPolicy {
    /// Length of the lockout window after `fail_count` unique failures.
    /// Zero below the threshold.
    pub fn lockout_secs(&self, fail_count: u64) -> u64 {
        if fail_count < self.lockout_threshold {
            return 0;
        }
        let exponent = u32::try_from(fail_count - self.lockout_threshold).unwrap_or(u32::MAX);
        self.lockout_base_secs
            .saturating_mul(self.lockout_multiplier.saturating_pow(exponent))
    }

    /// End of the lockout window, or 0 when there is none.
    pub fn disabled_until(&self, fail_count: u64, fail_time: u64) -> u64 {
        if fail_count < self.lockout_threshold {
            return 0;
        }
        fail_time.saturating_add(self.lockout_secs(fail_count))
    }
}

/// Result of a PIN attempt that was allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Authenticated,
    Rejected { attempts_remaining: u64 },
    /// This attempt was the last allowed unique failure.
    WipeThresholdReached,
}

impl PinOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, PinOutcome::Authenticated)
    }
}

/// Failed PINs seen since the last successful unlock.
#[derive(Default)]
struct Session {
    failed_pins: Vec<Zeroizing<String>>,
}

impl Session {
    fn has_failed(&self, pin: &str) -> bool {
        self.failed_pins.iter().any(|p| p.as_str() == pin)
    }
}

pub struct AuthenticationGate {
    store: Arc<dyn SecretStore>,
    settings: Arc<dyn Settings>,
    clock: Arc<dyn Clock>,
    limit: Arc<SpendingLimitPolicy>,
    history: Arc<dyn SpendHistory>,
    events: EventBus,
    policy: AuthPolicy,
    session: Mutex<Session>,
}

impl AuthenticationGate {
    pub fn new(
        store: Arc<dyn SecretStore>,
        settings: Arc<dyn Settings>,
        clock: Arc<dyn Clock>,
        limit: Arc<SpendingLimitPolicy>,
        history: Arc<dyn SpendHistory>,
        events: EventBus,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            store,
            settings,
            clock,
            limit,
            history,
            events,
            policy,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Check `pin` against the stored PIN.
    ///
    /// A lockout is reported as [`AuthError::LockedOut`] without touching
    /// any counter. With no PIN configured the attempt is refused with
    /// [`AuthError::NoPinSet`] and not counted.
    pub fn authenticate(&self, pin: &str) -> Result<PinOutcome, AuthError> {
        let mut session = self.session.lock();
        let now = self.clock.now();

        let stored = self.store.get_string(key::PIN)?.ok_or(AuthError::NoPinSet)?;
        let mut fail_count = self.store.get_u64(key::PIN_FAIL_COUNT)?.unwrap_or(0);

        if fail_count >= self.policy.lockout_threshold {
            let fail_time = self.store.get_u64(key::PIN_FAIL_TIME)?.unwrap_or(0);
            let until = self.policy.disabled_until(fail_count, fail_time);
            if now < until {
                log::info!("PIN attempt refused, locked for {}s", until - now);
                self.events.emit(AuthEvent::LockedOut { until });
                return Err(AuthError::LockedOut { until });
            }
        }

        // count unique attempts before checking success
        let repeat = session.has_failed(pin);
        if !repeat {
            fail_count = fail_count.saturating_add(1);
            self.store.set_u64(key::PIN_FAIL_COUNT, Some(fail_count))?;
        }

        if pin_matches(pin, &stored) {
            self.succeed(&mut session, now)?;
            return Ok(PinOutcome::Authenticated);
        }

        if !repeat {
            session.failed_pins.push(Zeroizing::new(pin.to_string()));

            if fail_count >= self.policy.max_failures {
                log::error!("{} unique PIN failures, wallet will be wiped", fail_count);
                return Ok(PinOutcome::WipeThresholdReached);
            }

            let fail_time = self.store.get_u64(key::PIN_FAIL_TIME)?.unwrap_or(0);
            if now > fail_time {
                self.store.set_u64(key::PIN_FAIL_TIME, Some(now))?;
            }
        }

        let attempts_remaining = self.policy.max_failures.saturating_sub(fail_count);
        log::info!("wrong PIN, {} attempts remaining", attempts_remaining);
        self.events.emit(AuthEvent::PinFailed { attempts_remaining });
        if !repeat && fail_count >= self.policy.lockout_threshold {
            let until = self.policy.disabled_until(fail_count, now);
            self.events.emit(AuthEvent::LockedOut { until });
        }

        Ok(PinOutcome::Rejected { attempts_remaining })
    }

    fn succeed(&self, session: &mut Session, now: u64) -> Result<(), AuthError> {
        session.failed_pins.clear();
        self.store.set_u64(key::PIN_FAIL_TIME, Some(0))?;
        self.store.set_u64(key::PIN_FAIL_COUNT, Some(0))?;

        // the PIN is verified once the counter is reset; the rest is bookkeeping
        if let Err(e) = self.settings.set_u64(PIN_UNLOCK_TIME, now) {
            log::warn!("cannot record unlock time: {}", e);
        }
        if let Err(e) = self.limit.refresh_after_unlock(self.history.total_sent()) {
            log::warn!("cannot refresh spending limit: {}", e);
        }

        log::info!("PIN verified");
        self.events.emit(AuthEvent::Authenticated);
        Ok(())
    }

    /// Store `pin` as the wallet PIN and treat it as a successful unlock.
    ///
    /// Callers are responsible for having verified the old PIN or the
    /// recovery phrase.
    pub fn store_pin(&self, pin: &str) -> Result<(), AuthError> {
        if pin.chars().count() < self.policy.min_pin_length {
            return Err(AuthError::PinTooShort {
                min: self.policy.min_pin_length,
            });
        }
        let mut session = self.session.lock();
        self.store
            .set_string(key::PIN, Some(pin), Accessibility::AfterUnlock)?;
        let now = self.clock.now();
        self.succeed(&mut session, now)
    }

    pub fn has_pin(&self) -> Result<bool, AuthError> {
        Ok(self.store.exists(key::PIN)?)
    }

    pub fn fail_count(&self) -> Result<u64, AuthError> {
        Ok(self.store.get_u64(key::PIN_FAIL_COUNT)?.unwrap_or(0))
    }

    /// Unique failures left before the wallet is wiped.
    pub fn pin_attempts_remaining(&self) -> Result<u64, AuthError> {
        Ok(self.policy.max_failures.saturating_sub(self.fail_count()?))
    }

    /// Seconds since epoch until which PIN entry is refused; 0 if not locked.
    pub fn wallet_disabled_until(&self) -> Result<u64, AuthError> {
        let fail_count = self.fail_count()?;
        if fail_count < self.policy.lockout_threshold {
            return Ok(0);
        }
        let fail_time = self.store.get_u64(key::PIN_FAIL_TIME)?.unwrap_or(0);
        Ok(self.policy.disabled_until(fail_count, fail_time))
    }

    /// Remaining lockout in seconds, for a countdown. Unreadable state
    /// reads as no lockout; the attempt itself will still be checked.
    pub fn lockout_remaining(&self) -> u64 {
        match self.wallet_disabled_until() {
            Ok(until) => until.saturating_sub(self.clock.now()),
            Err(e) => {
                log::warn!("cannot read lockout state: {}", e);
                0
            }
        }
    }

    pub fn is_wallet_disabled(&self) -> bool {
        self.lockout_remaining() > 0
    }

    /// Length of the stored PIN, or the default for a fresh wallet.
    pub fn pin_length(&self) -> usize {
        match self.store.get_string(key::PIN) {
            Ok(Some(pin)) => pin.chars().count(),
            Ok(None) => self.policy.default_pin_length,
            Err(e) => {
                log::warn!("pin keychain error: {}", e);
                self.policy.default_pin_length
            }
        }
    }

    /// True when no PIN unlock happened within the login interval.
    pub fn pin_login_required(&self) -> bool {
        let last = match self.settings.get_u64(PIN_UNLOCK_TIME) {
            Ok(t) => t.unwrap_or(0),
            Err(e) => {
                log::warn!("cannot read last unlock time: {}", e);
                0
            }
        };
        self.clock.now().saturating_sub(last) > self.policy.pin_login_interval_secs
    }

    pub fn lock_timeout(&self) -> u64 {
        match self.settings.get_u64(LOCK_TIMEOUT) {
            Ok(Some(secs)) => secs,
            Ok(None) => self.policy.default_lock_timeout_secs,
            Err(e) => {
                log::warn!("cannot read lock timeout: {}", e);
                self.policy.default_lock_timeout_secs
            }
        }
    }

    pub fn set_lock_timeout(&self, secs: u64) -> Result<(), AuthError> {
        Ok(self.settings.set_u64(LOCK_TIMEOUT, secs)?)
    }

    /// Whether a session idle since `last_active` must unlock again.
    pub fn requires_reauthentication(&self, last_active: u64) -> bool {
        self.pin_login_required()
            || self.clock.now().saturating_sub(last_active) >= self.lock_timeout()
    }

    /// Forget the failed PINs of this session.
    pub fn reset_session(&self) {
        self.session.lock().failed_pins.clear();
    }
}

/// Compare fixed-width digests so the time taken does not depend on where,
/// or whether, the lengths differ.
fn pin_matches(candidate: &str, stored: &str) -> bool {
    let a = Sha256::digest(candidate.as_bytes());
    let b = Sha256::digest(stored.as_bytes());
    bool::from(a.as_slice().ct_eq(b.as_slice()))
}
