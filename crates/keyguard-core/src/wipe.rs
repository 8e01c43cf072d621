//! Irreversible erasure of the wallet
//!
//! A wipe runs every step even when an earlier one fails, so as much as
//! possible is gone, and then reports whether anything was left behind.
//! An incomplete wipe must not be followed by provisioning a new wallet.

use crate::engine::WalletEngine;
use crate::error::{AuthError, WipeError};
use crate::events::{AuthEvent, EventBus};
use crate::gate::{AuthenticationGate, PinOutcome};
use crate::settings::Settings;
use crate::store::{key, SecretStore};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Permission to wipe without a PIN.
///
/// Only this crate mints one: after the last allowed PIN failure, and for
/// unlinking a device once its recovery phrase has been verified.
#[derive(Debug)]
pub struct ForceWipe {
    _private: (),
}

impl ForceWipe {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

pub enum WipeAuthorization {
    Pin(Zeroizing<String>),
    Force(ForceWipe),
}

impl WipeAuthorization {
    pub fn pin(pin: &str) -> Self {
        WipeAuthorization::Pin(Zeroizing::new(pin.to_string()))
    }
}

impl std::fmt::Debug for WipeAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WipeAuthorization::Pin(_) => f.write_str("Pin(..)"),
            WipeAuthorization::Force(_) => f.write_str("Force"),
        }
    }
}

pub struct WipeCoordinator {
    store: Arc<dyn SecretStore>,
    settings: Arc<dyn Settings>,
    gate: Arc<AuthenticationGate>,
    events: EventBus,
    database_files: Vec<PathBuf>,
}

impl WipeCoordinator {
    /// `database_files` are the wallet engine's on-disk databases, removed
    /// on wipe along with their SQLite `-wal`/`-shm` companions.
    pub fn new(
        store: Arc<dyn SecretStore>,
        settings: Arc<dyn Settings>,
        gate: Arc<AuthenticationGate>,
        events: EventBus,
        database_files: Vec<PathBuf>,
    ) -> Self {
        Self {
            store,
            settings,
            gate,
            events,
            database_files,
        }
    }

    fn authorize(&self, auth: WipeAuthorization) -> Result<(), WipeError> {
        match auth {
            WipeAuthorization::Force(_) => Ok(()),
            WipeAuthorization::Pin(pin) => match self.gate.authenticate(&pin)? {
                PinOutcome::Authenticated | PinOutcome::WipeThresholdReached => Ok(()),
                PinOutcome::Rejected { .. } => Err(AuthError::AuthenticationFailure.into()),
            },
        }
    }

    /// Erase the wallet. `false` means the wipe may be partial.
    pub fn wipe<E: WalletEngine>(&self, engine: &E, auth: WipeAuthorization) -> bool {
        match self.try_wipe(engine, auth) {
            Ok(()) => true,
            Err(e) => {
                log::error!("wipe failed: {}", e);
                false
            }
        }
    }

    pub fn try_wipe<E: WalletEngine>(
        &self,
        engine: &E,
        auth: WipeAuthorization,
    ) -> Result<(), WipeError> {
        self.authorize(auth)?;
        self.erase(engine)
    }

    /// Run the erasure steps. Authorization is the caller's job.
    pub(crate) fn erase<E: WalletEngine>(&self, engine: &E) -> Result<(), WipeError> {
        log::warn!("wiping wallet");
        self.events.emit(AuthEvent::WipeStarted);

        engine.reset_for_wipe();

        let mut failed = self.remove_databases();

        if let Err(e) = self.settings.clear() {
            log::error!("could not clear settings: {}", e);
            failed.push("settings".to_string());
        }

        for name in key::ALL {
            if let Err(e) = self.store.delete(name) {
                log::error!("could not delete {} (status {}): {}", name, e.status(), e);
                failed.push((*name).to_string());
            }
        }

        if failed.is_empty() {
            self.gate.reset_session();
            log::info!("wallet wiped");
            self.events.emit(AuthEvent::WalletWiped);
            Ok(())
        } else {
            self.events.emit(AuthEvent::WipeIncomplete {
                failed: failed.clone(),
            });
            Err(WipeError::Incomplete(failed))
        }
    }

    /// Remove the wallet databases and settings but keep every secret, so
    /// the engine can resync from the same phrase.
    pub fn delete_wallet_database<E: WalletEngine>(
        &self,
        engine: &E,
        auth: WipeAuthorization,
    ) -> bool {
        if let Err(e) = self.authorize(auth) {
            log::warn!("database deletion refused: {}", e);
            return false;
        }

        engine.reset_for_wipe();
        let mut failed = self.remove_databases();
        if let Err(e) = self.settings.clear() {
            log::error!("could not clear settings: {}", e);
            failed.push("settings".to_string());
        }

        if failed.is_empty() {
            self.events.emit(AuthEvent::WalletDatabaseDeleted);
            true
        } else {
            false
        }
    }

    fn remove_databases(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for path in &self.database_files {
            for file in sqlite_files(path) {
                if let Err(e) = remove_if_present(&file) {
                    log::error!("could not remove {}: {}", file.display(), e);
                    failed.push(file.display().to_string());
                }
            }
        }
        failed
    }
}

fn sqlite_files(path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
