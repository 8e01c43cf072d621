//! Non-secret settings
//!
//! Values that are safe to keep outside the secret store: the spend limit as
//! shown to the user, the last PIN unlock time, and the lock timeout.

use crate::sqlite::{config_clear, config_delete, config_get, config_set, open_db};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Spend limit delta as displayed, in base units.
pub const SPEND_LIMIT_AMOUNT: &str = "spend_limit_amount";
/// Seconds since epoch of the last successful PIN unlock.
pub const PIN_UNLOCK_TIME: &str = "pin_unlock_time";
/// Seconds of inactivity before re-authentication is required.
pub const LOCK_TIMEOUT: &str = "lock_timeout";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("setting {key} holds a non-numeric value")]
    NotANumber { key: String },
}

/// Plain key/value settings.
pub trait Settings: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
    fn remove(&self, key: &str) -> Result<(), SettingsError>;
    /// Remove every setting.
    fn clear(&self) -> Result<(), SettingsError>;

    fn get_u64(&self, key: &str) -> Result<Option<u64>, SettingsError> {
        match self.get(key)? {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| SettingsError::NotANumber { key: key.to_string() }),
        }
    }

    fn set_u64(&self, key: &str, value: u64) -> Result<(), SettingsError> {
        self.set(key, &value.to_string())
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Settings for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), SettingsError> {
        self.values.lock().clear();
        Ok(())
    }
}

/// Settings in the `config` table of a SQLite database.
pub struct SqliteSettings {
    conn: Mutex<Connection>,
}

impl SqliteSettings {
    pub fn open(path: &Path) -> Result<Self, SettingsError> {
        Ok(Self {
            conn: Mutex::new(open_db(path)?),
        })
    }
}

impl Settings for SqliteSettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(config_get(&self.conn.lock(), key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        Ok(config_set(&self.conn.lock(), key, value)?)
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        Ok(config_delete(&self.conn.lock(), key)?)
    }

    fn clear(&self) -> Result<(), SettingsError> {
        Ok(config_clear(&self.conn.lock())?)
    }
}
