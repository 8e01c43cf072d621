//! Secret store: encrypted, access-controlled key/value persistence
//!
//! Holds the mnemonic, master public key, PIN, failure counters and the
//! biometric spend ceiling. The [`SecretStore`] trait replaces a process-wide
//! keychain singleton so every component receives its store explicitly.
//!
//! Backends:
//! - [`MemorySecretStore`]: in-process, for tests and ephemeral sessions
//! - [`crate::sqlite::SqliteSecretStore`]: AES-256-GCM sealed rows in SQLite

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use zeroize::Zeroizing;

/// Secret bytes returned from a store. Zeroized on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Item names in the secret store namespace.
pub mod key {
    /// Recovery phrase (authenticated tier)
    pub const MNEMONIC: &str = "mnemonic";
    /// Wallet creation time, seconds since epoch (u64 LE)
    pub const CREATION_TIME: &str = "creationtime";
    /// Serialized BIP-32 extended public key of the wallet account
    pub const MASTER_PUB_KEY: &str = "masterpubkey";
    /// Absolute biometric spend threshold (u64 LE)
    pub const SPEND_LIMIT: &str = "spendlimit";
    pub const PIN: &str = "pin";
    pub const PIN_FAIL_COUNT: &str = "pinfailcount";
    pub const PIN_FAIL_TIME: &str = "pinfailheight";
    /// Cached API authentication private key
    pub const API_AUTH_KEY: &str = "authprivkey";
    /// Cached Ethereum signing key
    pub const ETH_PRIV_KEY: &str = "ethprivkey";
    /// Opaque account blob for the wallet backend
    pub const USER_ACCOUNT: &str = "useraccount";
    /// Deprecated pre-authenticated-tier seed marker, migrated on open
    pub const LEGACY_SEED: &str = "seed";

    /// Every item removed by a wipe. The mnemonic goes last so a partial
    /// wipe never strands derived state without its source.
    pub const ALL: &[&str] = &[
        API_AUTH_KEY,
        SPEND_LIMIT,
        CREATION_TIME,
        PIN_FAIL_TIME,
        PIN_FAIL_COUNT,
        PIN,
        MASTER_PUB_KEY,
        LEGACY_SEED,
        ETH_PRIV_KEY,
        USER_ACCOUNT,
        MNEMONIC,
    ];
}

/// Storage accessibility tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessibility {
    /// Readable any time after the device has been unlocked once.
    AfterUnlock,
    /// Readable only while the device is unlocked and the user authenticated.
    RequiresAuthenticatedUnlock,
}

impl Accessibility {
    pub fn as_i64(self) -> i64 {
        match self {
            Accessibility::AfterUnlock => 0,
            Accessibility::RequiresAuthenticatedUnlock => 1,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        if v == 1 {
            Accessibility::RequiresAuthenticatedUnlock
        } else {
            Accessibility::AfterUnlock
        }
    }
}

/// Secret store failures. Callers convert these into `false`/`None` at the
/// public boundary; nothing in this crate panics on them.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("secret store not available: {0}")]
    Unavailable(String),

    #[error("item requires an unlocked, authenticated device")]
    InteractionNotAllowed,

    #[error("stored item is corrupt: {0}")]
    Corrupt(String),

    #[error("secret store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Numeric status in the style of an OS credential-store result code.
    pub fn status(&self) -> i32 {
        match self {
            StoreError::Unavailable(_) => -25291,
            StoreError::InteractionNotAllowed => -25308,
            StoreError::Corrupt(_) => -26275,
            StoreError::Backend(_) => -25300,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Encrypted key/value persistence for secret items.
///
/// Each call is atomic on its own. Multi-step sequences (read, then
/// increment, then write) need a lock held by the caller.
pub trait SecretStore: Send + Sync {
    /// Read an item. `Ok(None)` when absent.
    fn get(&self, key: &str) -> Result<Option<SecretBytes>, StoreError>;

    /// Write an item, or delete it when `value` is `None`.
    fn set(
        &self,
        key: &str,
        value: Option<&[u8]>,
        accessibility: Accessibility,
    ) -> Result<(), StoreError>;

    /// Whether an item is present. Does not require the authenticated tier.
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.set(key, None, Accessibility::AfterUnlock)
    }
}

/// Typed accessors over raw secret bytes.
pub trait SecretStoreExt: SecretStore {
    /// Read a little-endian u64. A value of the wrong width reads as absent.
    fn get_u64(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.get(key)?.and_then(|bytes| {
            let arr: [u8; 8] = bytes.as_slice().try_into().ok()?;
            Some(u64::from_le_bytes(arr))
        }))
    }

    fn set_u64(&self, key: &str, value: Option<u64>) -> Result<(), StoreError> {
        let bytes = value.map(u64::to_le_bytes);
        self.set(key, bytes.as_ref().map(|b| &b[..]), Accessibility::AfterUnlock)
    }

    fn get_string(&self, key: &str) -> Result<Option<Zeroizing<String>>, StoreError> {
        match self.get(key)? {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(&bytes)
                .map(|s| Some(Zeroizing::new(s.to_owned())))
                .map_err(|_| StoreError::Corrupt(format!("{} is not UTF-8", key))),
        }
    }

    fn set_string(
        &self,
        key: &str,
        value: Option<&str>,
        accessibility: Accessibility,
    ) -> Result<(), StoreError> {
        self.set(key, value.map(str::as_bytes), accessibility)
    }
}

impl<T: SecretStore + ?Sized> SecretStoreExt for T {}

struct MemoryItem {
    accessibility: Accessibility,
    value: SecretBytes,
}

/// In-memory secret store.
///
/// Encrypted in name only. Simulates the device lock state and can be told
/// to fail deletes or every call, which is how the wipe and error paths are
/// exercised in tests.
pub struct MemorySecretStore {
    items: Mutex<HashMap<String, MemoryItem>>,
    device_unlocked: AtomicBool,
    unavailable: AtomicBool,
    failing_deletes: Mutex<HashSet<String>>,
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            device_unlocked: AtomicBool::new(true),
            unavailable: AtomicBool::new(false),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    /// Simulate the device being locked (authenticated tier unreadable).
    pub fn set_device_unlocked(&self, unlocked: bool) {
        self.device_unlocked.store(unlocked, Ordering::SeqCst);
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make deleting `key` fail until cleared.
    pub fn fail_deletes_of(&self, key: &str) {
        self.failing_deletes.lock().insert(key.to_string());
    }

    pub fn clear_delete_failures(&self) {
        self.failing_deletes.lock().clear();
    }

    /// Names of every stored item.
    pub fn keys(&self) -> Vec<String> {
        self.items.lock().keys().cloned().collect()
    }

    pub fn accessibility_of(&self, key: &str) -> Option<Accessibility> {
        self.items.lock().get(key).map(|item| item.accessibility)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<SecretBytes>, StoreError> {
        self.check_available()?;
        let items = self.items.lock();
        match items.get(key) {
            None => Ok(None),
            Some(item) => {
                if item.accessibility == Accessibility::RequiresAuthenticatedUnlock
                    && !self.device_unlocked.load(Ordering::SeqCst)
                {
                    return Err(StoreError::InteractionNotAllowed);
                }
                Ok(Some(item.value.clone()))
            }
        }
    }

    fn set(
        &self,
        key: &str,
        value: Option<&[u8]>,
        accessibility: Accessibility,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut items = self.items.lock();
        match value {
            None => {
                if self.failing_deletes.lock().contains(key) {
                    return Err(StoreError::Backend(format!("delete of {} refused", key)));
                }
                items.remove(key);
            }
            Some(bytes) => {
                items.insert(
                    key.to_string(),
                    MemoryItem {
                        accessibility,
                        value: Zeroizing::new(bytes.to_vec()),
                    },
                );
            }
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.items.lock().contains_key(key))
    }
}
