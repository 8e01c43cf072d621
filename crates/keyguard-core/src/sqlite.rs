//! SQLite persistence
//!
//! One schema serves both the sealed secret store and the plain settings
//! store. A deployment normally keeps them in separate files so the
//! settings database can be inspected without the device secret.

use crate::crypto::{random_salt, CryptoError, KdfParams, StoreKey, SALT_LEN};
use crate::store::{Accessibility, SecretBytes, SecretStore, StoreError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const META_SALT: &str = "kdf_salt";
const META_CHECK: &str = "key_check";
const CHECK_LABEL: &str = "store_meta";
const CHECK_PLAINTEXT: &[u8] = b"keyguard secret store v1";

/// Open (or create) the database at `path` and run migrations.
pub fn open_db(path: &Path) -> SqlResult<Connection> {
    let conn = Connection::open(path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS config (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS secret_items (
            key           TEXT PRIMARY KEY,
            accessibility INTEGER NOT NULL,
            sealed        BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS store_meta (
            key   TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );
        ",
    )?;

    Ok(conn)
}

// ============================================================================
// Config helpers (key-value)
// ============================================================================

pub fn config_get(conn: &Connection, key: &str) -> SqlResult<Option<String>> {
    let mut stmt = conn.prepare_cached("SELECT value FROM config WHERE key = ?1")?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Set a config value (upsert).
pub fn config_set(conn: &Connection, key: &str, value: &str) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn config_delete(conn: &Connection, key: &str) -> SqlResult<()> {
    conn.execute("DELETE FROM config WHERE key = ?1", params![key])?;
    Ok(())
}

pub fn config_clear(conn: &Connection) -> SqlResult<()> {
    conn.execute("DELETE FROM config", [])?;
    Ok(())
}

// ============================================================================
// Store metadata
// ============================================================================

fn meta_get(conn: &Connection, key: &str) -> SqlResult<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT value FROM store_meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn meta_set(conn: &Connection, key: &str, value: &[u8]) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

// ============================================================================
// Sealed secret store
// ============================================================================

/// Secret store backed by SQLite, every value sealed with AES-256-GCM.
///
/// The store key is stretched from a device secret with Argon2id; the salt
/// and a sealed check value live in `store_meta`. Opening with the wrong
/// device secret fails up front instead of on the first read.
///
/// Desktop hosts have no device lock, so the authenticated tier is always
/// readable unless [`SqliteSecretStore::set_device_unlocked`] says otherwise.
pub struct SqliteSecretStore {
    conn: Mutex<Connection>,
    key: StoreKey,
    device_unlocked: AtomicBool,
}

impl SqliteSecretStore {
    pub fn open(path: &Path, device_secret: &[u8], kdf: KdfParams) -> Result<Self, StoreError> {
        let conn = open_db(path)?;

        let salt = match meta_get(&conn, META_SALT)? {
            Some(bytes) => {
                let salt: [u8; SALT_LEN] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("kdf salt has wrong length".into()))?;
                salt
            }
            None => {
                let salt = random_salt();
                meta_set(&conn, META_SALT, &salt)?;
                salt
            }
        };

        let key = StoreKey::derive(device_secret, &salt, kdf)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match meta_get(&conn, META_CHECK)? {
            Some(sealed) => match key.open(CHECK_LABEL, &sealed) {
                Ok(plain) if plain.as_slice() == CHECK_PLAINTEXT => {}
                _ => {
                    return Err(StoreError::Unavailable(
                        "device secret does not match this store".into(),
                    ))
                }
            },
            None => {
                let sealed = key.seal(CHECK_LABEL, CHECK_PLAINTEXT).map_err(seal_error)?;
                meta_set(&conn, META_CHECK, &sealed)?;
            }
        }

        log::debug!("opened secret store at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            key,
            device_unlocked: AtomicBool::new(true),
        })
    }

    pub fn set_device_unlocked(&self, unlocked: bool) {
        self.device_unlocked.store(unlocked, Ordering::SeqCst);
    }

    /// Number of stored items.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM secret_items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn seal_error(e: CryptoError) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SecretStore for SqliteSecretStore {
    fn get(&self, key: &str) -> Result<Option<SecretBytes>, StoreError> {
        let row: Option<(i64, Vec<u8>)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT accessibility, sealed FROM secret_items WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((accessibility, sealed)) = row else {
            return Ok(None);
        };

        if Accessibility::from_i64(accessibility) == Accessibility::RequiresAuthenticatedUnlock
            && !self.device_unlocked.load(Ordering::SeqCst)
        {
            return Err(StoreError::InteractionNotAllowed);
        }

        self.key
            .open(key, &sealed)
            .map(Some)
            .map_err(|_| StoreError::Corrupt(key.to_string()))
    }

    fn set(
        &self,
        key: &str,
        value: Option<&[u8]>,
        accessibility: Accessibility,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        match value {
            None => {
                conn.execute("DELETE FROM secret_items WHERE key = ?1", params![key])?;
            }
            Some(plain) => {
                let sealed = self.key.seal(key, plain).map_err(seal_error)?;
                conn.execute(
                    "INSERT INTO secret_items (key, accessibility, sealed) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        accessibility = excluded.accessibility,
                        sealed = excluded.sealed",
                    params![key, accessibility.as_i64(), sealed],
                )?;
            }
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM secret_items WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
