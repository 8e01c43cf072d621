//! Recovery phrase custody
//!
//! [`SeedManager`] owns the wallet's phrase in the secret store. It creates
//! or accepts the phrase exactly once, identifies the wallet by its master
//! public key, and re-derives private keys on demand.
//!
//! The public surface returns `bool`/`Option` and logs the cause; the
//! `try_*` variants propagate [`SeedError`].

use crate::clock::Clock;
use crate::keys::{self, KeyError, KeyPurpose, SigningKey};
use crate::store::{key, Accessibility, SecretStore, SecretStoreExt, StoreError};
use bip39::{Language, Mnemonic};
use bitcoin::Network;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// BIP-39 publication date (2013-10-01). No phrase-derived key predates it.
pub const BIP39_CREATION_TIME: u64 = 1_380_585_600;

/// 128 bits of entropy: a 12-word phrase.
const ENTROPY_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("a wallet already exists in the secret store")]
    WalletExists,
    #[error("no wallet in the secret store")]
    NoWallet,
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Generate a fresh 12-word English phrase from OS randomness.
pub fn generate_mnemonic() -> Result<Mnemonic, SeedError> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
    OsRng.fill_bytes(&mut entropy[..]);
    Mnemonic::from_entropy_in(Language::English, &entropy[..])
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// Wordlist membership and checksum check.
///
/// Kept apart from [`SeedManager::recover`], which accepts any string.
pub fn is_phrase_valid(phrase: &str) -> bool {
    let normalized = keys::normalize_phrase(phrase);
    Mnemonic::parse_in_normalized(Language::English, &normalized).is_ok()
}

pub struct SeedManager {
    store: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    network: Network,
    provisioning: Mutex<()>,
}

impl SeedManager {
    pub fn new(store: Arc<dyn SecretStore>, clock: Arc<dyn Clock>, network: Network) -> Self {
        Self {
            store,
            clock,
            network,
            provisioning: Mutex::new(()),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// True only when the store is readable and we know no wallet exists.
    pub fn no_wallet(&self) -> bool {
        match self.try_no_wallet() {
            Ok(none) => none,
            Err(e) => {
                log::warn!("secret store unreadable, assuming a wallet exists: {}", e);
                false
            }
        }
    }

    fn try_no_wallet(&self) -> Result<bool, StoreError> {
        Ok(!self.store.exists(key::MASTER_PUB_KEY)? && !self.store.exists(key::LEGACY_SEED)?)
    }

    /// Create a wallet and return its phrase. The caller shows it once.
    pub fn generate(&self) -> Option<Zeroizing<String>> {
        match self.try_generate() {
            Ok(phrase) => Some(phrase),
            Err(e) => {
                log::warn!("wallet generation refused: {}", e);
                None
            }
        }
    }

    pub fn try_generate(&self) -> Result<Zeroizing<String>, SeedError> {
        let _guard = self.provisioning.lock();
        if !self.try_no_wallet()? {
            return Err(SeedError::WalletExists);
        }

        self.store
            .set_u64(key::CREATION_TIME, Some(self.clock.now()))?;

        let mnemonic = generate_mnemonic()?;
        let phrase = Zeroizing::new(mnemonic.to_string());
        self.persist_phrase(&phrase)?;

        log::info!("generated new wallet");
        Ok(phrase)
    }

    /// Restore a wallet from `phrase`. Fails if one already exists.
    pub fn recover(&self, phrase: &str) -> bool {
        match self.try_recover(phrase) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("wallet recovery refused: {}", e);
                false
            }
        }
    }

    pub fn try_recover(&self, phrase: &str) -> Result<(), SeedError> {
        let _guard = self.provisioning.lock();
        if !self.try_no_wallet()? {
            return Err(SeedError::WalletExists);
        }
        self.persist_phrase(phrase)?;
        log::info!("recovered wallet from phrase");
        Ok(())
    }

    fn persist_phrase(&self, phrase: &str) -> Result<(), SeedError> {
        let normalized = keys::normalize_phrase(phrase);
        let mpk = keys::master_public_key(&normalized, self.network)?;
        self.store.set_string(
            key::MNEMONIC,
            Some(normalized.as_str()),
            Accessibility::RequiresAuthenticatedUnlock,
        )?;
        self.store
            .set(key::MASTER_PUB_KEY, Some(mpk.as_slice()), Accessibility::AfterUnlock)?;
        Ok(())
    }

    /// Whether `phrase` belongs to this wallet. Does not touch PIN state.
    pub fn authenticate(&self, phrase: &str) -> bool {
        match self.try_authenticate(phrase) {
            Ok(matched) => matched,
            Err(e) => {
                log::warn!("phrase authentication failed: {}", e);
                false
            }
        }
    }

    pub fn try_authenticate(&self, phrase: &str) -> Result<bool, SeedError> {
        let stored = self.store.get(key::MASTER_PUB_KEY)?.ok_or(SeedError::NoWallet)?;
        let candidate = keys::master_public_key(phrase, self.network)?;
        Ok(candidate.len() == stored.len() && bool::from(candidate.ct_eq(&stored)))
    }

    pub fn master_public_key(&self) -> Option<Vec<u8>> {
        match self.store.get(key::MASTER_PUB_KEY) {
            Ok(mpk) => mpk.map(|bytes| bytes.to_vec()),
            Err(e) => {
                log::warn!("cannot read master public key: {}", e);
                None
            }
        }
    }

    /// Creation time of a generated wallet, or the BIP-39 epoch when the
    /// wallet was recovered and the real age is unknown.
    pub fn earliest_key_time(&self) -> u64 {
        match self.store.get_u64(key::CREATION_TIME) {
            Ok(Some(t)) => t.max(BIP39_CREATION_TIME),
            Ok(None) => BIP39_CREATION_TIME,
            Err(e) => {
                log::warn!("cannot read creation time: {}", e);
                BIP39_CREATION_TIME
            }
        }
    }

    /// The stored phrase. Callers must have verified the PIN first.
    pub(crate) fn seed_phrase(&self) -> Result<Zeroizing<String>, SeedError> {
        self.store
            .get_string(key::MNEMONIC)?
            .ok_or(SeedError::NoWallet)
    }

    /// Derive the private key for `purpose`. The returned key zeroes itself
    /// when dropped, including when the caller bails out with `?`.
    pub fn derive_private_key(&self, purpose: KeyPurpose<'_>) -> Result<SigningKey, SeedError> {
        let phrase = self.seed_phrase()?;
        Ok(keys::derive_signing_key(&phrase, purpose, self.network)?)
    }

    /// Private key for a chain profile, served from its cache slot when the
    /// profile has one.
    pub fn chain_key(&self, profile: &dyn keys::ChainProfile) -> Result<SigningKey, SeedError> {
        let Some(slot) = profile.cache_key() else {
            return self.derive_private_key(KeyPurpose::Chain(profile));
        };
        self.cached_key(slot, KeyPurpose::Chain(profile))
    }

    /// API authentication key, derived once and cached hex-encoded.
    pub fn api_auth_key(&self) -> Option<SigningKey> {
        match self.cached_key(key::API_AUTH_KEY, KeyPurpose::ApiAuth) {
            Ok(k) => Some(k),
            Err(e) => {
                log::warn!("api auth key unavailable: {}", e);
                None
            }
        }
    }

    fn cached_key(&self, slot: &str, purpose: KeyPurpose<'_>) -> Result<SigningKey, SeedError> {
        if let Some(encoded) = self.store.get_string(slot)? {
            let bytes = Zeroizing::new(
                hex::decode(encoded.as_str())
                    .map_err(|_| StoreError::Corrupt(slot.to_string()))?,
            );
            return Ok(SigningKey::from_secret_bytes(&bytes)?);
        }

        let derived = self.derive_private_key(purpose)?;
        let encoded = Zeroizing::new(hex::encode(derived.secret_bytes()));
        self.store
            .set_string(slot, Some(encoded.as_str()), Accessibility::AfterUnlock)?;
        log::debug!("cached {:?} key", purpose);
        Ok(derived)
    }

    /// BitID signing key for `uri`.
    pub fn bitid_key(&self, uri: &str, index: u32) -> Option<SigningKey> {
        match self.derive_private_key(KeyPurpose::BitId { uri, index }) {
            Ok(k) => Some(k),
            Err(e) => {
                log::warn!("bitid key unavailable: {}", e);
                None
            }
        }
    }

    /// Move a wallet from the deprecated `seed` layout to the current one:
    /// phrase in the authenticated tier plus a stored master public key.
    ///
    /// Returns `true` if a migration happened. A legacy seed whose phrase is
    /// gone is deleted instead.
    pub fn migrate_legacy(&self) -> Result<bool, SeedError> {
        let _guard = self.provisioning.lock();
        if !self.store.exists(key::LEGACY_SEED)? {
            return Ok(false);
        }
        log::info!("upgrading legacy seed layout");

        let phrase = match self.store.get_string(key::MNEMONIC)? {
            Some(phrase) => phrase,
            None => {
                // nothing to upgrade from, and a stray seed would hide the empty wallet
                log::warn!("legacy seed without a recovery phrase, removing it");
                self.store.delete(key::LEGACY_SEED)?;
                return Ok(false);
            }
        };
        self.persist_phrase(&phrase)?;
        self.store.delete(key::LEGACY_SEED)?;
        Ok(true)
    }

    pub fn user_account(&self) -> Option<Vec<u8>> {
        match self.store.get(key::USER_ACCOUNT) {
            Ok(account) => account.map(|bytes| bytes.to_vec()),
            Err(e) => {
                log::warn!("cannot read user account: {}", e);
                None
            }
        }
    }

    pub fn set_user_account(&self, account: Option<&[u8]>) -> Result<(), SeedError> {
        self.store
            .set(key::USER_ACCOUNT, account, Accessibility::AfterUnlock)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::keys::EthereumProfile;
    use crate::store::MemorySecretStore;

    const PHRASE: &str =
        "legal winner thank year wave sausage worth useful legal winner thank yellow";

    fn manager() -> (Arc<MemorySecretStore>, SeedManager) {
        let store = Arc::new(MemorySecretStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let seeds = SeedManager::new(store.clone(), clock, Network::Bitcoin);
        (store, seeds)
    }

    #[test]
    fn test_generate_once() {
        let (store, seeds) = manager();
        assert!(seeds.no_wallet());

        let phrase = seeds.generate().unwrap();
        assert_eq!(phrase.split_whitespace().count(), 12);
        assert!(is_phrase_valid(&phrase));
        assert!(!seeds.no_wallet());
        assert_eq!(store.get_u64(key::CREATION_TIME).unwrap(), Some(1_700_000_000));
        assert_eq!(
            store.accessibility_of(key::MNEMONIC),
            Some(Accessibility::RequiresAuthenticatedUnlock)
        );

        assert!(seeds.generate().is_none());
        assert!(!seeds.recover(PHRASE));
        assert!(seeds.authenticate(&phrase));
    }

    #[test]
    fn test_recover_then_authenticate() {
        let (_, seeds) = manager();
        assert!(seeds.recover(PHRASE));
        assert!(seeds.authenticate(PHRASE));
        assert!(!seeds.authenticate(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"
        ));
        assert!(!seeds.recover(PHRASE));
        assert!(seeds.generate().is_none());
    }

    #[test]
    fn test_recover_accepts_unchecked_phrase() {
        let (_, seeds) = manager();
        assert!(!is_phrase_valid("hello world"));
        assert!(seeds.recover("hello world"));
        assert!(seeds.authenticate("hello world"));
    }

    #[test]
    fn test_authenticate_normalizes() {
        let (_, seeds) = manager();
        assert!(seeds.recover("caf\u{00e9}"));
        assert!(seeds.authenticate("cafe\u{0301}"));
    }

    #[test]
    fn test_authenticate_without_wallet() {
        let (_, seeds) = manager();
        assert!(!seeds.authenticate(PHRASE));
        assert!(matches!(seeds.try_authenticate(PHRASE), Err(SeedError::NoWallet)));
    }

    #[test]
    fn test_store_error_means_wallet_may_exist() {
        let (store, seeds) = manager();
        store.set_unavailable(true);
        assert!(!seeds.no_wallet());
        assert!(seeds.generate().is_none());
    }

    #[test]
    fn test_earliest_key_time() {
        let (store, seeds) = manager();
        assert!(seeds.recover(PHRASE));
        assert_eq!(seeds.earliest_key_time(), BIP39_CREATION_TIME);

        store.set_u64(key::CREATION_TIME, Some(5)).unwrap();
        assert_eq!(seeds.earliest_key_time(), BIP39_CREATION_TIME);

        store.set_u64(key::CREATION_TIME, Some(1_700_000_000)).unwrap();
        assert_eq!(seeds.earliest_key_time(), 1_700_000_000);
    }

    #[test]
    fn test_derive_requires_unlocked_device() {
        let (store, seeds) = manager();
        assert!(seeds.recover(PHRASE));
        assert!(seeds.derive_private_key(KeyPurpose::ApiAuth).is_ok());

        store.set_device_unlocked(false);
        assert!(matches!(
            seeds.derive_private_key(KeyPurpose::ApiAuth),
            Err(SeedError::Store(StoreError::InteractionNotAllowed))
        ));
    }

    #[test]
    fn test_api_auth_key_is_cached() {
        let (store, seeds) = manager();
        assert!(seeds.api_auth_key().is_none());
        assert!(seeds.recover(PHRASE));

        let first = seeds.api_auth_key().unwrap();
        assert!(store.exists(key::API_AUTH_KEY).unwrap());

        // the cache serves the key even while the phrase is unreadable
        store.set_device_unlocked(false);
        let second = seeds.api_auth_key().unwrap();
        assert_eq!(first.secret_bytes(), second.secret_bytes());
    }

    #[test]
    fn test_chain_key_uses_profile_cache() {
        let (store, seeds) = manager();
        assert!(seeds.recover(PHRASE));
        let direct = seeds
            .derive_private_key(KeyPurpose::Chain(&EthereumProfile))
            .unwrap();
        let cached = seeds.chain_key(&EthereumProfile).unwrap();
        assert_eq!(direct.secret_bytes(), cached.secret_bytes());
        assert!(store.exists(key::ETH_PRIV_KEY).unwrap());
    }

    #[test]
    fn test_bitid_key_depends_on_uri() {
        let (_, seeds) = manager();
        assert!(seeds.recover(PHRASE));
        let a = seeds.bitid_key("bitid://a.example/login", 0).unwrap();
        let b = seeds.bitid_key("bitid://b.example/login", 0).unwrap();
        assert_ne!(a.secret_bytes(), b.secret_bytes());
    }

    #[test]
    fn test_migrate_legacy_layout() {
        let (store, seeds) = manager();
        store
            .set_string(key::MNEMONIC, Some(PHRASE), Accessibility::AfterUnlock)
            .unwrap();
        store
            .set(key::LEGACY_SEED, Some(&[1u8; 64]), Accessibility::AfterUnlock)
            .unwrap();
        assert!(!seeds.no_wallet());

        assert!(seeds.migrate_legacy().unwrap());
        assert!(!store.exists(key::LEGACY_SEED).unwrap());
        assert_eq!(
            store.accessibility_of(key::MNEMONIC),
            Some(Accessibility::RequiresAuthenticatedUnlock)
        );
        assert!(seeds.authenticate(PHRASE));

        assert!(!seeds.migrate_legacy().unwrap());
    }

    #[test]
    fn test_migrate_drops_orphan_legacy_seed() {
        let (store, seeds) = manager();
        store
            .set(key::LEGACY_SEED, Some(&[1u8; 64]), Accessibility::AfterUnlock)
            .unwrap();
        assert!(!seeds.no_wallet());

        assert!(!seeds.migrate_legacy().unwrap());
        assert!(!store.exists(key::LEGACY_SEED).unwrap());
        assert!(seeds.no_wallet());
        assert!(seeds.recover(PHRASE));
    }

    #[test]
    fn test_migrate_waits_for_unlocked_device() {
        let (store, seeds) = manager();
        store
            .set_string(
                key::MNEMONIC,
                Some(PHRASE),
                Accessibility::RequiresAuthenticatedUnlock,
            )
            .unwrap();
        store
            .set(key::LEGACY_SEED, Some(&[1u8; 64]), Accessibility::AfterUnlock)
            .unwrap();

        store.set_device_unlocked(false);
        assert!(matches!(
            seeds.migrate_legacy(),
            Err(SeedError::Store(StoreError::InteractionNotAllowed))
        ));
        assert!(store.exists(key::LEGACY_SEED).unwrap());

        store.set_device_unlocked(true);
        assert!(seeds.migrate_legacy().unwrap());
        assert!(!store.exists(key::LEGACY_SEED).unwrap());
        assert!(store.exists(key::MASTER_PUB_KEY).unwrap());
    }

    #[test]
    fn test_user_account_blob() {
        let (_, seeds) = manager();
        assert!(seeds.user_account().is_none());
        seeds.set_user_account(Some(b"{\"id\":1}")).unwrap();
        assert_eq!(seeds.user_account().unwrap(), b"{\"id\":1}");
        seeds.set_user_account(None).unwrap();
        assert!(seeds.user_account().is_none());
    }
}
