//! Sealing of secret-store values at rest
//!
//! The on-disk secret store never holds plaintext. Each value is sealed with
//! AES-256-GCM under a store key stretched from the device secret with
//! Argon2id. The item's key name is bound as associated data, so a sealed
//! value copied onto another row fails to open.
//!
//! # Layout
//!
//! `[nonce (12 bytes)][ciphertext + tag (len + 16 bytes)]`

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

const KEY_LEN: usize = 32;

/// Salt length for Argon2
pub const SALT_LEN: usize = 16;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Invalid sealed value format")]
    InvalidFormat,
}

/// Argon2id cost parameters.
///
/// The default follows the OWASP recommendation for 2024+:
/// 64 MiB memory, 3 iterations, 4 lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB
            t_cost: 3,
            p_cost: 4,
        }
    }
}

/// Symmetric key protecting one secret store. Zeroized on drop.
pub struct StoreKey(Zeroizing<[u8; KEY_LEN]>);

impl StoreKey {
    /// Stretch a device secret into a store key with Argon2id.
    pub fn derive(
        device_secret: &[u8],
        salt: &[u8; SALT_LEN],
        kdf: KdfParams,
    ) -> Result<Self, CryptoError> {
        let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(KEY_LEN))
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(device_secret, salt, &mut key[..])
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(key))
    }

    /// Seal `plaintext` for the item named `label`.
    pub fn seal(&self, label: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: label.as_bytes(),
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a value produced by [`StoreKey::seal`] for the same `label`.
    pub fn open(&self, label: &str, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidFormat);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: label.as_bytes(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Low-cost parameters so tests do not spend 64 MiB per store.
#[cfg(test)]
pub(crate) const TEST_KDF: KdfParams = KdfParams {
    m_cost: 1024,
    t_cost: 1,
    p_cost: 1,
};

/// Fresh random salt from the OS CSPRNG.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHEAP: KdfParams = TEST_KDF;

    fn test_key() -> StoreKey {
        StoreKey::derive(b"device secret", &[9u8; SALT_LEN], CHEAP).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let sealed = key.seal("pin", b"123456").unwrap();
        let opened = key.open("pin", &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"123456");
    }

    #[test]
    fn test_label_is_bound() {
        let key = test_key();
        let sealed = key.seal("pin", b"123456").unwrap();
        assert!(matches!(
            key.open("mnemonic", &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_device_secret_fails() {
        let sealed = test_key().seal("pin", b"123456").unwrap();
        let other = StoreKey::derive(b"another device", &[9u8; SALT_LEN], CHEAP).unwrap();
        assert!(other.open("pin", &sealed).is_err());
    }

    #[test]
    fn test_tampered_value_fails() {
        let key = test_key();
        let mut sealed = key.seal("spendlimit", &6000u64.to_le_bytes()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(key.open("spendlimit", &sealed).is_err());
    }

    #[test]
    fn test_truncated_value_rejected() {
        let key = test_key();
        assert!(matches!(
            key.open("pin", &[0u8; 20]),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn test_nonces_differ() {
        let key = test_key();
        let a = key.seal("pin", b"same").unwrap();
        let b = key.seal("pin", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_params_accepted() {
        let key = StoreKey::derive(b"device secret", &random_salt(), KdfParams::default());
        assert!(key.is_ok());
    }

    #[test]
    fn test_salt_uses_full_byte_range() {
        // 20 salts x 16 bytes: all landing in the base64 alphabet is ~0.25^320
        let mut saw_non_base64 = false;
        for _ in 0..20 {
            for b in random_salt() {
                if !(b.is_ascii_alphanumeric() || b == b'+' || b == b'/') {
                    saw_non_base64 = true;
                }
            }
        }
        assert!(saw_non_base64);
    }
}
