//! Key derivation from a recovery phrase
//!
//! Everything is re-derived from the phrase on demand. The BIP-39 seed and
//! every private key live only in a [`SecretBuffer`] for the duration of one
//! operation.
//!
//! Paths (BIP-32, hardened where marked):
//! - wallet account / master public key: `m/0'`
//! - API authentication key: `m/1'/0`
//! - BitID: `m/13'/A'/B'/C'/D'`, A..D taken from SHA-256(index || uri)
//! - per-chain signing keys come from a [`ChainProfile`]

use crate::memory::SecretBuffer;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::Network;
use secp256k1::{Secp256k1, SecretKey};
use sha2::{Digest, Sha256, Sha512};
use std::borrow::Cow;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// BIP-39 PBKDF2 salt prefix
const SEED_SALT: &[u8] = b"mnemonic";
const SEED_ROUNDS: u32 = 2048;
pub const SEED_LEN: usize = 64;

/// Serialized extended public key length
pub const MASTER_PUB_KEY_LEN: usize = 78;

/// Wallet account path. Its extended public key identifies the wallet.
pub const ACCOUNT_PATH: &str = "m/0'";
pub const API_AUTH_PATH: &str = "m/1'/0";
const BITID_PURPOSE: u32 = 13;
pub const ETHEREUM_PATH: &str = "m/44'/60'/0'/0/0";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Derivation failed: {0}")]
    DerivationFailed(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Invalid key material")]
    InvalidKey,
}

/// NFKD-normalize a phrase. Input that is already normalized is copied
/// into the zeroizing wrapper unchanged.
pub fn normalize_phrase(phrase: &str) -> Zeroizing<String> {
    let mut cow = Cow::Borrowed(phrase);
    bip39::Mnemonic::normalize_utf8_cow(&mut cow);
    Zeroizing::new(cow.into_owned())
}

/// BIP-39 seed for `phrase` with an empty passphrase.
///
/// Accepts any string: wordlist membership and checksum are checked
/// separately by [`crate::seed::is_phrase_valid`].
pub fn seed_from_phrase(phrase: &str) -> SecretBuffer {
    let normalized = normalize_phrase(phrase);
    let mut seed = SecretBuffer::new(SEED_LEN);
    pbkdf2::pbkdf2_hmac::<Sha512>(
        normalized.as_bytes(),
        SEED_SALT,
        SEED_ROUNDS,
        seed.as_mut_slice(),
    );
    seed
}

fn parse_path(path: &str) -> Result<DerivationPath, KeyError> {
    path.parse()
        .map_err(|e: bitcoin::bip32::Error| KeyError::InvalidPath(e.to_string()))
}

fn derive_xpriv(
    seed: &SecretBuffer,
    network: Network,
    path: &DerivationPath,
) -> Result<Xpriv, KeyError> {
    let secp = Secp256k1::new();
    let mut master = Xpriv::new_master(network, seed.as_slice())
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
    let derived = master
        .derive_priv(&secp, path)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()));
    master.private_key.non_secure_erase();
    derived
}

/// Serialized extended public key of the wallet account for `phrase`.
pub fn master_public_key(phrase: &str, network: Network) -> Result<Vec<u8>, KeyError> {
    let seed = seed_from_phrase(phrase);
    master_public_key_from_seed(&seed, network)
}

pub fn master_public_key_from_seed(
    seed: &SecretBuffer,
    network: Network,
) -> Result<Vec<u8>, KeyError> {
    let secp = Secp256k1::new();
    let mut account = derive_xpriv(seed, network, &parse_path(ACCOUNT_PATH)?)?;
    let xpub = Xpub::from_priv(&secp, &account);
    account.private_key.non_secure_erase();
    Ok(xpub.encode().to_vec())
}

/// Decode a stored master public key.
pub fn decode_master_public_key(bytes: &[u8]) -> Result<Xpub, KeyError> {
    Xpub::decode(bytes).map_err(|_| KeyError::InvalidKey)
}

/// Chain-specific signing derivation.
///
/// One authentication and seed implementation serves every chain; a chain
/// only contributes its path and, if it caches its signing key, the store
/// slot for it.
pub trait ChainProfile: Send + Sync {
    fn name(&self) -> &'static str;

    fn signing_path(&self) -> Result<DerivationPath, KeyError>;

    /// Secret store slot caching this chain's signing key, if any.
    fn cache_key(&self) -> Option<&'static str> {
        None
    }
}

/// Bitcoin-family wallets sign from the account key; the engine derives
/// per-input children from it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitcoinProfile;

impl ChainProfile for BitcoinProfile {
    fn name(&self) -> &'static str {
        "bitcoin"
    }

    fn signing_path(&self) -> Result<DerivationPath, KeyError> {
        parse_path(ACCOUNT_PATH)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EthereumProfile;

impl ChainProfile for EthereumProfile {
    fn name(&self) -> &'static str {
        "ethereum"
    }

    fn signing_path(&self) -> Result<DerivationPath, KeyError> {
        parse_path(ETHEREUM_PATH)
    }

    fn cache_key(&self) -> Option<&'static str> {
        Some(crate::store::key::ETH_PRIV_KEY)
    }
}

/// What a private key is for.
#[derive(Clone, Copy)]
pub enum KeyPurpose<'a> {
    ApiAuth,
    Chain(&'a dyn ChainProfile),
    BitId { uri: &'a str, index: u32 },
}

impl KeyPurpose<'_> {
    pub fn path(&self) -> Result<DerivationPath, KeyError> {
        match self {
            KeyPurpose::ApiAuth => parse_path(API_AUTH_PATH),
            KeyPurpose::Chain(profile) => profile.signing_path(),
            KeyPurpose::BitId { uri, index } => bitid_path(uri, *index),
        }
    }
}

impl std::fmt::Debug for KeyPurpose<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPurpose::ApiAuth => f.write_str("ApiAuth"),
            KeyPurpose::Chain(profile) => write!(f, "Chain({})", profile.name()),
            KeyPurpose::BitId { uri, index } => write!(f, "BitId({}, {})", uri, index),
        }
    }
}

/// `m/13'/A'/B'/C'/D'` where A..D are the first four little-endian words of
/// SHA-256(index_le || uri).
pub fn bitid_path(uri: &str, index: u32) -> Result<DerivationPath, KeyError> {
    let mut hasher = Sha256::new();
    hasher.update(index.to_le_bytes());
    hasher.update(uri.as_bytes());
    let hash = hasher.finalize();

    let mut children = Vec::with_capacity(5);
    children.push(hardened(BITID_PURPOSE)?);
    for word in hash[..16].chunks_exact(4) {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        children.push(hardened(value & 0x7fff_ffff)?);
    }
    Ok(DerivationPath::from(children))
}

fn hardened(index: u32) -> Result<ChildNumber, KeyError> {
    ChildNumber::from_hardened_idx(index).map_err(|e| KeyError::InvalidPath(e.to_string()))
}

/// A derived private key and its chain code, zeroed on drop.
///
/// Layout: `[secret (32)][chain code (32)]`.
pub struct SigningKey {
    material: SecretBuffer,
}

impl SigningKey {
    pub const SECRET_LEN: usize = 32;

    fn from_xpriv(xpriv: &mut Xpriv) -> Self {
        let mut material = SecretBuffer::new(64);
        let mut secret = xpriv.private_key.secret_bytes();
        material.as_mut_slice()[..32].copy_from_slice(&secret);
        material.as_mut_slice()[32..].copy_from_slice(xpriv.chain_code.as_bytes());
        secret.zeroize();
        xpriv.private_key.non_secure_erase();
        Self { material }
    }

    /// Rebuild from bytes previously produced by [`SigningKey::secret_bytes`],
    /// as held in a key cache. Cached keys carry no chain code.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != Self::SECRET_LEN {
            return Err(KeyError::InvalidKey);
        }
        SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidKey)?;
        let mut material = SecretBuffer::new(64);
        material.as_mut_slice()[..32].copy_from_slice(bytes);
        Ok(Self { material })
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.material.as_slice()[..32]
    }

    pub fn chain_code(&self) -> &[u8] {
        &self.material.as_slice()[32..]
    }

    /// The secp256k1 secret for an external signer. The caller should
    /// `non_secure_erase` it once done.
    pub fn secret_key(&self) -> Result<SecretKey, KeyError> {
        SecretKey::from_slice(self.secret_bytes()).map_err(|_| KeyError::InvalidKey)
    }

    pub fn public_key(&self) -> Result<secp256k1::PublicKey, KeyError> {
        let secp = Secp256k1::signing_only();
        let mut sk = self.secret_key()?;
        let pk = sk.public_key(&secp);
        sk.non_secure_erase();
        Ok(pk)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Derive the key for `purpose` from a phrase.
pub fn derive_signing_key(
    phrase: &str,
    purpose: KeyPurpose<'_>,
    network: Network,
) -> Result<SigningKey, KeyError> {
    let seed = seed_from_phrase(phrase);
    let mut xpriv = derive_xpriv(&seed, network, &purpose.path()?)?;
    Ok(SigningKey::from_xpriv(&mut xpriv))
}
