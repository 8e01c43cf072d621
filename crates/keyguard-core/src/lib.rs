//! Keyguard Core
//!
//! Authentication and key custody for a self-custodial wallet.
//!
//! # Components
//!
//! - [`store`]: encrypted key/value storage for the phrase, PIN and counters
//! - [`seed`]: creates or restores the recovery phrase, derives keys from it
//! - [`gate`]: PIN checks with progressive lockout and a wipe threshold
//! - [`limit`]: the spending ceiling under which biometrics replace the PIN
//! - [`biometric`]: biometric prompt plus signing within the ceiling
//! - [`wipe`]: erases every secret and the engine databases
//! - [`wallet`]: the facade the UI layer talks to
//!
//! # Key Derivation
//!
//! From a single BIP-39 phrase:
//! - wallet account (master public key): m/0'
//! - API authentication: m/1'/0
//! - Ethereum: m/44'/60'/0'/0/0
//!
//! # Encrypted Storage
//!
//! The SQLite secret store seals every value with AES-256-GCM under a key
//! stretched from a device secret with Argon2id.

pub mod biometric;
pub mod clock;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod keys;
pub mod limit;
pub mod memory;
pub mod seed;
pub mod settings;
pub mod sqlite;
pub mod store;
pub mod wallet;
pub mod wipe;

pub use biometric::{BiometricPrompt, BiometricResult, PromptError, UnavailableBiometrics};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{DetachedEngine, SpendHistory, WalletEngine};
pub use error::{AuthError, BiometricError, WipeError};
pub use events::{AuthEvent, EventBus};
pub use gate::{AuthPolicy, AuthenticationGate, PinOutcome};
pub use keys::{BitcoinProfile, ChainProfile, EthereumProfile, KeyPurpose, SigningKey};
pub use seed::{is_phrase_valid, SeedError, SeedManager};
pub use settings::{MemorySettings, Settings, SqliteSettings};
pub use sqlite::SqliteSecretStore;
pub use store::{Accessibility, MemorySecretStore, SecretStore, SecretStoreExt, StoreError};
pub use wallet::{Wallet, WalletOptions};
pub use wipe::{ForceWipe, WipeAuthorization, WipeCoordinator};
