//! CLI configuration, parsed from a TOML file plus environment overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use keyguard_core::AuthPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyguardConfig {
    #[serde(default)]
    pub storage: StorageSection,

    /// Lockout and wipe policy
    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub keys: KeysSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Where the secret and settings databases live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Sealed secret store, relative to `data_dir` unless absolute
    #[serde(default = "default_secrets_db")]
    pub secrets_db: String,

    /// Non-secret settings, relative to `data_dir` unless absolute
    #[serde(default = "default_settings_db")]
    pub settings_db: String,

    /// Engine databases removed together with the secrets on wipe
    #[serde(default)]
    pub wallet_databases: Vec<String>,

    /// Only ever set from `KEYGUARD_DEVICE_SECRET`.
    #[serde(skip)]
    pub device_secret: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            secrets_db: default_secrets_db(),
            settings_db: default_settings_db(),
            wallet_databases: Vec::new(),
            device_secret: None,
        }
    }
}

/// PIN lockout parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Unique failures before lockout windows begin
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u64,

    /// Unique failures that wipe the wallet
    #[serde(default = "default_max_failures")]
    pub max_failures: u64,

    #[serde(default = "default_lockout_base_secs")]
    pub lockout_base_secs: u64,

    #[serde(default = "default_lockout_multiplier")]
    pub lockout_multiplier: u64,

    /// Force a PIN unlock after this long without one (default: 7 days)
    #[serde(default = "default_pin_login_interval")]
    pub pin_login_interval_secs: u64,

    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    #[serde(default = "default_pin_length")]
    pub pin_length: usize,

    #[serde(default = "default_min_pin_length")]
    pub min_pin_length: usize,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            lockout_threshold: default_lockout_threshold(),
            max_failures: default_max_failures(),
            lockout_base_secs: default_lockout_base_secs(),
            lockout_multiplier: default_lockout_multiplier(),
            pin_login_interval_secs: default_pin_login_interval(),
            lock_timeout_secs: default_lock_timeout(),
            pin_length: default_pin_length(),
            min_pin_length: default_min_pin_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysSection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            network: default_network(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/keyguard")
}

fn default_secrets_db() -> String {
    "secrets.db".to_string()
}

fn default_settings_db() -> String {
    "settings.db".to_string()
}

fn default_lockout_threshold() -> u64 {
    3
}

fn default_max_failures() -> u64 {
    8
}

fn default_lockout_base_secs() -> u64 {
    60
}

fn default_lockout_multiplier() -> u64 {
    6
}

fn default_pin_login_interval() -> u64 {
    604800 // 7 days
}

fn default_lock_timeout() -> u64 {
    60
}

fn default_pin_length() -> usize {
    6
}

fn default_min_pin_length() -> usize {
    4
}

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl KeyguardConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: KeyguardConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `KEYGUARD_DATA_DIR`
    /// - `KEYGUARD_LOG_LEVEL`
    /// - `KEYGUARD_NETWORK`
    /// - `KEYGUARD_DEVICE_SECRET`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KEYGUARD_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KEYGUARD_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("KEYGUARD_NETWORK") {
            self.keys.network = v;
        }
        if let Ok(v) = std::env::var("KEYGUARD_DEVICE_SECRET") {
            if !v.is_empty() {
                self.storage.device_secret = Some(v);
            }
        }
    }

    /// Parse the network string to a `bitcoin::Network`.
    pub fn network(&self) -> Result<bitcoin::Network> {
        match self.keys.network.as_str() {
            "bitcoin" | "mainnet" => Ok(bitcoin::Network::Bitcoin),
            "testnet" | "testnet3" => Ok(bitcoin::Network::Testnet),
            "signet" => Ok(bitcoin::Network::Signet),
            "regtest" => Ok(bitcoin::Network::Regtest),
            other => anyhow::bail!("unknown network: {}", other),
        }
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        let auth = &self.auth;
        AuthPolicy {
            lockout_threshold: auth.lockout_threshold,
            max_failures: auth.max_failures,
            lockout_base_secs: auth.lockout_base_secs,
            lockout_multiplier: auth.lockout_multiplier,
            pin_login_interval_secs: auth.pin_login_interval_secs,
            default_pin_length: auth.pin_length,
            default_lock_timeout_secs: auth.lock_timeout_secs,
            min_pin_length: auth.min_pin_length,
        }
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.secrets_db)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.settings_db)
    }

    pub fn wallet_database_paths(&self) -> Vec<PathBuf> {
        self.storage
            .wallet_databases
            .iter()
            .map(|name| self.storage.data_dir.join(name))
            .collect()
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        let auth = &self.auth;

        anyhow::ensure!(
            auth.lockout_threshold >= 1,
            "auth.lockout_threshold must be >= 1"
        );
        anyhow::ensure!(
            auth.lockout_threshold < auth.max_failures,
            "auth.lockout_threshold must be below auth.max_failures"
        );
        anyhow::ensure!(
            auth.lockout_multiplier >= 1,
            "auth.lockout_multiplier must be >= 1"
        );
        anyhow::ensure!(
            auth.lockout_base_secs > 0,
            "auth.lockout_base_secs must be > 0"
        );
        anyhow::ensure!(
            auth.min_pin_length >= 1 && auth.min_pin_length <= auth.pin_length,
            "auth.min_pin_length must be between 1 and auth.pin_length"
        );

        anyhow::ensure!(
            !self.storage.secrets_db.is_empty(),
            "storage.secrets_db must not be empty"
        );
        anyhow::ensure!(
            !self.storage.settings_db.is_empty(),
            "storage.settings_db must not be empty"
        );
        anyhow::ensure!(
            self.secrets_path() != self.settings_path(),
            "storage.secrets_db and storage.settings_db must differ"
        );

        self.network()?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
