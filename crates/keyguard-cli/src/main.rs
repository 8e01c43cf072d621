//! Keyguard: headless wallet provisioning and administration
//!
//! Drives the keyguard-core wallet facade over the SQLite-backed secret
//! store, without a chain engine attached.
//!
//! # Usage
//!
//! ```bash
//! keyguard --config /path/to/keyguard.toml status
//! keyguard create
//! echo 123456 | keyguard set-pin
//! ```
//!
//! PINs and recovery phrases are read from stdin, one per line.

mod config;

use anyhow::{Context, Result};
use keyguard_core::crypto::KdfParams;
use keyguard_core::{
    is_phrase_valid, AuthError, DetachedEngine, PinOutcome, SqliteSecretStore, SqliteSettings,
    Wallet, WalletOptions,
};
use rand::RngCore;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

const DEVICE_KEY_FILE: &str = "device.key";

enum Command {
    Status,
    Create,
    Recover,
    SetPin,
    ChangePin,
    Unlock,
    SetLimit(u64),
    ShowPhrase,
    Wipe,
    Validate,
}

fn main() -> Result<()> {
    // Keep seed material out of core files
    keyguard_core::memory::disable_core_dumps();

    // Parse CLI args (minimal, no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut command: Option<Command> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("keyguard {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "set-limit" => {
                i += 1;
                let amount = args
                    .get(i)
                    .context("set-limit requires an amount in satoshis")?;
                let amount = amount
                    .parse::<u64>()
                    .with_context(|| format!("Invalid amount: {}", amount))?;
                command = Some(Command::SetLimit(amount));
            }
            other if command.is_none() => {
                command = Some(match other {
                    "status" => Command::Status,
                    "create" => Command::Create,
                    "recover" => Command::Recover,
                    "set-pin" => Command::SetPin,
                    "change-pin" => Command::ChangePin,
                    "unlock" => Command::Unlock,
                    "show-phrase" => Command::ShowPhrase,
                    "wipe" => Command::Wipe,
                    "validate" => Command::Validate,
                    _ => anyhow::bail!("Unknown command: {}", other),
                });
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let command = command.unwrap_or(Command::Status);

    // Load config; a missing default file just means defaults
    let mut cfg = match config_path {
        Some(ref path) => config::KeyguardConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = PathBuf::from("/etc/keyguard/keyguard.toml");
            if path.exists() {
                config::KeyguardConfig::from_file(&path)?
            } else {
                config::KeyguardConfig::default()
            }
        }
    };

    cfg.apply_env_overrides();

    cfg.validate()
        .context("Configuration validation failed")?;

    // Init logger
    std::env::set_var("RUST_LOG", &cfg.logging.level);
    env_logger::init();

    if let Command::Validate = command {
        let policy = cfg.auth_policy();
        println!("✅ Configuration is valid.");
        println!("  Network:        {}", cfg.keys.network);
        println!("  Secrets:        {}", cfg.secrets_path().display());
        println!("  Settings:       {}", cfg.settings_path().display());
        println!("  Wallet DBs:     {}", cfg.storage.wallet_databases.len());
        println!(
            "  Lockout:        after {} failures, {}s x{}",
            policy.lockout_threshold, policy.lockout_base_secs, policy.lockout_multiplier
        );
        println!("  Wipe after:     {} failures", policy.max_failures);
        return Ok(());
    }

    let wallet = open_wallet(&cfg)?;
    run(&wallet, command)
}

fn open_wallet(cfg: &config::KeyguardConfig) -> Result<Wallet<DetachedEngine>> {
    let data_dir = &cfg.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let device_secret = match cfg.storage.device_secret {
        Some(ref secret) => Zeroizing::new(secret.as_bytes().to_vec()),
        None => load_or_create_device_key(&data_dir.join(DEVICE_KEY_FILE))?,
    };

    let store = SqliteSecretStore::open(&cfg.secrets_path(), &device_secret, KdfParams::default())
        .context("Failed to open secret store")?;
    let settings =
        SqliteSettings::open(&cfg.settings_path()).context("Failed to open settings")?;

    let options = WalletOptions {
        network: cfg.network()?,
        policy: cfg.auth_policy(),
        database_files: cfg.wallet_database_paths(),
        ..WalletOptions::default()
    };

    Wallet::open(
        Arc::new(DetachedEngine),
        Arc::new(store),
        Arc::new(settings),
        options,
    )
    .context("Failed to open wallet")
}

/// Read the device key, generating a fresh 32-byte key on first use.
fn load_or_create_device_key(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    if path.exists() {
        let encoded = Zeroizing::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
        let key = hex::decode(encoded.trim())
            .with_context(|| format!("{} is not valid hex", path.display()))?;
        return Ok(Zeroizing::new(key));
    }

    let mut key = Zeroizing::new(vec![0u8; 32]);
    rand::rngs::OsRng.fill_bytes(&mut key);
    let encoded = Zeroizing::new(hex::encode(&*key));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(encoded.as_bytes())?;
    file.sync_all()?;

    log::info!("Generated device key at {}", path.display());
    Ok(key)
}

/// Read one line from stdin, prompting on stderr.
fn read_secret(prompt: &str) -> Result<Zeroizing<String>> {
    eprint!("{}: ", prompt);
    std::io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    Ok(Zeroizing::new(trimmed.to_string()))
}

fn run(wallet: &Wallet<DetachedEngine>, command: Command) -> Result<()> {
    match command {
        Command::Status => print_status(wallet),
        Command::Create => {
            let phrase = wallet
                .generate_seed_phrase()
                .context("Could not create a wallet (one may already exist)")?;
            println!("Write down your recovery phrase:\n");
            println!("  {}\n", phrase.as_str());
            println!("Next, set a PIN with `keyguard set-pin`.");
            Ok(())
        }
        Command::Recover => {
            let phrase = read_secret("Recovery phrase")?;
            anyhow::ensure!(is_phrase_valid(&phrase), "Not a valid recovery phrase");
            anyhow::ensure!(
                wallet.recover_from_phrase(&phrase),
                "Could not recover the wallet (one may already exist)"
            );
            println!("Wallet recovered.");
            Ok(())
        }
        Command::SetPin => {
            let pin = read_secret("New PIN")?;
            let phrase = read_secret("Recovery phrase (blank if no PIN is set yet)")?;
            let phrase = (!phrase.is_empty()).then_some(phrase.as_str());
            anyhow::ensure!(wallet.force_set_pin(&pin, phrase), "PIN not set");
            println!("PIN set.");
            Ok(())
        }
        Command::ChangePin => {
            let current = read_secret("Current PIN")?;
            let new_pin = read_secret("New PIN")?;
            anyhow::ensure!(wallet.change_pin(&current, &new_pin), "PIN not changed");
            println!("PIN changed.");
            Ok(())
        }
        Command::Unlock => {
            let pin = read_secret("PIN")?;
            match wallet.try_authenticate_pin(&pin) {
                Ok(PinOutcome::Authenticated) => {
                    println!("Unlocked.");
                    Ok(())
                }
                Ok(PinOutcome::Rejected { attempts_remaining }) => {
                    anyhow::bail!("Wrong PIN, {} attempts remaining", attempts_remaining)
                }
                Ok(PinOutcome::WipeThresholdReached) => {
                    anyhow::bail!("Too many wrong PINs, the wallet has been wiped")
                }
                Err(AuthError::LockedOut { until }) => {
                    anyhow::bail!("Locked out until {} (unix time)", until)
                }
                Err(e) => Err(e).context("PIN check failed"),
            }
        }
        Command::SetLimit(amount) => {
            let pin = read_secret("PIN")?;
            anyhow::ensure!(wallet.authenticate_pin(&pin), "Authentication failed");
            anyhow::ensure!(
                wallet.set_spending_limit(amount),
                "Could not set the spending limit"
            );
            println!("Biometric spending limit set to {} sat.", amount);
            Ok(())
        }
        Command::ShowPhrase => {
            let pin = read_secret("PIN")?;
            let phrase = wallet
                .seed_phrase(&pin)
                .context("Authentication failed")?;
            println!("{}", phrase.as_str());
            Ok(())
        }
        Command::Wipe => {
            let pin = read_secret("PIN")?;
            anyhow::ensure!(
                wallet.wipe(&pin),
                "Wipe refused or incomplete, see the log"
            );
            println!("Wallet wiped.");
            Ok(())
        }
        Command::Validate => Ok(()),
    }
}

fn print_status(wallet: &Wallet<DetachedEngine>) -> Result<()> {
    let gate = wallet.gate();

    if wallet.no_wallet() {
        println!("Wallet:           none");
        return Ok(());
    }

    let seeds = wallet.seeds();
    println!("Wallet:           present ({})", seeds.network());
    println!("Created:          {} (unix time)", seeds.earliest_key_time());
    println!(
        "PIN:              {}",
        if gate.has_pin()? { "set" } else { "not set" }
    );
    println!("Failed attempts:  {}", gate.fail_count()?);
    println!("Attempts left:    {}", gate.pin_attempts_remaining()?);
    if gate.is_wallet_disabled() {
        println!("Locked for:       {}s", gate.lockout_remaining());
    }
    println!("Spending limit:   {} sat", wallet.spending_limit());
    if wallet.wipe_incomplete() {
        println!("⚠️  A previous wipe did not complete.");
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"Keyguard: wallet PIN and key custody administration

USAGE:
    keyguard [OPTIONS] <COMMAND>

COMMANDS:
    status              Show wallet and PIN state (default)
    create              Create a wallet and print its recovery phrase
    recover             Restore a wallet from a recovery phrase
    set-pin             Set the PIN (first time, or with the recovery phrase)
    change-pin          Change the PIN
    unlock              Check a PIN
    set-limit <SATS>    Set the biometric spending limit
    show-phrase         Print the recovery phrase
    wipe                Erase the wallet from this device
    validate            Validate config and exit

OPTIONS:
    -c, --config <PATH>   Config file path (default: /etc/keyguard/keyguard.toml)
    -h, --help            Show this help message
    -V, --version         Show version

PINs and phrases are read from stdin, one per line.

ENVIRONMENT VARIABLES (override config file):
    KEYGUARD_DATA_DIR        Data directory path
    KEYGUARD_LOG_LEVEL       Log level (error/warn/info/debug/trace)
    KEYGUARD_NETWORK         Bitcoin network (bitcoin/testnet/signet/regtest)
    KEYGUARD_DEVICE_SECRET   Device secret sealing the store (default: <data_dir>/device.key)

EXAMPLES:
    # Provision a wallet
    keyguard --config keyguard.toml create
    printf '123456\n\n' | keyguard --config keyguard.toml set-pin

    # Validate configuration
    keyguard --config keyguard.toml validate
"#
    );
}
