#![no_main]

use keyguard_core::crypto::{KdfParams, StoreKey, SALT_LEN};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

static KEY: OnceLock<StoreKey> = OnceLock::new();

fn key() -> &'static StoreKey {
    KEY.get_or_init(|| {
        let kdf = KdfParams {
            m_cost: 1024,
            t_cost: 1,
            p_cost: 1,
        };
        StoreKey::derive(b"fuzz-device-secret", &[7u8; SALT_LEN], kdf)
            .unwrap_or_else(|e| panic!("key derivation: {e}"))
    })
}

fuzz_target!(|data: &[u8]| {
    // Tampered or truncated rows must be rejected, never panic.
    let _ = key().open("mnemonic", data);

    if let Ok(sealed) = key().seal("mnemonic", data) {
        assert!(key().open("pin", &sealed).is_err());
    }
});
