#![no_main]

use keyguard_core::keys::{master_public_key, normalize_phrase};
use keyguard_core::seed::is_phrase_valid;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary text as a recovery phrase: normalization, validation and
    // derivation must return, never panic.
    if let Ok(s) = std::str::from_utf8(data) {
        let normalized = normalize_phrase(s);
        let _ = is_phrase_valid(&normalized);
        let _ = master_public_key(s, bitcoin::Network::Bitcoin);
    }
});
