#![no_main]

use keyguard_core::keys::decode_master_public_key;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // A stored master public key read back from a corrupted store.
    let _ = decode_master_public_key(data);
});
