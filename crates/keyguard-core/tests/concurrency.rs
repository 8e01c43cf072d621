//! Racing PIN attempts and provisioning from several threads.

mod common;

use common::*;
use keyguard_core::AuthPolicy;
use std::sync::{Arc, Barrier};
use std::thread;

/// A policy that never locks out below 7 failures, so every racing attempt
/// reaches the comparison.
fn wide_policy() -> AuthPolicy {
    AuthPolicy {
        lockout_threshold: 7,
        ..AuthPolicy::default()
    }
}

#[test]
fn test_distinct_wrong_pins_count_exactly() {
    let h = Arc::new(harness_with(wide_policy(), Vec::new()));
    assert!(h.wallet.recover_from_phrase(PHRASE));
    assert!(h.wallet.force_set_pin("123456", None));

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                h.wallet.authenticate_pin(&format!("90000{}", i))
            })
        })
        .collect();

    for handle in handles {
        assert!(!handle.join().unwrap());
    }
    assert_eq!(h.wallet.gate().fail_count().unwrap(), threads as u64);
}

#[test]
fn test_same_wrong_pin_counts_once_across_threads() {
    let h = Arc::new(provisioned());

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                h.wallet.authenticate_pin("000000")
            })
        })
        .collect();

    for handle in handles {
        assert!(!handle.join().unwrap());
    }
    assert_eq!(h.wallet.gate().fail_count().unwrap(), 1);
}

#[test]
fn test_concurrent_generate_creates_one_wallet() {
    let h = Arc::new(harness());

    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                h.wallet.generate_seed_phrase().is_some()
            })
        })
        .collect();

    let created = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(created, 1);
    assert!(!h.wallet.no_wallet());
}

#[test]
fn test_correct_pin_during_failures_always_unlocks() {
    let h = Arc::new(harness_with(wide_policy(), Vec::new()));
    assert!(h.wallet.recover_from_phrase(PHRASE));
    assert!(h.wallet.force_set_pin("123456", None));

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let pin = if i == 0 {
                    "123456".to_string()
                } else {
                    format!("80000{}", i)
                };
                (i, h.wallet.authenticate_pin(&pin))
            })
        })
        .collect();

    for handle in handles {
        let (i, unlocked) = handle.join().unwrap();
        assert_eq!(unlocked, i == 0);
    }
    // whatever order they ran in, at most the three wrong PINs remain counted
    assert!(h.wallet.gate().fail_count().unwrap() <= 3);
}
