//! Boundary to the external wallet engine
//!
//! Sync, transaction building and signature primitives belong to the
//! engine. Custody only needs the spend figures that drive the biometric
//! ceiling, a way to hand over a derived key for one signing call, and a
//! hook to drop every in-memory object during a wipe.

use crate::keys::{BitcoinProfile, ChainProfile, SigningKey};

/// Cumulative outflow of the wallet, in base units.
pub trait SpendHistory: Send + Sync {
    fn total_sent(&self) -> u64;
}

pub trait WalletEngine: SpendHistory {
    type Transaction;

    /// Which chain this engine signs for. Selects the derivation path.
    fn profile(&self) -> &dyn ChainProfile {
        &BitcoinProfile
    }

    fn amount_sent_by_tx(&self, tx: &Self::Transaction) -> u64;

    fn amount_received_from_tx(&self, tx: &Self::Transaction) -> u64;

    /// Sign `tx` in place. The key is dropped (and zeroed) by the caller.
    fn sign(&self, tx: &mut Self::Transaction, key: &SigningKey) -> bool;

    /// Stop sync and signing and release every object that could still
    /// reach key material.
    fn reset_for_wipe(&self);

    /// What this transaction actually takes out of the wallet: sent minus
    /// change coming back.
    fn net_spend(&self, tx: &Self::Transaction) -> u64 {
        self.amount_sent_by_tx(tx)
            .saturating_sub(self.amount_received_from_tx(tx))
    }
}

/// An engine with no chain behind it. Nothing has been sent and nothing can
/// be signed; used by administrative tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedEngine;

impl SpendHistory for DetachedEngine {
    fn total_sent(&self) -> u64 {
        0
    }
}

impl WalletEngine for DetachedEngine {
    type Transaction = ();

    fn amount_sent_by_tx(&self, _tx: &()) -> u64 {
        0
    }

    fn amount_received_from_tx(&self, _tx: &()) -> u64 {
        0
    }

    fn sign(&self, _tx: &mut (), _key: &SigningKey) -> bool {
        log::warn!("detached engine cannot sign");
        false
    }

    fn reset_for_wipe(&self) {}
}
