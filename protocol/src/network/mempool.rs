//! # Mempool
//!
//! The bounded set of unconfirmed transactions a node is willing to
//! include in a future block. There is no fee market in Ember, so there
//! is no fee index either: selection is strictly oldest-first by
//! transaction timestamp. Deterministic, fair, and nothing to game.
//!
//! ## Admission
//!
//! [`Mempool::add_transaction`] applies its checks in a fixed order,
//! cheapest first:
//!
//! 1. **Capacity** — reject when full.
//! 2. **Duplicate** — reject ids already pooled.
//! 3. **Coinbase** — coinbases are born inside blocks, never gossiped.
//! 4. **Expiry** — reject transactions older than the pool timeout.
//! 5. **Chain validity** — signature, structure, confirmed balance.
//! 6. **Pending overdraft** — the sender's queued debits plus the new
//!    amount must fit inside their confirmed balance. Debits only:
//!    queued *inbound* transfers do not loosen the check, on purpose —
//!    unconfirmed credits are not money yet.
//!
//! ## Coherence with reorgs
//!
//! The pool holds ids, not chain positions, so a reorganization does not
//! invalidate it; entries that became unspendable simply fail chain
//! validation when the next block is assembled, and [`cleanup`] ages the
//! rest out.
//!
//! [`cleanup`]: Mempool::cleanup

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::config::{
    MEMPOOL_DEFAULT_CAPACITY, MEMPOOL_MAX_TRANSACTIONS, TRANSACTION_TIMEOUT_MS,
};
use crate::crypto::keys::normalize_address;
use crate::ledger::{Blockchain, Transaction};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for pool behaviour.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of pooled transactions. Clamped to
    /// [`MEMPOOL_MAX_TRANSACTIONS`] at construction.
    pub capacity: usize,

    /// Milliseconds after which a pooled transaction is stale and
    /// eligible for [`Mempool::cleanup`].
    pub timeout_ms: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: MEMPOOL_DEFAULT_CAPACITY,
            timeout_ms: TRANSACTION_TIMEOUT_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a transaction was refused admission. These are resource-style
/// errors: the caller is told, nothing crashes, nothing propagates.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("mempool is full ({capacity} transactions)")]
    Full { capacity: usize },

    #[error("transaction already in mempool")]
    Duplicate,

    #[error("coinbase transactions are not accepted into the mempool")]
    Coinbase,

    #[error("transaction expired: older than {timeout_ms}ms")]
    Expired { timeout_ms: u64 },

    #[error("transaction failed chain validation")]
    Invalid,

    #[error("pending overdraft: {pending_debits} queued + {amount} exceeds confirmed {confirmed}")]
    PendingOverdraft {
        pending_debits: f64,
        amount: f64,
        confirmed: f64,
    },
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

/// Thread-safe pool of pending transactions, keyed by id.
pub struct Mempool {
    transactions: DashMap<String, Transaction>,
    config: MempoolConfig,
}

impl Mempool {
    /// Create a pool with the given configuration, capacity clamped to
    /// the protocol-wide hard cap.
    pub fn new(mut config: MempoolConfig) -> Self {
        config.capacity = config.capacity.min(MEMPOOL_MAX_TRANSACTIONS);
        Self {
            transactions: DashMap::new(),
            config,
        }
    }

    /// Admit a transaction, checking against current chain state.
    ///
    /// See the module docs for the check order. On success the
    /// transaction is pooled and will be offered to the next block.
    pub fn add_transaction(
        &self,
        tx: Transaction,
        chain: &Blockchain,
    ) -> Result<(), MempoolError> {
        if self.transactions.len() >= self.config.capacity {
            return Err(MempoolError::Full {
                capacity: self.config.capacity,
            });
        }
        if self.transactions.contains_key(&tx.id) {
            return Err(MempoolError::Duplicate);
        }
        if tx.is_coinbase {
            return Err(MempoolError::Coinbase);
        }
        let now = Utc::now().timestamp_millis() as u64;
        if now.saturating_sub(tx.timestamp) > self.config.timeout_ms {
            return Err(MempoolError::Expired {
                timeout_ms: self.config.timeout_ms,
            });
        }
        if !chain.validate_transaction(&tx) {
            return Err(MempoolError::Invalid);
        }

        // is_well_formed inside chain validation guarantees a sender here.
        if let Some(sender) = tx.sender.as_deref() {
            let pending_debits = self.pending_debits(sender);
            let confirmed = chain.confirmed_balance(sender);
            if pending_debits + tx.amount > confirmed {
                return Err(MempoolError::PendingOverdraft {
                    pending_debits,
                    amount: tx.amount,
                    confirmed,
                });
            }
        }

        debug!(id = %tx.id, pooled = self.transactions.len() + 1, "transaction admitted");
        self.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    /// The oldest `limit` transactions, ascending by timestamp. This is
    /// the selection order for block assembly.
    pub fn get_transactions(&self, limit: usize) -> Vec<Transaction> {
        let mut all: Vec<Transaction> = self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|tx| tx.timestamp);
        all.truncate(limit);
        all
    }

    /// Every pooled transaction, ascending by timestamp.
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.get_transactions(usize::MAX)
    }

    /// Remove one transaction by id, returning it if it was pooled.
    pub fn remove_transaction(&self, tx_id: &str) -> Option<Transaction> {
        self.transactions.remove(tx_id).map(|(_, tx)| tx)
    }

    /// Remove a batch of ids — the usual call after block inclusion.
    /// Missing ids are silently ignored.
    pub fn remove_transactions(&self, tx_ids: &[String]) {
        for id in tx_ids {
            self.remove_transaction(id);
        }
    }

    /// Drop every entry older than the pool timeout. Returns how many
    /// were removed. Driven periodically by the network manager.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now().timestamp_millis() as u64;
        let timeout = self.config.timeout_ms;
        let expired: Vec<String> = self
            .transactions
            .iter()
            .filter(|entry| now.saturating_sub(entry.value().timestamp) > timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &expired {
            self.transactions.remove(id);
        }
        if !expired.is_empty() {
            debug!(expired = expired.len(), "mempool cleanup");
        }
        expired.len()
    }

    /// Sum of queued debit amounts for a sender (normalized comparison).
    pub fn pending_debits(&self, sender: &str) -> f64 {
        let sender = normalize_address(sender);
        self.transactions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .sender
                    .as_deref()
                    .map(|s| normalize_address(s) == sender)
                    .unwrap_or(false)
            })
            .map(|entry| entry.value().amount)
            .sum()
    }

    /// Net pending effect (credits minus debits) on an address, for
    /// balance displays.
    pub fn pending_delta(&self, address: &str) -> f64 {
        let address = normalize_address(address);
        let mut delta = 0.0;
        for entry in self.transactions.iter() {
            let tx = entry.value();
            if normalize_address(&tx.recipient) == address {
                delta += tx.amount;
            }
            if tx
                .sender
                .as_deref()
                .map(|s| normalize_address(s) == address)
                .unwrap_or(false)
            {
                delta -= tx.amount;
            }
        }
        delta
    }

    /// `true` if the id is pooled.
    pub fn contains(&self, tx_id: &str) -> bool {
        self.transactions.contains_key(tx_id)
    }

    /// Current pool size.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// `true` when nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
