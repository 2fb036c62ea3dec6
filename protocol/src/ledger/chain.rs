//! # The Blockchain
//!
//! An in-memory, append-only sequence of blocks plus two derived indices:
//! per-address balances and per-transaction confirmations. The block
//! sequence is the authoritative state; the indices are caches rebuilt
//! whenever the sequence changes, so they can never drift from it.
//!
//! ## Consensus rules enforced here
//!
//! - `chain[0]` is the bit-exact genesis for this difficulty.
//! - Every later block links to its parent by hash, carries a hash that
//!   matches its canonical encoding, and satisfies the proof-of-work
//!   target.
//! - Every block contains exactly one coinbase, first in the list,
//!   minting exactly the halving-schedule reward for its height.
//! - Every ordinary transaction is signed by its sender and covered by
//!   the sender's confirmed balance.
//!
//! ## Reorganization
//!
//! [`Blockchain::replace_chain`] adopts a strictly longer chain, but only
//! after replaying it block by block against a scratch balance map — a
//! chain in which anyone ever overspends is rejected wholesale, naming
//! the offending height, and no partial state is committed.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{self, MAX_TRANSACTIONS_PER_BLOCK, REQUIRED_CONFIRMATIONS};
use crate::crypto::keys::normalize_address;
use crate::ledger::block::Block;
use crate::ledger::transaction::{Transaction, TransactionStatus};

// ---------------------------------------------------------------------------
// Derived index types
// ---------------------------------------------------------------------------

/// Balance snapshot for one address.
///
/// `confirmed` is derived from the chain alone. `pending` is the net
/// effect of mempool transactions touching the address; the chain itself
/// always reports it as zero — the network layer fills it in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Sum of credits minus debits over the whole chain.
    pub confirmed: f64,
    /// Net effect of unconfirmed transactions, when known.
    pub pending: f64,
    /// Unix milliseconds when this snapshot was computed.
    pub last_updated: u64,
}

impl AccountBalance {
    fn zero() -> Self {
        Self {
            confirmed: 0.0,
            pending: 0.0,
            last_updated: Utc::now().timestamp_millis() as u64,
        }
    }
}

/// Where a transaction sits in the chain and how deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationEntry {
    /// Height of the block containing the transaction.
    pub block_height: u64,
    /// `tip.index − block_height + 1`.
    pub confirmations: u64,
    /// `Final` at six or more confirmations, `Confirmed` below.
    pub status: TransactionStatus,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a block or chain was refused.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("incoming chain is not longer: ours {ours}, theirs {theirs}")]
    NotLonger { ours: usize, theirs: usize },

    #[error("incoming chain does not begin with our genesis block")]
    GenesisMismatch,

    #[error("invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: String },

    #[error("overspend at height {height}: confirmed {balance} is less than {amount}")]
    Overspend {
        height: u64,
        balance: f64,
        amount: f64,
    },
}

impl ChainError {
    fn invalid(height: u64, reason: impl Into<String>) -> Self {
        Self::InvalidBlock {
            height,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Blockchain
// ---------------------------------------------------------------------------

/// The chain state of one node. Not thread-safe on its own; the network
/// layer wraps it in a lock and serializes every mutation.
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    difficulty: usize,
    /// Cached per-address balances, keyed by normalized address.
    balances: HashMap<String, AccountBalance>,
    /// Cached per-transaction confirmation entries, keyed by tx id.
    confirmations: HashMap<String, ConfirmationEntry>,
}

impl Blockchain {
    /// A fresh chain containing only the genesis block for `difficulty`.
    pub fn new(difficulty: usize) -> Self {
        let difficulty = difficulty.clamp(1, 63);
        Self {
            blocks: vec![Block::genesis(difficulty)],
            difficulty,
            balances: HashMap::new(),
            confirmations: HashMap::new(),
        }
    }

    /// The fixed mining difficulty of this chain.
    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// The full block sequence, genesis first.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Never true — a chain always contains at least genesis. Present to
    /// keep `len` clippy-clean.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The current tip.
    pub fn tip(&self) -> &Block {
        // A chain is constructed with genesis and only ever grows.
        self.blocks.last().unwrap_or_else(|| unreachable!())
    }

    // -----------------------------------------------------------------------
    // Block creation
    // -----------------------------------------------------------------------

    /// Assemble an unmined candidate extending the current tip.
    pub fn candidate(
        &self,
        transactions: Vec<Transaction>,
        miner: String,
        reward: f64,
    ) -> Block {
        let tip = self.tip();
        Block::candidate(
            tip.index + 1,
            tip.hash.clone(),
            Utc::now().timestamp_millis() as u64,
            transactions,
            miner,
            reward,
        )
    }

    /// Mine and append a block in one call: assemble a candidate from the
    /// given transactions, search for a nonce, validate the result as if
    /// it had arrived from a peer, and append it.
    ///
    /// This is the synchronous path used by tests and single-threaded
    /// drivers; the mining loop assembles and mines off-thread and then
    /// calls [`append_block`](Self::append_block) itself.
    pub fn create_block(
        &mut self,
        transactions: Vec<Transaction>,
        miner: String,
        reward: f64,
    ) -> Result<Block, ChainError> {
        let mut block = self.candidate(transactions, miner, reward);
        block.mine(self.difficulty, &AtomicBool::new(false));
        self.append_block(block.clone())?;
        Ok(block)
    }

    /// Validate `block` as the new head and append it, refreshing the
    /// derived indices.
    pub fn append_block(&mut self, block: Block) -> Result<(), ChainError> {
        self.validate_new_head(&block)?;
        info!(
            height = block.index,
            txs = block.tx_count(),
            hash = %block.hash,
            "appending block"
        );
        self.blocks.push(block);
        self.rebuild_indices();
        Ok(())
    }

    /// Check that `block` is a valid direct extension of the current tip:
    /// next index, parent linkage, content-consistent hash meeting the
    /// difficulty target, and a fully valid transaction set.
    pub fn validate_new_head(&self, block: &Block) -> Result<(), ChainError> {
        let expected_index = self.blocks.len() as u64;
        if block.index != expected_index {
            return Err(ChainError::invalid(
                block.index,
                format!("expected index {expected_index}"),
            ));
        }
        if block.previous_hash != self.tip().hash {
            return Err(ChainError::invalid(block.index, "previous_hash mismatch"));
        }
        if !block.verify_pow(self.difficulty) {
            return Err(ChainError::invalid(
                block.index,
                "hash does not satisfy proof of work",
            ));
        }
        self.validate_block_transactions(block)
    }

    /// Transaction-set rules for a block arriving as the new head: the
    /// structural rules plus a confirmed-balance check for every
    /// transfer against the pre-block chain state. Full replay with a
    /// scratch map is reserved for [`replace_chain`](Self::replace_chain).
    fn validate_block_transactions(&self, block: &Block) -> Result<(), ChainError> {
        self.structural_block_check(block)?;
        for tx in block.transactions.iter().skip(1) {
            if !self.validate_transaction(tx) {
                return Err(ChainError::invalid(
                    block.index,
                    format!("invalid transaction {}", tx.id),
                ));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transaction validation
    // -----------------------------------------------------------------------

    /// Validate a single transaction against current chain state.
    ///
    /// Coinbase transactions delegate to [`validate_coinbase`] at the
    /// next block height. Ordinary transactions need a sender, a
    /// recipient, a positive amount, a signature that verifies under the
    /// sender's key, and a confirmed balance covering the amount.
    pub fn validate_transaction(&self, tx: &Transaction) -> bool {
        if tx.is_coinbase {
            return self.validate_coinbase(tx, self.blocks.len() as u64);
        }
        if !tx.is_well_formed() {
            debug!(id = %tx.id, "rejecting malformed transaction");
            return false;
        }
        if tx.amount < config::MIN_TRANSACTION {
            debug!(id = %tx.id, amount = tx.amount, "rejecting dust transaction");
            return false;
        }
        if !tx.verify_signature() {
            debug!(id = %tx.id, "rejecting transaction with bad signature");
            return false;
        }
        // is_well_formed guarantees the sender is present here.
        let Some(sender) = tx.sender.as_deref() else {
            return false;
        };
        let confirmed = self.confirmed_balance(sender);
        if confirmed < tx.amount {
            debug!(
                id = %tx.id,
                confirmed,
                amount = tx.amount,
                "rejecting transaction: insufficient confirmed balance"
            );
            return false;
        }
        true
    }

    /// Validate a coinbase for a block at `block_index`: the coinbase
    /// shape, the exact halving-schedule amount, and a signature that
    /// verifies under the *recipient's* key.
    pub fn validate_coinbase(&self, tx: &Transaction, block_index: u64) -> bool {
        if !tx.is_coinbase || !tx.is_well_formed() {
            return false;
        }
        let expected = config::reward_for(block_index);
        if tx.amount != expected {
            debug!(
                id = %tx.id,
                amount = tx.amount,
                expected,
                "rejecting coinbase with off-schedule reward"
            );
            return false;
        }
        tx.verify_signature()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Balance snapshot for an address (zero for unknown addresses).
    /// Addresses are compared in normalized form.
    pub fn get_account_balance(&self, address: &str) -> AccountBalance {
        self.balances
            .get(&normalize_address(address))
            .copied()
            .unwrap_or_else(AccountBalance::zero)
    }

    /// Confirmed balance only — the figure every spend is checked against.
    pub fn confirmed_balance(&self, address: &str) -> f64 {
        self.get_account_balance(address).confirmed
    }

    /// Every transaction in chain order where the address is sender or
    /// recipient.
    pub fn get_transaction_history(&self, address: &str) -> Vec<Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| tx.touches(address))
            .cloned()
            .collect()
    }

    /// Confirmation entry for a transaction id, if it is on the chain.
    pub fn get_transaction_confirmation(&self, tx_id: &str) -> Option<ConfirmationEntry> {
        self.confirmations.get(tx_id).copied()
    }

    /// Total coins minted by coinbases over the whole chain.
    pub fn total_minted(&self) -> f64 {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| tx.is_coinbase)
            .map(|tx| tx.amount)
            .sum()
    }

    // -----------------------------------------------------------------------
    // Whole-chain validation & reorganization
    // -----------------------------------------------------------------------

    /// Validate the entire local sequence: genesis identity, linkage,
    /// proof of work, and transaction rules for every block.
    pub fn is_valid(&self) -> bool {
        if self.blocks.first() != Some(&Block::genesis(self.difficulty)) {
            return false;
        }
        for (i, block) in self.blocks.iter().enumerate().skip(1) {
            let parent = &self.blocks[i - 1];
            if block.index != i as u64
                || block.previous_hash != parent.hash
                || !block.verify_pow(self.difficulty)
            {
                return false;
            }
            if self.structural_block_check(block).is_err() {
                return false;
            }
        }
        true
    }

    /// Replace the local chain with a strictly longer valid one.
    ///
    /// The incoming chain is replayed block by block against a scratch
    /// balance map; a block whose coinbase is off-schedule, whose
    /// linkage or proof of work fails, or in which any sender overspends
    /// aborts the reorg with the offending height. Nothing is committed
    /// until the whole replay succeeds, at which point the scratch map
    /// becomes the balance index and every transaction gets a fresh
    /// confirmation entry.
    pub fn replace_chain(&mut self, new_chain: Vec<Block>) -> Result<(), ChainError> {
        if new_chain.len() <= self.blocks.len() {
            return Err(ChainError::NotLonger {
                ours: self.blocks.len(),
                theirs: new_chain.len(),
            });
        }
        if new_chain.first() != Some(&Block::genesis(self.difficulty)) {
            return Err(ChainError::GenesisMismatch);
        }

        // Replay against scratch state; commit nothing on failure.
        let mut scratch: HashMap<String, f64> = HashMap::new();
        for (i, block) in new_chain.iter().enumerate().skip(1) {
            let parent = &new_chain[i - 1];
            if block.index != i as u64 {
                return Err(ChainError::invalid(block.index, "index out of sequence"));
            }
            if block.previous_hash != parent.hash {
                return Err(ChainError::invalid(block.index, "previous_hash mismatch"));
            }
            if !block.verify_pow(self.difficulty) {
                return Err(ChainError::invalid(
                    block.index,
                    "hash does not satisfy proof of work",
                ));
            }
            self.structural_block_check(block)?;

            for tx in &block.transactions {
                let recipient = normalize_address(&tx.recipient);
                if tx.is_coinbase {
                    *scratch.entry(recipient).or_insert(0.0) += tx.amount;
                    continue;
                }
                // structural_block_check guarantees a sender here.
                let Some(sender) = tx.sender.as_deref() else {
                    return Err(ChainError::invalid(block.index, "transfer without sender"));
                };
                let sender = normalize_address(sender);
                let balance = scratch.get(&sender).copied().unwrap_or(0.0);
                if balance < tx.amount {
                    return Err(ChainError::Overspend {
                        height: block.index,
                        balance,
                        amount: tx.amount,
                    });
                }
                *scratch.entry(sender).or_insert(0.0) -= tx.amount;
                *scratch.entry(recipient).or_insert(0.0) += tx.amount;
            }
        }

        info!(
            old_len = self.blocks.len(),
            new_len = new_chain.len(),
            "replacing chain"
        );
        self.blocks = new_chain;
        let now = Utc::now().timestamp_millis() as u64;
        self.balances = scratch
            .into_iter()
            .map(|(address, confirmed)| {
                (
                    address,
                    AccountBalance {
                        confirmed,
                        pending: 0.0,
                        last_updated: now,
                    },
                )
            })
            .collect();
        self.rebuild_confirmations();
        Ok(())
    }

    /// Structure-and-signature rules for one block, without balance
    /// context: one leading coinbase with the scheduled reward, every
    /// transfer well-formed and signed.
    fn structural_block_check(&self, block: &Block) -> Result<(), ChainError> {
        if block.tx_count() > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(ChainError::invalid(block.index, "too many transactions"));
        }
        let coinbase_count = block
            .transactions
            .iter()
            .filter(|tx| tx.is_coinbase)
            .count();
        if coinbase_count != 1 {
            return Err(ChainError::invalid(
                block.index,
                format!("expected exactly one coinbase, found {coinbase_count}"),
            ));
        }
        let first = block
            .transactions
            .first()
            .ok_or_else(|| ChainError::invalid(block.index, "empty transaction list"))?;
        if !first.is_coinbase {
            return Err(ChainError::invalid(block.index, "coinbase must come first"));
        }
        if !self.validate_coinbase(first, block.index) {
            return Err(ChainError::invalid(block.index, "invalid coinbase"));
        }
        for tx in block.transactions.iter().skip(1) {
            if !tx.is_well_formed() || !tx.verify_signature() {
                return Err(ChainError::invalid(
                    block.index,
                    format!("invalid transaction {}", tx.id),
                ));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Derived indices
    // -----------------------------------------------------------------------

    /// Recompute both indices from the block sequence. Called inside the
    /// same critical section as every append, so readers never observe a
    /// chain and indices from different states.
    fn rebuild_indices(&mut self) {
        let now = Utc::now().timestamp_millis() as u64;
        let mut balances: HashMap<String, AccountBalance> = HashMap::new();

        for block in &self.blocks {
            for tx in &block.transactions {
                let recipient = normalize_address(&tx.recipient);
                balances
                    .entry(recipient)
                    .or_insert_with(AccountBalance::zero)
                    .confirmed += tx.amount;
                if let Some(sender) = tx.sender.as_deref() {
                    balances
                        .entry(normalize_address(sender))
                        .or_insert_with(AccountBalance::zero)
                        .confirmed -= tx.amount;
                }
            }
        }
        for balance in balances.values_mut() {
            balance.last_updated = now;
        }
        if balances.values().any(|b| b.confirmed < 0.0) {
            // A validated chain cannot drive any balance negative; if this
            // fires, validation has a hole and we want to hear about it.
            warn!("balance index went negative after rebuild");
        }
        self.balances = balances;
        self.rebuild_confirmations();
    }

    fn rebuild_confirmations(&mut self) {
        let tip_index = self.tip().index;
        let mut confirmations = HashMap::new();
        for block in &self.blocks {
            let depth = tip_index - block.index + 1;
            let status = if depth >= REQUIRED_CONFIRMATIONS {
                TransactionStatus::Final
            } else {
                TransactionStatus::Confirmed
            };
            for tx in &block.transactions {
                confirmations.insert(
                    tx.id.clone(),
                    ConfirmationEntry {
                        block_height: block.index,
                        confirmations: depth,
                        status,
                    },
                );
            }
        }
        self.confirmations = confirmations;
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new(config::INITIAL_DIFFICULTY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
