//! # Mining Driver
//!
//! Turns a node into a miner. The driver owns the mining identity,
//! holds a manager handle, and runs a simple loop:
//!
//! ```text
//! every tick:
//!   1. snapshot the tip
//!   2. build [coinbase, ...oldest pending] against it
//!   3. search for a nonce on a blocking worker
//!   4. on success: re-validate as if received, append, purge, broadcast
//! ```
//!
//! ## Preemption
//!
//! The driver subscribes to [`NodeEvent`]s. Any event — a peer's block
//! accepted, a chain replacement — means the tip the worker is mining
//! against is stale, so the cancel flag is tripped and the in-flight
//! search stops at its next hashing iteration. The next tick starts over
//! against the new tip. If the worker wins the race and its block no
//! longer extends the tip, validation at append time rejects it and the
//! block is quietly discarded — losing a race is not an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::{MAX_TRANSACTIONS_PER_BLOCK, MINING_TICK};
use crate::crypto::keys::Keypair;
use crate::ledger::{Block, Transaction};
use crate::network::manager::{NetworkManager, NodeEvent};

/// Drives block production against a running [`NetworkManager`].
pub struct MiningDriver {
    manager: Arc<NetworkManager>,
    keypair: Keypair,
}

impl MiningDriver {
    /// Create a driver that mints rewards to `keypair`'s address.
    pub fn new(manager: Arc<NetworkManager>, keypair: Keypair) -> Self {
        Self { manager, keypair }
    }

    /// Start the mining loop on the runtime. The task runs until the
    /// process shuts down.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut events = self.manager.subscribe();
        let mut tick = tokio::time::interval(MINING_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            miner = %crate::crypto::address_fingerprint(self.keypair.public_pem()),
            "mining driver started"
        );

        loop {
            tick.tick().await;
            // Drain events (and lag markers) that piled up between
            // attempts; they only mean "the tip moved", and we are about
            // to re-read the tip anyway.
            loop {
                match events.try_recv() {
                    Ok(_) => continue,
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            self.attempt(&mut events).await;
        }
    }

    /// One mining attempt: build a candidate at the current tip and race
    /// the nonce search against incoming node events.
    async fn attempt(&self, events: &mut broadcast::Receiver<NodeEvent>) {
        let (mut candidate, difficulty) = self.build_candidate();
        let height = candidate.index;
        let txs = candidate.tx_count();

        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let worker = tokio::task::spawn_blocking(move || {
            let mined = candidate.mine(difficulty, &worker_cancel);
            (mined, candidate)
        });

        debug!(height, txs, difficulty, "mining candidate");

        tokio::select! {
            result = worker => {
                let Ok((mined, block)) = result else {
                    return;
                };
                if !mined {
                    return;
                }
                match self.manager.accept_mined_block(block.clone()) {
                    Ok(()) => {
                        info!(height, hash = %block.hash, txs, "mined block");
                    }
                    Err(e) => {
                        // Lost the race: a peer's block landed first.
                        debug!(height, error = %e, "discarding stale mined block");
                    }
                }
            }
            event = events.recv() => {
                // Any event (or even a lagged channel) means the tip is
                // stale. Cancel and let the next tick rebuild.
                cancel.store(true, Ordering::Relaxed);
                match event {
                    Ok(ev) => debug!(?ev, "mining preempted"),
                    Err(_) => debug!("mining preempted (event stream lagged)"),
                }
            }
        }
    }

    /// Snapshot the tip and assemble `[coinbase, ...oldest pending]`.
    ///
    /// Pending transactions are re-validated against the current tip
    /// before inclusion: a reorg can strand entries that were valid at
    /// admission time, and one stranded entry must not poison every
    /// candidate until it expires. Failures are dropped from the pool.
    fn build_candidate(&self) -> (Block, usize) {
        let chain = self.manager.chain().read();
        let index = chain.tip().index + 1;

        let coinbase = Transaction::coinbase(&self.keypair, index);
        let reward = coinbase.amount;

        let pending = self
            .manager
            .mempool()
            .get_transactions(MAX_TRANSACTIONS_PER_BLOCK - 1);
        let mut transactions = vec![coinbase];
        let mut stranded = Vec::new();
        for tx in pending {
            if chain.validate_transaction(&tx) {
                transactions.push(tx);
            } else {
                stranded.push(tx.id.clone());
            }
        }
        if !stranded.is_empty() {
            debug!(dropped = stranded.len(), "dropping stranded mempool entries");
            self.manager.mempool().remove_transactions(&stranded);
        }

        let candidate = chain.candidate(
            transactions,
            self.keypair.public_pem().to_string(),
            reward,
        );
        (candidate, chain.difficulty())
    }
}
