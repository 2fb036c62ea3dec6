//! # Protocol Configuration & Constants
//!
//! Every magic number in Ember lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values define the consensus rules of the network. Two nodes that
//! disagree on any of them will fork and never reconcile, so changing one
//! after the first block is mined is a hard fork whether you meant it or not.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Monetary Policy
// ---------------------------------------------------------------------------

/// Block reward at height 1, in whole coins. Halves every
/// [`HALVING_INTERVAL`] blocks, Bitcoin-style.
pub const INITIAL_REWARD: f64 = 50.0;

/// Number of blocks between reward halvings. At 210,000 blocks and a
/// 10-minute target this is roughly four years — we kept Satoshi's
/// schedule because it is the one everybody can do in their head.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Hard ceiling on total supply, in whole coins. The halving schedule
/// asymptotically approaches this; nothing in the code ever mints past it.
pub const MAX_SUPPLY: f64 = 21_000_000.0;

/// Smallest transferable amount. Anything below this is dust and is
/// rejected at validation time.
pub const MIN_TRANSACTION: f64 = 1e-8;

/// Returns the coinbase reward for a block at the given height.
///
/// `INITIAL_REWARD / 2^(index / HALVING_INTERVAL)`. After enough halvings
/// the reward underflows to zero, which is exactly what should happen —
/// the schedule is self-terminating.
pub fn reward_for(index: u64) -> f64 {
    let halvings = (index / HALVING_INTERVAL) as i32;
    INITIAL_REWARD / 2f64.powi(halvings)
}

// ---------------------------------------------------------------------------
// Proof of Work
// ---------------------------------------------------------------------------

/// Default mining difficulty: the number of leading hex-zero nibbles a
/// valid block hash must carry. Difficulty is fixed at chain construction;
/// there is deliberately no retargeting algorithm.
pub const INITIAL_DIFFICULTY: usize = 4;

/// Target spacing between blocks. Documented for operators; with fixed
/// difficulty the actual spacing is whatever your CPU makes of it.
pub const TARGET_BLOCK_TIME: Duration = Duration::from_secs(600);

/// Interval between mining attempts on an idle miner.
pub const MINING_TICK: Duration = Duration::from_secs(10);

/// Genesis timestamp, milliseconds since the Unix epoch. Every chain in
/// the network starts from the same bit-identical genesis block, and this
/// is part of it.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000_000;

/// Miner field of the genesis block. Not a real key — a sentinel.
pub const GENESIS_MINER: &str = "GENESIS";

// ---------------------------------------------------------------------------
// Blocks & Confirmations
// ---------------------------------------------------------------------------

/// Maximum number of transactions in one block, coinbase included.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 2000;

/// Depth at which a transaction is considered final. Six, because
/// tradition is a consensus rule too.
pub const REQUIRED_CONFIRMATIONS: u64 = 6;

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

/// Absolute upper bound on mempool capacity. Construction clamps to this.
pub const MEMPOOL_MAX_TRANSACTIONS: usize = 5000;

/// Default mempool capacity — one block's worth of transactions.
pub const MEMPOOL_DEFAULT_CAPACITY: usize = MAX_TRANSACTIONS_PER_BLOCK;

/// Age past which a pending transaction is dropped, in milliseconds.
/// One hour. If it has not confirmed by then, resubmit it.
pub const TRANSACTION_TIMEOUT_MS: u64 = 3_600_000;

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// Listening address a wallet connection declares in its handshake.
/// Port zero is not dialable, which is the point: wallets are leaf
/// connections, never gossiped to other peers.
pub const WALLET_SENTINEL_ADDRESS: &str = "localhost:0";

/// How long a wallet waits to establish a TCP connection to its node.
pub const WALLET_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a caller waits for a `CHAIN_RESPONSE` / `MEMPOOL_RESPONSE`
/// after sending the corresponding request.
pub const SYNC_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between mempool expiry sweeps on a running node.
pub const MEMPOOL_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Identity Store
// ---------------------------------------------------------------------------

/// PBKDF2-HMAC-SHA256 iteration count for the identity-store key.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt length for the identity-store KDF, in bytes.
pub const SALT_LENGTH: usize = 16;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits — the standard, and the
/// only length you should use.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Minimum accepted wallet password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_schedule_starts_at_initial() {
        assert_eq!(reward_for(0), INITIAL_REWARD);
        assert_eq!(reward_for(1), INITIAL_REWARD);
        assert_eq!(reward_for(HALVING_INTERVAL - 1), INITIAL_REWARD);
    }

    #[test]
    fn reward_halves_on_schedule() {
        assert_eq!(reward_for(HALVING_INTERVAL), INITIAL_REWARD / 2.0);
        assert_eq!(reward_for(2 * HALVING_INTERVAL), INITIAL_REWARD / 4.0);
        assert_eq!(reward_for(3 * HALVING_INTERVAL), INITIAL_REWARD / 8.0);
    }

    #[test]
    fn reward_schedule_respects_max_supply() {
        // Sum every reward era: the emitted total must stay under the cap.
        let mut total = 0.0;
        let mut era = 0u64;
        loop {
            let reward = reward_for(era * HALVING_INTERVAL);
            if reward < MIN_TRANSACTION {
                break;
            }
            total += reward * HALVING_INTERVAL as f64;
            era += 1;
        }
        assert!(total <= MAX_SUPPLY);
    }

    #[test]
    fn mempool_bounds_are_ordered() {
        assert!(MEMPOOL_DEFAULT_CAPACITY <= MEMPOOL_MAX_TRANSACTIONS);
        assert_eq!(MEMPOOL_DEFAULT_CAPACITY, MAX_TRANSACTIONS_PER_BLOCK);
    }

    #[test]
    fn timing_constants_sanity() {
        assert!(MINING_TICK < TARGET_BLOCK_TIME);
        assert!(WALLET_CONNECT_TIMEOUT < SYNC_RESPONSE_TIMEOUT);
    }

    #[test]
    fn crypto_parameter_sizes() {
        assert_eq!(AES_KEY_LENGTH, 32);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(AES_TAG_LENGTH, 16);
        assert_eq!(SALT_LENGTH, 16);
    }
}
