//! # Ledger
//!
//! The consensus data structures: transactions, blocks, and the chain
//! itself with its derived balance and confirmation indices.
//!
//! ```text
//! transaction.rs — signed value transfers and coinbases, canonical form
//! block.rs       — hash-linked batches, proof of work, the genesis block
//! chain.rs       — append / longest-chain replace, validation, indices
//! ```

pub mod block;
pub mod chain;
pub mod transaction;

pub use block::{meets_difficulty, Block};
pub use chain::{AccountBalance, Blockchain, ChainError, ConfirmationEntry};
pub use transaction::{Transaction, TransactionStatus};
