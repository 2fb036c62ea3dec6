// Copyright (c) 2026 Ember Contributors. MIT License.
// See LICENSE for details.

//! # Ember Protocol — Core Library
//!
//! Ember is a minimal proof-of-work cryptocurrency: a peer-to-peer
//! network of processes maintaining an append-only, hash-linked ledger
//! of signed value transfers. Plain relays, miners, and wallet clients
//! share this one library and one wire protocol.
//!
//! No UTXOs, no fee market, no difficulty retargeting, no light clients.
//! What is left is the part that actually has to be right: longest-chain
//! consensus over an adversarial wire.
//!
//! ## Architecture
//!
//! The modules mirror the actual concerns of a coin:
//!
//! - **crypto** — SHA-256, RSA-2048/PEM signatures, AES-256-GCM storage
//!   encryption. Don't roll your own.
//! - **identity** — keypairs with metadata, encrypted at rest. Your
//!   keys, your money.
//! - **ledger** — transactions, blocks, proof of work, and the chain
//!   with its balance and confirmation indices.
//! - **network** — framed-JSON TCP transport, the gossip state machine,
//!   the mempool, and the mining driver.
//! - **wallet** — the attach-to-a-node client with gossip suppressed.
//! - **config** — every protocol constant, in one place.
//!
//! ## Design Philosophy
//!
//! 1. The block sequence is the only authoritative state; everything
//!    else is a cache rebuilt from it.
//! 2. The wire is adversarial: malformed input costs a connection,
//!    never a panic.
//! 3. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod identity;
pub mod ledger;
pub mod network;
pub mod wallet;

pub use crypto::{address_fingerprint, normalize_address, Keypair};
pub use identity::{Identity, IdentityStore};
pub use ledger::{AccountBalance, Block, Blockchain, ChainError, Transaction, TransactionStatus};
pub use network::{
    Mempool, MempoolConfig, MempoolError, MiningDriver, NetworkManager, NodeEvent, Payload,
};
pub use wallet::{WalletClient, WalletError};
