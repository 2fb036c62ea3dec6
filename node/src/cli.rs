//! # CLI Interface
//!
//! Command-line argument structure for `ember-node` using `clap` derive.
//! One binary, three roles: relay (`start-node`), miner (`mining-node`),
//! and the wallet commands that attach to a running node.
//!
//! Every configurable value has an environment-variable fallback for
//! container-friendly deployment — nobody wants to pass a password on a
//! Docker command line twice.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ember proof-of-work cryptocurrency node.
///
/// Relay blocks and transactions, mine with a local identity, or attach
/// a wallet to a running node — all over one wire protocol.
#[derive(Parser, Debug)]
#[command(
    name = "ember-node",
    about = "Ember proof-of-work cryptocurrency node",
    version,
    propagate_version = true
)]
pub struct EmberCli {
    /// Log verbosity level: trace, debug, info, warn, error.
    #[arg(long, env = "EMBER_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, env = "EMBER_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Ember binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a fresh identity and write it to an encrypted wallet file.
    CreateWallet {
        /// Password protecting the wallet file (minimum 8 characters).
        password: String,
        /// Path of the wallet file to create.
        path: PathBuf,
    },

    /// Start a relay node: accepts peers, gossips, holds no identity.
    StartNode {
        /// Port to listen on.
        port: u16,
        /// Optional bootstrap peer to dial, e.g. `127.0.0.1:9001`.
        peer: Option<String>,
    },

    /// Attach a wallet to a running node and print its identity summary
    /// and balance.
    ConnectWallet {
        /// Path of the encrypted wallet file.
        path: PathBuf,
        /// Wallet password.
        password: String,
        /// Address of the node, e.g. `127.0.0.1:9001`.
        node: String,
    },

    /// Start a mining node: a full relay plus block production rewarding
    /// the wallet's identity.
    MiningNode {
        /// Port to listen on.
        port: u16,
        /// Path of the encrypted wallet file holding the mining identity.
        path: PathBuf,
        /// Wallet password.
        password: String,
        /// Mining difficulty (leading hex zeros). Defaults to 4.
        difficulty: Option<usize>,
        /// Optional bootstrap peer to dial.
        peer: Option<String>,
    },

    /// Print the confirmed and pending balance of the wallet's identity.
    CheckBalance {
        /// Path of the encrypted wallet file.
        path: PathBuf,
        /// Wallet password.
        password: String,
        /// Address of the node to query.
        node: String,
    },

    /// Sign a transfer with the wallet's identity and submit it.
    SendTransaction {
        /// Path of the encrypted wallet file.
        path: PathBuf,
        /// Wallet password.
        password: String,
        /// Address of the node to submit through.
        node: String,
        /// File containing the recipient's PEM public key.
        recipient_key_file: PathBuf,
        /// Amount to transfer, in whole coins.
        amount: f64,
    },

    /// Print the pending transactions a node currently holds.
    ViewMempool {
        /// Address of the node to query.
        node: String,
    },

    /// Decrypt a wallet file and print its key material.
    ShowKeys {
        /// Path of the encrypted wallet file.
        path: PathBuf,
        /// Wallet password.
        password: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
