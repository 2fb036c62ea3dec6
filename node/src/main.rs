// Copyright (c) 2026 Ember Contributors. MIT License.
// See LICENSE for details.

//! # Ember Node
//!
//! Entry point for the `ember-node` binary. Parses CLI arguments,
//! initializes logging, and runs one of three roles over the shared wire
//! protocol:
//!
//! - `start-node` — a plain relay: gossips blocks and transactions,
//!   serves chain and mempool requests, holds no keys.
//! - `mining-node` — a relay plus the mining driver, rewarding the
//!   identity in an encrypted wallet file.
//! - wallet commands (`check-balance`, `send-transaction`,
//!   `view-mempool`, `connect-wallet`, …) — short-lived clients that
//!   attach to a running node, do one thing, and exit.
//!
//! Every error path exits non-zero with context; long-running roles stop
//! on Ctrl+C or SIGTERM.

mod cli;
mod logging;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use tokio::signal;
use tracing::{info, warn};

use ember_protocol::config::INITIAL_DIFFICULTY;
use ember_protocol::identity::IdentityStore;
use ember_protocol::ledger::Blockchain;
use ember_protocol::network::{random_node_id, Mempool, MiningDriver, NetworkManager};
use ember_protocol::wallet::WalletClient;
use ember_protocol::{address_fingerprint, Keypair, TransactionStatus};

use cli::{Commands, EmberCli};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = EmberCli::parse();
    logging::init_logging(
        &format!(
            "ember_node={level},ember_protocol={level}",
            level = cli.log_level
        ),
        LogFormat::from_str_lossy(&cli.log_format),
    );

    match cli.command {
        Commands::CreateWallet { password, path } => create_wallet(password, path).await,
        Commands::StartNode { port, peer } => run_node(port, peer, None).await,
        Commands::MiningNode {
            port,
            path,
            password,
            difficulty,
            peer,
        } => {
            let keypair = load_mining_identity(&path, &password)?;
            run_node(port, peer, Some((keypair, difficulty))).await
        }
        Commands::ConnectWallet {
            path,
            password,
            node,
        } => connect_wallet(path, password, node).await,
        Commands::CheckBalance {
            path,
            password,
            node,
        } => check_balance(path, password, node).await,
        Commands::SendTransaction {
            path,
            password,
            node,
            recipient_key_file,
            amount,
        } => send_transaction(path, password, node, recipient_key_file, amount).await,
        Commands::ViewMempool { node } => view_mempool(node).await,
        Commands::ShowKeys { path, password } => show_keys(path, password),
    }
}

// ---------------------------------------------------------------------------
// Node roles
// ---------------------------------------------------------------------------

/// Run a relay node, optionally with a mining driver attached.
async fn run_node(
    port: u16,
    peer: Option<String>,
    mining: Option<(Keypair, Option<usize>)>,
) -> Result<()> {
    let difficulty = mining
        .as_ref()
        .and_then(|(_, d)| *d)
        .unwrap_or(INITIAL_DIFFICULTY);

    let chain = Arc::new(RwLock::new(Blockchain::new(difficulty)));
    let mempool = Arc::new(Mempool::default());
    let node_id = random_node_id();

    let listen_addr = format!("127.0.0.1:{port}");
    let manager = NetworkManager::start(&listen_addr, node_id.clone(), chain, mempool)
        .await
        .with_context(|| format!("failed to start node on {listen_addr}"))?;

    info!(
        node_id = %node_id,
        addr = %manager.transport().listening_address(),
        difficulty,
        "node started"
    );

    if let Some(peer) = peer {
        // A dead bootstrap peer is not fatal: the node is still useful
        // alone, and discovery can bring the network to us later.
        if let Err(e) = manager.dial(&peer).await {
            warn!(peer = %peer, error = %e, "bootstrap dial failed");
        }
    }

    if let Some((keypair, _)) = mining {
        info!(
            miner = %address_fingerprint(keypair.public_pem()),
            "starting mining driver"
        );
        MiningDriver::new(Arc::clone(&manager), keypair).spawn();
    }

    shutdown_signal().await;
    info!("shutdown signal received, stopping node");
    Ok(())
}

/// Decrypt the wallet file and reconstruct the mining keypair.
fn load_mining_identity(path: &std::path::Path, password: &str) -> Result<Keypair> {
    let store = IdentityStore::new(path);
    let identity = store
        .load_primary(password)
        .with_context(|| format!("failed to open identity store {}", path.display()))?;
    store
        .mark_used(password, &identity.id)
        .context("failed to update identity store")?;
    identity
        .keypair()
        .context("identity store holds an unusable private key")
}

// ---------------------------------------------------------------------------
// Wallet commands
// ---------------------------------------------------------------------------

async fn create_wallet(password: String, path: std::path::PathBuf) -> Result<()> {
    // RSA keygen takes a moment; keep it off the async runtime threads.
    let identity = tokio::task::spawn_blocking(move || {
        IdentityStore::new(&path).create(&password, None).map(|i| (i, path))
    })
    .await
    .context("wallet creation task failed")?;
    let (identity, path) = identity.context("failed to create wallet")?;

    println!("Wallet created.");
    println!("  Path        : {}", path.display());
    println!("  Identity id : {}", identity.id);
    println!("  Address     : {}", address_fingerprint(&identity.public_key));
    println!();
    println!("{}", identity.public_key);
    Ok(())
}

async fn connect_wallet(
    path: std::path::PathBuf,
    password: String,
    node: String,
) -> Result<()> {
    let store = IdentityStore::new(&path);
    let identity = store
        .load_primary(&password)
        .with_context(|| format!("failed to open identity store {}", path.display()))?;
    store
        .mark_used(&password, &identity.id)
        .context("failed to update identity store")?;

    let mut wallet = WalletClient::connect(&node, identity.id.clone())
        .await
        .with_context(|| format!("failed to attach to node {node}"))?;
    let (confirmed, pending) = wallet
        .balance_of(&identity.public_key)
        .await
        .context("failed to query balance")?;

    println!("Wallet attached to {node}.");
    println!("  Identity id : {}", identity.id);
    if let Some(name) = &identity.name {
        println!("  Name        : {name}");
    }
    println!("  Address     : {}", address_fingerprint(&identity.public_key));
    println!("  Confirmed   : {confirmed:.8}");
    println!("  Pending     : {pending:+.8}");
    Ok(())
}

async fn check_balance(path: std::path::PathBuf, password: String, node: String) -> Result<()> {
    let identity = IdentityStore::new(&path)
        .load_primary(&password)
        .with_context(|| format!("failed to open identity store {}", path.display()))?;

    let mut wallet = WalletClient::connect(&node, identity.id.clone())
        .await
        .with_context(|| format!("failed to attach to node {node}"))?;
    let (confirmed, pending) = wallet
        .balance_of(&identity.public_key)
        .await
        .context("failed to query balance")?;

    println!("Balance of {}:", address_fingerprint(&identity.public_key));
    println!("  Confirmed : {confirmed:.8}");
    println!("  Pending   : {pending:+.8}");
    Ok(())
}

async fn send_transaction(
    path: std::path::PathBuf,
    password: String,
    node: String,
    recipient_key_file: std::path::PathBuf,
    amount: f64,
) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        bail!("amount must be a positive number, got {amount}");
    }
    let identity = IdentityStore::new(&path)
        .load_primary(&password)
        .with_context(|| format!("failed to open identity store {}", path.display()))?;
    let keypair = identity
        .keypair()
        .context("identity store holds an unusable private key")?;
    let recipient = std::fs::read_to_string(&recipient_key_file).with_context(|| {
        format!(
            "failed to read recipient key file {}",
            recipient_key_file.display()
        )
    })?;

    let mut wallet = WalletClient::connect(&node, identity.id.clone())
        .await
        .with_context(|| format!("failed to attach to node {node}"))?;
    let tx = wallet
        .submit_transaction(&keypair, recipient.trim(), amount)
        .await
        .context("failed to submit transaction")?;

    // Give the node a beat to admit (or refuse) it, then report.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let status = wallet
        .transaction_status(&tx.id)
        .await
        .unwrap_or(TransactionStatus::Pending);

    println!("Transaction submitted.");
    println!("  Id     : {}", tx.id);
    println!("  To     : {}", address_fingerprint(&tx.recipient));
    println!("  Amount : {amount:.8}");
    println!("  Status : {status}");
    if status == TransactionStatus::Rejected {
        bail!("node rejected the transaction (bad signature or insufficient balance)");
    }
    Ok(())
}

async fn view_mempool(node: String) -> Result<()> {
    let mut wallet = WalletClient::connect(&node, random_node_id())
        .await
        .with_context(|| format!("failed to attach to node {node}"))?;
    let transactions = wallet
        .fetch_mempool()
        .await
        .context("failed to fetch mempool")?;

    println!("{} pending transaction(s) on {node}:", transactions.len());
    for tx in transactions {
        let from = tx
            .sender
            .as_deref()
            .map(address_fingerprint)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {} -> {}  {:.8}",
            tx.id,
            from,
            address_fingerprint(&tx.recipient),
            tx.amount
        );
    }
    Ok(())
}

fn show_keys(path: std::path::PathBuf, password: String) -> Result<()> {
    let identities = IdentityStore::new(&path)
        .load(&password)
        .with_context(|| format!("failed to open identity store {}", path.display()))?;

    for identity in identities {
        println!("Identity {}:", identity.id);
        if let Some(name) = &identity.name {
            println!("  Name: {name}");
        }
        println!("{}", identity.public_key);
        println!("{}", identity.private_key);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Wait for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            // No signal handler means no clean shutdown path; park forever
            // rather than spinning.
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
