//! # Wallet Client
//!
//! The wallet side of the wallet↔node attachment: a connection class
//! with gossip suppressed. A wallet dials a node, handshakes with the
//! `localhost:0` sentinel so the node files it away from the peer table,
//! and then speaks plain request/response over the same frame
//! vocabulary the nodes use among themselves.
//!
//! Wallets never relay anything: the node excludes wallet connections
//! from every broadcast, and the wallet ignores any frame it did not ask
//! for. Holding a private key and holding gossip duties in the same
//! process is how keys end up in places they shouldn't be.
//!
//! Timeouts: 5 s to establish the connection, 10 s per request/response
//! exchange. A wallet that cannot reach its node reports that and exits;
//! there is no retry loop to wedge a terminal on.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use thiserror::Error;
use tracing::debug;

use crate::config::{SYNC_RESPONSE_TIMEOUT, WALLET_CONNECT_TIMEOUT, WALLET_SENTINEL_ADDRESS};
use crate::crypto::keys::{normalize_address, Keypair};
use crate::ledger::{Block, Transaction, TransactionStatus};
use crate::network::message::{Frame, Payload};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Wallet-side failures. All of them end the command; a wallet with a
/// dead node connection has nothing useful left to do.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("could not connect to node {addr} within {:?}", WALLET_CONNECT_TIMEOUT)]
    ConnectTimeout { addr: String },

    #[error("could not connect to node {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("node closed the connection")]
    ConnectionClosed,

    #[error("timed out waiting for {expected} from the node")]
    ResponseTimeout { expected: &'static str },

    #[error("i/o error talking to the node: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// WalletClient
// ---------------------------------------------------------------------------

/// One attached wallet connection to one node.
pub struct WalletClient {
    wallet_id: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl WalletClient {
    /// Dial a node and complete the sentinel handshake.
    ///
    /// `wallet_id` identifies this wallet on the node's side; the
    /// identity id is the natural choice.
    pub async fn connect(node_addr: &str, wallet_id: String) -> Result<Self, WalletError> {
        let stream = match timeout(WALLET_CONNECT_TIMEOUT, TcpStream::connect(node_addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(WalletError::Connect {
                    addr: node_addr.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(WalletError::ConnectTimeout {
                    addr: node_addr.to_string(),
                })
            }
        };

        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            wallet_id,
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        client
            .send(Payload::Handshake {
                node_id: client.wallet_id.clone(),
                listening_address: WALLET_SENTINEL_ADDRESS.to_string(),
            })
            .await?;
        // The node handshakes back; consume it before the first request.
        client
            .receive(WALLET_CONNECT_TIMEOUT, "HANDSHAKE", |payload| {
                matches!(payload, Payload::Handshake { .. }).then_some(())
            })
            .await?;

        debug!(wallet = %client.wallet_id, node = node_addr, "wallet attached");
        Ok(client)
    }

    /// Request the node's full chain.
    pub async fn fetch_chain(&mut self) -> Result<Vec<Block>, WalletError> {
        self.send(Payload::ChainRequest).await?;
        self.receive(SYNC_RESPONSE_TIMEOUT, "CHAIN_RESPONSE", |payload| {
            match payload {
                Payload::ChainResponse { chain } => Some(chain),
                _ => None,
            }
        })
        .await
    }

    /// Request the node's current mempool.
    pub async fn fetch_mempool(&mut self) -> Result<Vec<Transaction>, WalletError> {
        self.send(Payload::MempoolRequest).await?;
        self.receive(SYNC_RESPONSE_TIMEOUT, "MEMPOOL_RESPONSE", |payload| {
            match payload {
                Payload::MempoolResponse { transactions } => Some(transactions),
                _ => None,
            }
        })
        .await
    }

    /// Construct, sign, and submit a transfer. Returns the transaction
    /// so the caller can track its id; admission happens on the node.
    pub async fn submit_transaction(
        &mut self,
        sender: &Keypair,
        recipient: &str,
        amount: f64,
    ) -> Result<Transaction, WalletError> {
        let tx = Transaction::transfer(sender, recipient, amount);
        self.send(Payload::Transaction {
            transaction: tx.clone(),
        })
        .await?;
        Ok(tx)
    }

    /// Confirmed-plus-pending balance of an address, as the node sees it.
    pub async fn balance_of(&mut self, address: &str) -> Result<(f64, f64), WalletError> {
        let chain = self.fetch_chain().await?;
        let mempool = self.fetch_mempool().await?;
        Ok((
            confirmed_balance(&chain, address),
            pending_delta(&mempool, address),
        ))
    }

    /// Where a transaction stands: `CONFIRMED` on the chain, `PENDING`
    /// in the mempool, `REJECTED` if known to neither.
    pub async fn transaction_status(
        &mut self,
        tx_id: &str,
    ) -> Result<TransactionStatus, WalletError> {
        let chain = self.fetch_chain().await?;
        if chain
            .iter()
            .flat_map(|b| b.transactions.iter())
            .any(|tx| tx.id == tx_id)
        {
            return Ok(TransactionStatus::Confirmed);
        }
        let mempool = self.fetch_mempool().await?;
        if mempool.iter().any(|tx| tx.id == tx_id) {
            return Ok(TransactionStatus::Pending);
        }
        Ok(TransactionStatus::Rejected)
    }

    // -----------------------------------------------------------------------
    // Framing
    // -----------------------------------------------------------------------

    async fn send(&mut self, payload: Payload) -> Result<(), WalletError> {
        let mut line = Frame::new(payload, self.wallet_id.clone()).to_line();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Read frames until `extract` accepts one or the deadline passes.
    /// Unsolicited frames (late responses, stray gossip) are skipped.
    async fn receive<T>(
        &mut self,
        window: std::time::Duration,
        expected: &'static str,
        extract: impl Fn(Payload) -> Option<T>,
    ) -> Result<T, WalletError> {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WalletError::ResponseTimeout { expected });
            }
            let mut line = String::new();
            let read = timeout(remaining, self.reader.read_line(&mut line)).await;
            match read {
                Ok(Ok(0)) => return Err(WalletError::ConnectionClosed),
                Ok(Ok(_)) => {
                    let Some(frame) = Frame::from_line(&line) else {
                        continue;
                    };
                    if let Some(value) = extract(frame.payload) {
                        return Ok(value);
                    }
                }
                Ok(Err(e)) => return Err(WalletError::Io(e)),
                Err(_) => return Err(WalletError::ResponseTimeout { expected }),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Balance folds over wire data
// ---------------------------------------------------------------------------

/// Confirmed balance of an address over a received chain: credits
/// (coinbases and transfers in) minus debits (transfers out), compared
/// in normalized form.
pub fn confirmed_balance(chain: &[Block], address: &str) -> f64 {
    let address = normalize_address(address);
    let mut balance = 0.0;
    for tx in chain.iter().flat_map(|b| b.transactions.iter()) {
        if normalize_address(&tx.recipient) == address {
            balance += tx.amount;
        }
        if let Some(sender) = tx.sender.as_deref() {
            if normalize_address(sender) == address {
                balance -= tx.amount;
            }
        }
    }
    balance
}

/// Net pending effect of a received mempool on an address.
pub fn pending_delta(mempool: &[Transaction], address: &str) -> f64 {
    let address = normalize_address(address);
    let mut delta = 0.0;
    for tx in mempool {
        if normalize_address(&tx.recipient) == address {
            delta += tx.amount;
        }
        if let Some(sender) = tx.sender.as_deref() {
            if normalize_address(sender) == address {
                delta -= tx.amount;
            }
        }
    }
    delta
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::INITIAL_REWARD;
    use crate::ledger::Blockchain;
    use crate::network::mempool::Mempool;
    use crate::network::manager::NetworkManager;
    use parking_lot::RwLock;
    use std::sync::{Arc, OnceLock};

    fn alice() -> &'static Keypair {
        static KP: OnceLock<Keypair> = OnceLock::new();
        KP.get_or_init(|| Keypair::generate().unwrap())
    }

    fn bob() -> &'static Keypair {
        static KP: OnceLock<Keypair> = OnceLock::new();
        KP.get_or_init(|| Keypair::generate().unwrap())
    }

    /// A node whose chain has one block mined by Alice.
    async fn funded_node() -> Arc<NetworkManager> {
        let mut chain = Blockchain::new(1);
        let coinbase = Transaction::coinbase(alice(), 1);
        let reward = coinbase.amount;
        chain
            .create_block(vec![coinbase], alice().public_pem().to_string(), reward)
            .unwrap();
        NetworkManager::start(
            "127.0.0.1:0",
            "funded-node".to_string(),
            Arc::new(RwLock::new(chain)),
            Arc::new(Mempool::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn wallet_attaches_and_fetches_chain() {
        let node = funded_node().await;
        let mut wallet =
            WalletClient::connect(node.transport().listening_address(), "wallet-1".to_string())
                .await
                .unwrap();

        let chain = wallet.fetch_chain().await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].index, 0);

        // The wallet is tracked separately from peers.
        assert_eq!(node.transport().peer_count(), 0);
        assert_eq!(node.transport().wallet_count(), 1);
    }

    #[tokio::test]
    async fn balance_reflects_chain_and_mempool() {
        let node = funded_node().await;
        let mut wallet =
            WalletClient::connect(node.transport().listening_address(), "wallet-2".to_string())
                .await
                .unwrap();

        let (confirmed, pending) = wallet.balance_of(alice().public_pem()).await.unwrap();
        assert_eq!(confirmed, INITIAL_REWARD);
        assert_eq!(pending, 0.0);

        let tx = wallet
            .submit_transaction(alice(), bob().public_pem(), 30.0)
            .await
            .unwrap();

        // Poll until the node has admitted the transaction.
        let mut status = TransactionStatus::Rejected;
        for _ in 0..50 {
            status = wallet.transaction_status(&tx.id).await.unwrap();
            if status == TransactionStatus::Pending {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(status, TransactionStatus::Pending);

        let (confirmed, pending) = wallet.balance_of(bob().public_pem()).await.unwrap();
        assert_eq!(confirmed, 0.0);
        assert_eq!(pending, 30.0);
    }

    #[tokio::test]
    async fn foreign_signature_never_enters_the_mempool() {
        let node = funded_node().await;
        let mut wallet =
            WalletClient::connect(node.transport().listening_address(), "wallet-3".to_string())
                .await
                .unwrap();

        // Bob signs a transfer that names Alice as the sender. The node
        // must refuse it: the signature is not Alice's.
        let mut forged = Transaction::transfer(bob(), bob().public_pem(), 10.0);
        forged.sender = Some(alice().public_pem().to_string());
        wallet
            .send(Payload::Transaction {
                transaction: forged.clone(),
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(node.mempool().is_empty());
        assert_eq!(
            wallet.transaction_status(&forged.id).await.unwrap(),
            TransactionStatus::Rejected
        );
    }

    #[tokio::test]
    async fn connect_to_dead_node_fails_fast() {
        let result = WalletClient::connect("127.0.0.1:1", "wallet-4".to_string()).await;
        assert!(matches!(
            result,
            Err(WalletError::Connect { .. }) | Err(WalletError::ConnectTimeout { .. })
        ));
    }

    #[test]
    fn balance_folds_normalize_addresses() {
        let mut chain = Blockchain::new(1);
        let coinbase = Transaction::coinbase(alice(), 1);
        let reward = coinbase.amount;
        chain
            .create_block(vec![coinbase], alice().public_pem().to_string(), reward)
            .unwrap();

        let mangled = alice().public_pem().replace('\n', "\r\n");
        assert_eq!(
            confirmed_balance(chain.blocks(), &mangled),
            INITIAL_REWARD
        );
    }
}
