//! # Network Manager
//!
//! The glue state machine that turns transport events into consensus
//! actions. It owns the chain and the mempool, consumes the transport's
//! event stream, and implements the gossip protocol:
//!
//! - **Discovery** — a new peer is announced to everyone else, and every
//!   advertised address we have not seen gets an optimistic dial.
//! - **Sync** — every new peer is immediately asked for its chain; a
//!   received chain replaces ours only when strictly longer and fully
//!   valid.
//! - **Propagation** — accepted blocks and admitted transactions are
//!   re-broadcast to every peer except the one that sent them (and never
//!   to wallets).
//!
//! Chain mutations are serialized through one `RwLock` write section per
//! event; derived indices are rebuilt inside the same section, so no
//! reader ever sees a chain and indices from different states. No lock
//! is held across an await point.
//!
//! Local block production lives in [`super::miner`]; it talks to the
//! network exclusively through [`NetworkManager::accept_mined_block`]
//! and the [`NodeEvent`] stream — composition, not inheritance.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::{MEMPOOL_CLEANUP_INTERVAL, WALLET_SENTINEL_ADDRESS};
use crate::ledger::{Blockchain, ChainError, Transaction};
use crate::network::mempool::{Mempool, MempoolError};
use crate::network::message::{Payload, PeerAnnouncement};
use crate::network::transport::{NetEvent, Transport, TransportError};

/// Capacity of the node-event broadcast channel. Large enough to absorb
/// a mining burst without disconnecting slow subscribers.
const NODE_EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Node events
// ---------------------------------------------------------------------------

/// Consensus-level happenings, broadcast to whoever cares — today that
/// is the mining driver, which treats every one of them as "your tip is
/// stale, start over".
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A block (local or remote) was validated and appended.
    BlockAccepted { height: u64 },
    /// The whole chain was replaced by a longer one.
    ChainReplaced { height: u64 },
}

// ---------------------------------------------------------------------------
// NetworkManager
// ---------------------------------------------------------------------------

/// One node's consensus brain: chain + mempool + gossip reactions.
pub struct NetworkManager {
    transport: Arc<Transport>,
    chain: Arc<RwLock<Blockchain>>,
    mempool: Arc<Mempool>,
    /// Listening addresses we consider known — our dial dedup set.
    /// Optimistically marked before dialing, unmarked on dial failure.
    /// Shared with the dial tasks discovery spawns.
    known_peers: Arc<Mutex<HashSet<String>>>,
    events: broadcast::Sender<NodeEvent>,
}

impl NetworkManager {
    /// Bind the transport and start the manager: event loop plus the
    /// periodic mempool sweep.
    pub async fn start(
        listen_addr: &str,
        node_id: String,
        chain: Arc<RwLock<Blockchain>>,
        mempool: Arc<Mempool>,
    ) -> Result<Arc<Self>, TransportError> {
        let (transport, net_events) = Transport::bind(listen_addr, node_id).await?;
        let (events, _) = broadcast::channel(NODE_EVENT_CAPACITY);

        let manager = Arc::new(Self {
            transport,
            chain,
            mempool,
            known_peers: Arc::new(Mutex::new(HashSet::new())),
            events,
        });

        tokio::spawn(Arc::clone(&manager).run(net_events));
        tokio::spawn(Arc::clone(&manager).mempool_sweeper());

        Ok(manager)
    }

    /// Subscribe to consensus events.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Shared chain state.
    pub fn chain(&self) -> &Arc<RwLock<Blockchain>> {
        &self.chain
    }

    /// Shared mempool.
    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Dial a bootstrap peer, marking it known first.
    pub async fn dial(&self, addr: &str) -> Result<(), TransportError> {
        self.known_peers.lock().insert(addr.to_string());
        if let Err(e) = self.transport.connect(addr).await {
            self.known_peers.lock().remove(addr);
            return Err(e);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Local production & submission
    // -----------------------------------------------------------------------

    /// Accept a locally mined block: validate it exactly as if a peer had
    /// sent it, append, purge its transactions from the mempool, and
    /// broadcast it.
    pub fn accept_mined_block(&self, block: crate::ledger::Block) -> Result<(), ChainError> {
        let height = {
            let mut chain = self.chain.write();
            chain.append_block(block.clone())?;
            chain.tip().index
        };
        self.purge_included(&block.transactions);
        self.transport
            .broadcast(Payload::Block { block });
        let _ = self.events.send(NodeEvent::BlockAccepted { height });
        Ok(())
    }

    /// Admit a locally submitted transaction and gossip it.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), MempoolError> {
        {
            let chain = self.chain.read();
            self.mempool.add_transaction(tx.clone(), &chain)?;
        }
        self.transport
            .broadcast(Payload::Transaction { transaction: tx });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    async fn run(self: Arc<Self>, mut net_events: mpsc::UnboundedReceiver<NetEvent>) {
        while let Some(event) = net_events.recv().await {
            match event {
                NetEvent::PeerConnected {
                    peer_id,
                    listening_address,
                    is_wallet,
                } => self.on_peer_connected(peer_id, listening_address, is_wallet),
                NetEvent::PeerDisconnected { peer_id } => {
                    debug!(peer = %peer_id, "peer left");
                }
                NetEvent::Frame { peer_id, frame } => {
                    self.on_frame(peer_id, frame.payload);
                }
            }
        }
    }

    fn on_peer_connected(&self, peer_id: String, listening_address: String, is_wallet: bool) {
        if is_wallet {
            info!(wallet = %peer_id, "wallet attached");
            return;
        }
        self.known_peers.lock().insert(listening_address.clone());

        // Tell the rest of the network about the newcomer, and ask the
        // newcomer for its chain in case it is ahead of us.
        self.transport.broadcast_except(
            Payload::PeerDiscovery {
                peers: vec![PeerAnnouncement {
                    node_id: peer_id.clone(),
                    listening_address,
                }],
            },
            Some(peer_id.as_str()),
        );
        self.transport.send_to(&peer_id, Payload::ChainRequest);
    }

    fn on_frame(&self, peer_id: String, payload: Payload) {
        match payload {
            Payload::Handshake { .. } => {
                // The transport consumes handshakes; a second one is noise.
            }
            Payload::PeerDiscovery { peers } => self.on_peer_discovery(peers),
            Payload::ChainRequest => {
                let chain = self.chain.read().blocks().to_vec();
                self.transport
                    .send_to(&peer_id, Payload::ChainResponse { chain });
            }
            Payload::ChainResponse { chain } => self.on_chain_response(peer_id, chain),
            Payload::Block { block } => self.on_block(peer_id, block),
            Payload::Transaction { transaction } => self.on_transaction(peer_id, transaction),
            Payload::MempoolRequest => {
                let transactions = self.mempool.all_transactions();
                self.transport
                    .send_to(&peer_id, Payload::MempoolResponse { transactions });
            }
            Payload::MempoolResponse { .. } => {
                // Full nodes never request mempools; wallets do, over
                // their own connections. Nothing for us here.
                debug!(peer = %peer_id, "ignoring unsolicited mempool response");
            }
        }
    }

    /// Optimistic dialing: mark each new address known before the dial so
    /// concurrent discovery frames do not double-dial, and unmark on
    /// failure so a later announcement can retry.
    fn on_peer_discovery(&self, peers: Vec<PeerAnnouncement>) {
        for announcement in peers {
            let addr = announcement.listening_address;
            if addr.contains(WALLET_SENTINEL_ADDRESS) {
                continue;
            }
            if addr == self.transport.listening_address()
                || announcement.node_id == self.transport.node_id()
            {
                continue;
            }
            {
                let mut known = self.known_peers.lock();
                if !known.insert(addr.clone()) {
                    continue;
                }
            }
            debug!(addr = %addr, "discovered peer, dialing");
            let transport = Arc::clone(&self.transport);
            let known_peers = Arc::clone(&self.known_peers);
            tokio::spawn(async move {
                if let Err(e) = transport.connect(&addr).await {
                    debug!(addr = %addr, error = %e, "discovery dial failed");
                    known_peers.lock().remove(&addr);
                }
            });
        }
    }

    fn on_chain_response(&self, peer_id: String, blocks: Vec<crate::ledger::Block>) {
        let theirs = blocks.len();
        let result = {
            let mut chain = self.chain.write();
            if theirs <= chain.len() {
                debug!(peer = %peer_id, ours = chain.len(), theirs, "chain response not longer");
                return;
            }
            chain.replace_chain(blocks)
        };
        match result {
            Ok(()) => {
                let (height, included) = {
                    let chain = self.chain.read();
                    let included: Vec<Transaction> = chain
                        .blocks()
                        .iter()
                        .flat_map(|b| b.transactions.iter().cloned())
                        .collect();
                    (chain.tip().index, included)
                };
                // Keep the mempool coherent: anything the adopted chain
                // already confirmed has no business staying pending.
                self.purge_included(&included);
                info!(peer = %peer_id, height, "adopted longer chain");
                let _ = self.events.send(NodeEvent::ChainReplaced { height });
            }
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "rejected chain response");
            }
        }
    }

    fn on_block(&self, peer_id: String, block: crate::ledger::Block) {
        let result = {
            let mut chain = self.chain.write();
            chain.append_block(block.clone())
        };
        match result {
            Ok(()) => {
                let height = block.index;
                self.purge_included(&block.transactions);
                // Forward to everyone who has not seen it yet. Wallets
                // are excluded by the transport's fan-out rules.
                self.transport
                    .broadcast_except(Payload::Block { block }, Some(peer_id.as_str()));
                info!(peer = %peer_id, height, "accepted block from peer");
                let _ = self.events.send(NodeEvent::BlockAccepted { height });
            }
            Err(e) => {
                // Validation failures are dropped, not propagated: the
                // sender may be malicious or simply behind.
                debug!(peer = %peer_id, error = %e, "dropped invalid block");
            }
        }
    }

    fn on_transaction(&self, peer_id: String, tx: Transaction) {
        let admitted = {
            let chain = self.chain.read();
            self.mempool.add_transaction(tx.clone(), &chain)
        };
        match admitted {
            Ok(()) => {
                self.transport.broadcast_except(
                    Payload::Transaction { transaction: tx },
                    Some(peer_id.as_str()),
                );
            }
            Err(e) => {
                debug!(peer = %peer_id, error = %e, "dropped transaction");
            }
        }
    }

    /// Remove confirmed transactions from the mempool.
    fn purge_included(&self, transactions: &[Transaction]) {
        let ids: Vec<String> = transactions
            .iter()
            .filter(|tx| !tx.is_coinbase)
            .map(|tx| tx.id.clone())
            .collect();
        self.mempool.remove_transactions(&ids);
    }

    /// Periodic expiry sweep over the mempool.
    async fn mempool_sweeper(self: Arc<Self>) {
        let mut tick = tokio::time::interval(MEMPOOL_CLEANUP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let dropped = self.mempool.cleanup();
            if dropped > 0 {
                info!(dropped, "expired mempool transactions");
            }
        }
    }
}
