//! # Networking
//!
//! Everything between the ledger and the wire:
//!
//! ```text
//! message.rs   — the JSON frame vocabulary
//! transport.rs — TCP connections, handshakes, peer/wallet tables
//! manager.rs   — the gossip state machine over transport + chain + mempool
//! mempool.rs   — bounded FIFO pool of unconfirmed transactions
//! miner.rs     — block production with event-driven preemption
//! ```

pub mod manager;
pub mod mempool;
pub mod message;
pub mod miner;
pub mod transport;

pub use manager::{NetworkManager, NodeEvent};
pub use mempool::{Mempool, MempoolConfig, MempoolError};
pub use message::{Frame, Payload, PeerAnnouncement};
pub use miner::MiningDriver;
pub use transport::{random_node_id, NetEvent, Transport, TransportError};
