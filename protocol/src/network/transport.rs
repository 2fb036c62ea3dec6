//! # P2P Transport
//!
//! Long-lived, full-duplex TCP connections carrying newline-delimited
//! JSON frames. This layer owns sockets and the peer table; it knows
//! nothing about chains or mempools — it turns the network into a stream
//! of [`NetEvent`]s and a handful of send primitives, and the manager
//! does the thinking.
//!
//! ## Connection lifecycle
//!
//! Both sides of a fresh connection immediately send a `HANDSHAKE` frame
//! carrying `{node_id, listening_address}` and wait (bounded) for the
//! peer's. Only after the exchange is the peer inserted into the table
//! and `PeerConnected` emitted. Connections that handshake with the
//! wallet sentinel (`localhost:0`) land in a disjoint wallet table:
//! reachable by `send_to`, invisible to `broadcast` and peer listings.
//!
//! Per connection there are two tasks: a reader looping on `read_line`
//! and a writer draining an mpsc queue. A read error, a write error, or
//! a malformed frame tears down that one connection; the node carries on.
//!
//! ## Suppression rules
//!
//! - Self-dial: a dial to our own listening address is dropped.
//! - Duplicate dial: a dial to a listening address we are already
//!   connected to is dropped.
//! - Duplicate peer: a handshake carrying a node id already in the
//!   table closes the new connection and keeps the old one.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{WALLET_CONNECT_TIMEOUT, WALLET_SENTINEL_ADDRESS};
use crate::network::message::{Frame, Payload, PeerAnnouncement};

// ---------------------------------------------------------------------------
// Events & errors
// ---------------------------------------------------------------------------

/// What the transport reports upward to the network manager.
#[derive(Debug, Clone)]
pub enum NetEvent {
    /// A connection completed its handshake and joined a table.
    PeerConnected {
        peer_id: String,
        listening_address: String,
        is_wallet: bool,
    },
    /// A connection closed (EOF, error, or malformed frame).
    PeerDisconnected { peer_id: String },
    /// A post-handshake frame arrived from a connected peer.
    Frame { peer_id: String, frame: Frame },
}

/// Transport failures. Dial and bind problems surface to callers;
/// everything mid-connection is handled by tearing that connection down.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Peer handle
// ---------------------------------------------------------------------------

/// Table entry for one live connection.
#[derive(Debug)]
struct PeerHandle {
    listening_address: String,
    remote_address: String,
    outbound: mpsc::UnboundedSender<Frame>,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The socket layer of one node: a listener, the dials it has made, and
/// the peer/wallet tables.
pub struct Transport {
    node_id: String,
    listening_address: String,
    /// Full nodes, keyed by their self-declared node id.
    peers: DashMap<String, PeerHandle>,
    /// Attached wallets, keyed likewise. Disjoint from `peers`.
    wallets: DashMap<String, PeerHandle>,
    events: mpsc::UnboundedSender<NetEvent>,
}

impl Transport {
    /// Bind a listener and start accepting connections.
    ///
    /// Returns the transport handle and the event stream. Binding to
    /// port 0 works; the advertised listening address always reflects
    /// the actual bound port.
    pub async fn bind(
        listen_addr: &str,
        node_id: String,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<NetEvent>), TransportError> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: listen_addr.to_string(),
                source,
            })?;
        let listening_address = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: listen_addr.to_string(),
                source,
            })?
            .to_string();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            node_id,
            listening_address: listening_address.clone(),
            peers: DashMap::new(),
            wallets: DashMap::new(),
            events: events_tx,
        });

        info!(addr = %listening_address, "listening for peers");

        let accept_handle = Arc::clone(&transport);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(remote = %remote, "inbound connection");
                        let transport = Arc::clone(&accept_handle);
                        tokio::spawn(async move {
                            transport.establish(stream).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok((transport, events_rx))
    }

    /// Dial a peer by listening address.
    ///
    /// Self-dials and dials to already-connected addresses are silently
    /// suppressed. A TCP-level failure is returned so discovery can
    /// unmark the peer; handshake and registration then complete in the
    /// background.
    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<(), TransportError> {
        if addr == self.listening_address {
            debug!(addr, "suppressing self-dial");
            return Ok(());
        }
        if self.is_connected_to(addr) {
            debug!(addr, "suppressing duplicate dial");
            return Ok(());
        }

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Dial {
                addr: addr.to_string(),
                source,
            })?;

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport.establish(stream).await;
        });
        Ok(())
    }

    /// Run one connection to completion: handshake, register, pump
    /// frames, deregister. Both inbound and outbound connections take
    /// this path — each side writes its handshake first, then reads.
    async fn establish(self: Arc<Self>, stream: TcpStream) {
        let remote_address = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Our handshake goes out unconditionally; theirs must be the
        // first frame back, within the connect timeout.
        let hello = Frame::new(
            Payload::Handshake {
                node_id: self.node_id.clone(),
                listening_address: self.listening_address.clone(),
            },
            self.node_id.clone(),
        );
        if write_line(&mut write_half, &hello).await.is_err() {
            return;
        }

        let first = match timeout(WALLET_CONNECT_TIMEOUT, read_frame(&mut reader)).await {
            Ok(Some(frame)) => frame,
            _ => {
                debug!(remote = %remote_address, "connection closed before handshake");
                return;
            }
        };
        let (peer_id, listening_address) = match first.payload {
            Payload::Handshake {
                node_id,
                listening_address,
            } => (node_id, listening_address),
            other => {
                debug!(remote = %remote_address, kind = other.kind(), "first frame was not a handshake");
                return;
            }
        };

        if peer_id == self.node_id {
            debug!("dropping connection to self");
            return;
        }
        if self.peers.contains_key(&peer_id) || self.wallets.contains_key(&peer_id) {
            debug!(peer = %peer_id, "dropping duplicate connection");
            return;
        }

        let is_wallet = listening_address.contains(WALLET_SENTINEL_ADDRESS);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let handle = PeerHandle {
            listening_address: listening_address.clone(),
            remote_address: remote_address.clone(),
            outbound: outbound_tx,
        };
        if is_wallet {
            self.wallets.insert(peer_id.clone(), handle);
        } else {
            self.peers.insert(peer_id.clone(), handle);
        }
        info!(
            peer = %peer_id,
            listening = %listening_address,
            remote = %remote_address,
            wallet = is_wallet,
            "peer connected"
        );
        let _ = self.events.send(NetEvent::PeerConnected {
            peer_id: peer_id.clone(),
            listening_address,
            is_wallet,
        });

        // Writer: drain the outbound queue onto the socket.
        let writer_peer = peer_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_line(&mut write_half, &frame).await {
                    debug!(peer = %writer_peer, error = %e, "write failed");
                    break;
                }
            }
        });

        // Reader: every good line becomes an event; the first bad line
        // or EOF ends the connection.
        while let Some(frame) = read_frame(&mut reader).await {
            if matches!(frame.payload, Payload::Handshake { .. }) {
                // A second handshake is protocol noise; ignore it.
                continue;
            }
            let _ = self.events.send(NetEvent::Frame {
                peer_id: peer_id.clone(),
                frame,
            });
        }

        self.peers.remove(&peer_id);
        self.wallets.remove(&peer_id);
        writer.abort();
        info!(peer = %peer_id, "peer disconnected");
        let _ = self
            .events
            .send(NetEvent::PeerDisconnected { peer_id });
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Send to every connected full node. Wallet connections are not
    /// part of gossip fan-out.
    pub fn broadcast(&self, payload: Payload) {
        self.broadcast_except(payload, None);
    }

    /// Send to every connected full node except `except` (the peer a
    /// frame was received from, to avoid echoing it straight back).
    pub fn broadcast_except(&self, payload: Payload, except: Option<&str>) {
        let frame = Frame::new(payload, self.node_id.clone());
        for entry in self.peers.iter() {
            if Some(entry.key().as_str()) == except {
                continue;
            }
            let _ = entry.value().outbound.send(frame.clone());
        }
    }

    /// Send to one connection by node id — full node or wallet.
    /// Returns `false` if no such peer is connected.
    pub fn send_to(&self, peer_id: &str, payload: Payload) -> bool {
        let frame = Frame::new(payload, self.node_id.clone());
        if let Some(handle) = self.peers.get(peer_id) {
            return handle.outbound.send(frame).is_ok();
        }
        if let Some(handle) = self.wallets.get(peer_id) {
            return handle.outbound.send(frame).is_ok();
        }
        false
    }

    // -----------------------------------------------------------------------
    // Table queries
    // -----------------------------------------------------------------------

    /// This node's self-declared id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The address this node accepts dials on.
    pub fn listening_address(&self) -> &str {
        &self.listening_address
    }

    /// Ids of connected full nodes.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    /// Announcements for every connected full node, for `PEER_DISCOVERY`.
    pub fn peer_announcements(&self) -> Vec<PeerAnnouncement> {
        self.peers
            .iter()
            .map(|e| PeerAnnouncement {
                node_id: e.key().clone(),
                listening_address: e.value().listening_address.clone(),
            })
            .collect()
    }

    /// `true` when some full node in the table declared this listening
    /// address.
    pub fn is_connected_to(&self, listening_address: &str) -> bool {
        self.peers
            .iter()
            .any(|e| e.value().listening_address == listening_address)
    }

    /// Number of connected full nodes.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of attached wallets.
    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Remote socket address of a connected peer, if any. For logs.
    pub fn remote_address_of(&self, peer_id: &str) -> Option<String> {
        self.peers
            .get(peer_id)
            .or_else(|| self.wallets.get(peer_id))
            .map(|h| h.remote_address.clone())
    }
}

/// A fresh random 128-bit node id, lowercase hex. Node identity in Ember
/// is self-declared; this is an address book entry, not authentication.
pub fn random_node_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ---------------------------------------------------------------------------
// Line I/O
// ---------------------------------------------------------------------------

/// Read one frame; `None` on EOF, I/O error, or a malformed line.
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Option<Frame> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => None,
        Ok(_) => Frame::from_line(&line),
        Err(_) => None,
    }
}

/// Write one frame as a single line.
async fn write_line(writer: &mut OwnedWriteHalf, frame: &Frame) -> std::io::Result<()> {
    let mut line = frame.to_line();
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
