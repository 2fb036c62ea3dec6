//! # Wire Messages
//!
//! Every frame on an Ember connection is one line of UTF-8 JSON:
//!
//! ```text
//! { "type": "...", "payload": { ... }, "sender": "<node-id>", "timestamp": <ms> }
//! ```
//!
//! The `type`/`payload` pair is a serde adjacently-tagged enum, so adding
//! a message kind is one variant, not a parser change. Unknown or
//! malformed frames fail deserialization and cost the peer its
//! connection — the wire is adversarial and we do not guess.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ledger::{Block, Transaction};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One peer advertised inside a `PEER_DISCOVERY` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAnnouncement {
    /// The advertised node's id.
    pub node_id: String,
    /// The address the advertised node accepts dials on.
    pub listening_address: String,
}

/// Message body, tagged with the frame type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    /// First frame in each direction on a new connection. Carries the
    /// peer's self-declared identity and dialable address (wallets
    /// declare the `localhost:0` sentinel).
    Handshake {
        node_id: String,
        listening_address: String,
    },

    /// Gossip of known peers so new nodes can bootstrap their dials.
    PeerDiscovery { peers: Vec<PeerAnnouncement> },

    /// Ask a peer for its entire chain.
    ChainRequest,

    /// The entire chain, genesis first.
    ChainResponse { chain: Vec<Block> },

    /// A freshly mined block being propagated.
    Block { block: Block },

    /// An unconfirmed transaction being propagated.
    Transaction { transaction: Transaction },

    /// Ask a peer for its current mempool contents.
    MempoolRequest,

    /// The peer's pending transactions, oldest first.
    MempoolResponse { transactions: Vec<Transaction> },
}

impl Payload {
    /// The frame type string, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "HANDSHAKE",
            Self::PeerDiscovery { .. } => "PEER_DISCOVERY",
            Self::ChainRequest => "CHAIN_REQUEST",
            Self::ChainResponse { .. } => "CHAIN_RESPONSE",
            Self::Block { .. } => "BLOCK",
            Self::Transaction { .. } => "TRANSACTION",
            Self::MempoolRequest => "MEMPOOL_REQUEST",
            Self::MempoolResponse { .. } => "MEMPOOL_RESPONSE",
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A complete wire frame: typed payload plus sender id and send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// The typed body, flattened into `type` + `payload` keys.
    #[serde(flatten)]
    pub payload: Payload,
    /// Node id of the sender, as self-declared in its handshake.
    pub sender: String,
    /// Unix milliseconds when the frame was sent.
    pub timestamp: u64,
}

impl Frame {
    /// Stamp a payload with the local node id and the current time.
    pub fn new(payload: Payload, sender: impl Into<String>) -> Self {
        Self {
            payload,
            sender: sender.into(),
            timestamp: Utc::now().timestamp_millis() as u64,
        }
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse one received line. `None` for anything malformed — the
    /// caller decides whether that costs the peer its connection.
    pub fn from_line(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Block;

    #[test]
    fn frame_wire_shape_has_the_four_fields() {
        let frame = Frame::new(Payload::ChainRequest, "node-a");
        let json: serde_json::Value = serde_json::from_str(&frame.to_line()).unwrap();
        assert_eq!(json["type"], "CHAIN_REQUEST");
        assert_eq!(json["sender"], "node-a");
        assert!(json["timestamp"].is_u64());
    }

    #[test]
    fn type_tags_match_the_protocol_vocabulary() {
        let handshake = Payload::Handshake {
            node_id: "n".into(),
            listening_address: "127.0.0.1:9000".into(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&Frame::new(handshake, "n").to_line()).unwrap();
        assert_eq!(json["type"], "HANDSHAKE");
        assert_eq!(json["payload"]["node_id"], "n");
        assert_eq!(json["payload"]["listening_address"], "127.0.0.1:9000");
    }

    #[test]
    fn roundtrip_preserves_chain_payloads() {
        let frame = Frame::new(
            Payload::ChainResponse {
                chain: vec![Block::genesis(2)],
            },
            "node-b",
        );
        let recovered = Frame::from_line(&frame.to_line()).unwrap();
        assert_eq!(frame, recovered);
        match recovered.payload {
            Payload::ChainResponse { chain } => {
                assert_eq!(chain.len(), 1);
                assert_eq!(chain[0], Block::genesis(2));
            }
            other => panic!("wrong payload kind: {}", other.kind()),
        }
    }

    #[test]
    fn frames_stay_on_one_line() {
        // The transport is newline-delimited; a frame embedding PEM keys
        // (which contain \n in the source strings) must still serialize
        // to a single line of JSON.
        let frame = Frame::new(
            Payload::PeerDiscovery {
                peers: vec![PeerAnnouncement {
                    node_id: "n1".into(),
                    listening_address: "host\nwith\nnewlines:1".into(),
                }],
            },
            "node-c",
        );
        assert!(!frame.to_line().contains('\n'));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(Frame::from_line("").is_none());
        assert!(Frame::from_line("not json").is_none());
        assert!(Frame::from_line(r#"{"type":"NOT_A_TYPE","sender":"x","timestamp":1}"#).is_none());
        // Missing sender.
        assert!(Frame::from_line(r#"{"type":"CHAIN_REQUEST","timestamp":1}"#).is_none());
    }

    #[test]
    fn kind_strings_cover_every_variant() {
        assert_eq!(Payload::ChainRequest.kind(), "CHAIN_REQUEST");
        assert_eq!(Payload::MempoolRequest.kind(), "MEMPOOL_REQUEST");
        assert_eq!(
            Payload::MempoolResponse {
                transactions: vec![]
            }
            .kind(),
            "MEMPOOL_RESPONSE"
        );
    }
}
