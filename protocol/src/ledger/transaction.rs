//! # Transactions
//!
//! A transaction is a signed value transfer between two RSA public keys,
//! or a coinbase minting the block reward to a miner. The wire shape is
//! stable JSON; the *canonical signed form* is the same object with its
//! fields in a fixed order and the signature removed:
//!
//! ```text
//! { id, sender, recipient, amount, timestamp, is_coinbase }
//! ```
//!
//! Signing and verification both operate on exactly this encoding, so a
//! transaction that verifies on one node verifies on every node. Serde
//! serializes struct fields in declaration order, which is what pins the
//! canonical order — do not reorder the fields of [`SignablePayload`].
//!
//! Coinbase transactions have no sender (`sender = None` iff
//! `is_coinbase`) and are signed by the *recipient* — the miner mints to
//! themselves and vouches for it with their own key.

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::reward_for;
use crate::crypto::keys::{self, Keypair};

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction as seen by a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Sitting in a mempool, awaiting block inclusion.
    Pending,
    /// Included in a block on the current chain.
    Confirmed,
    /// Confirmed at a depth of at least six blocks.
    Final,
    /// Known to no chain and no mempool.
    Rejected,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Final => write!(f, "FINAL"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A signed value transfer, wire-stable shape.
///
/// Field order matters: the struct is serialized as-is into blocks, and
/// [`SignablePayload`] mirrors it (minus `signature`) for the canonical
/// signed form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque 256-bit identifier, lowercase hex. Random, not derived —
    /// uniqueness is all the protocol needs from it.
    pub id: String,

    /// Sender's PEM public key. `None` exactly when `is_coinbase`.
    pub sender: Option<String>,

    /// Recipient's PEM public key.
    pub recipient: String,

    /// Amount in whole coins. Positive for every valid transaction.
    pub amount: f64,

    /// Unix milliseconds when the transaction was created.
    pub timestamp: u64,

    /// Hex-encoded RSA-SHA256 signature over the canonical form.
    /// Verified against the sender's key, or the recipient's for coinbase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// `true` for the block-reward mint that opens every block.
    pub is_coinbase: bool,
}

/// The canonical signed form: wire fields in fixed order, signature
/// excluded. Never reorder these fields — the order is consensus.
#[derive(Serialize)]
struct SignablePayload<'a> {
    id: &'a str,
    sender: Option<&'a str>,
    recipient: &'a str,
    amount: f64,
    timestamp: u64,
    is_coinbase: bool,
}

impl Transaction {
    /// Construct and sign an ordinary transfer from the keypair's address
    /// to `recipient`.
    pub fn transfer(sender: &Keypair, recipient: &str, amount: f64) -> Self {
        let mut tx = Self {
            id: random_id(),
            sender: Some(sender.public_pem().to_string()),
            recipient: recipient.to_string(),
            amount,
            timestamp: Utc::now().timestamp_millis() as u64,
            signature: None,
            is_coinbase: false,
        };
        tx.signature = Some(sender.sign(tx.canonical_json().as_bytes()));
        tx
    }

    /// Construct and sign the coinbase for a block at `block_index`,
    /// minting the scheduled reward to the mining identity.
    pub fn coinbase(miner: &Keypair, block_index: u64) -> Self {
        let mut tx = Self {
            id: random_id(),
            sender: None,
            recipient: miner.public_pem().to_string(),
            amount: reward_for(block_index),
            timestamp: Utc::now().timestamp_millis() as u64,
            signature: None,
            is_coinbase: true,
        };
        tx.signature = Some(miner.sign(tx.canonical_json().as_bytes()));
        tx
    }

    /// The canonical signed form as a JSON string.
    ///
    /// This is the exact byte sequence that gets signed and verified.
    pub fn canonical_json(&self) -> String {
        let payload = SignablePayload {
            id: &self.id,
            sender: self.sender.as_deref(),
            recipient: &self.recipient,
            amount: self.amount,
            timestamp: self.timestamp,
            is_coinbase: self.is_coinbase,
        };
        serde_json::to_string(&payload).unwrap_or_default()
    }

    /// Verify the signature over the canonical form.
    ///
    /// Coinbase signatures verify against the recipient's key, ordinary
    /// ones against the sender's. Missing signature, missing sender, or
    /// malformed key material all verify as `false` — the wire is
    /// adversarial.
    pub fn verify_signature(&self) -> bool {
        let Some(signature) = self.signature.as_deref() else {
            return false;
        };
        let signer = if self.is_coinbase {
            &self.recipient
        } else {
            match self.sender.as_deref() {
                Some(sender) => sender,
                None => return false,
            }
        };
        keys::verify(signer, self.canonical_json().as_bytes(), signature)
    }

    /// Structural sanity independent of chain state: the sender/coinbase
    /// pairing invariant, a non-empty recipient, and a positive finite
    /// amount.
    pub fn is_well_formed(&self) -> bool {
        if self.is_coinbase != self.sender.is_none() {
            return false;
        }
        if self.recipient.trim().is_empty() {
            return false;
        }
        self.amount.is_finite() && self.amount > 0.0
    }

    /// `true` when `address` (normalized) is the sender or recipient.
    pub fn touches(&self, address: &str) -> bool {
        let address = keys::normalize_address(address);
        if keys::normalize_address(&self.recipient) == address {
            return true;
        }
        self.sender
            .as_deref()
            .map(|s| keys::normalize_address(s) == address)
            .unwrap_or(false)
    }
}

/// A fresh random 256-bit transaction id, lowercase hex.
fn random_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::INITIAL_REWARD;
    use std::sync::OnceLock;

    /// RSA keygen is slow; share one pair of identities across the module.
    fn alice() -> &'static Keypair {
        static KP: OnceLock<Keypair> = OnceLock::new();
        KP.get_or_init(|| Keypair::generate().unwrap())
    }

    fn bob() -> &'static Keypair {
        static KP: OnceLock<Keypair> = OnceLock::new();
        KP.get_or_init(|| Keypair::generate().unwrap())
    }

    #[test]
    fn transfer_is_signed_and_verifies() {
        let tx = Transaction::transfer(alice(), bob().public_pem(), 12.5);
        assert!(!tx.is_coinbase);
        assert_eq!(tx.sender.as_deref(), Some(alice().public_pem()));
        assert_eq!(tx.amount, 12.5);
        assert_eq!(tx.id.len(), 64);
        assert!(tx.verify_signature());
        assert!(tx.is_well_formed());
    }

    #[test]
    fn coinbase_mints_scheduled_reward_to_miner() {
        let tx = Transaction::coinbase(alice(), 1);
        assert!(tx.is_coinbase);
        assert!(tx.sender.is_none());
        assert_eq!(tx.recipient, alice().public_pem());
        assert_eq!(tx.amount, INITIAL_REWARD);
        assert!(tx.verify_signature());
        assert!(tx.is_well_formed());
    }

    #[test]
    fn coinbase_verifies_against_recipient_not_sender() {
        // A coinbase signed by someone other than the recipient must fail.
        let mut tx = Transaction::coinbase(alice(), 1);
        tx.recipient = bob().public_pem().to_string();
        assert!(!tx.verify_signature());
    }

    #[test]
    fn tampering_with_any_signed_field_breaks_verification() {
        let tx = Transaction::transfer(alice(), bob().public_pem(), 10.0);

        let mut amount_tampered = tx.clone();
        amount_tampered.amount = 1000.0;
        assert!(!amount_tampered.verify_signature());

        let mut recipient_tampered = tx.clone();
        recipient_tampered.recipient = alice().public_pem().to_string();
        assert!(!recipient_tampered.verify_signature());

        let mut timestamp_tampered = tx.clone();
        timestamp_tampered.timestamp += 1;
        assert!(!timestamp_tampered.verify_signature());

        let mut id_tampered = tx;
        id_tampered.id = super::random_id();
        assert!(!id_tampered.verify_signature());
    }

    #[test]
    fn unsigned_transaction_does_not_verify() {
        let mut tx = Transaction::transfer(alice(), bob().public_pem(), 1.0);
        tx.signature = None;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn canonical_form_excludes_signature() {
        let mut tx = Transaction::transfer(alice(), bob().public_pem(), 1.0);
        let canonical_before = tx.canonical_json();
        tx.signature = Some("ff".repeat(256));
        assert_eq!(tx.canonical_json(), canonical_before);
        assert!(!canonical_before.contains("signature"));
    }

    #[test]
    fn canonical_field_order_is_fixed() {
        let tx = Transaction::transfer(alice(), bob().public_pem(), 1.0);
        let canonical = tx.canonical_json();
        let id_pos = canonical.find("\"id\"").unwrap();
        let sender_pos = canonical.find("\"sender\"").unwrap();
        let recipient_pos = canonical.find("\"recipient\"").unwrap();
        let amount_pos = canonical.find("\"amount\"").unwrap();
        let timestamp_pos = canonical.find("\"timestamp\"").unwrap();
        let coinbase_pos = canonical.find("\"is_coinbase\"").unwrap();
        assert!(id_pos < sender_pos);
        assert!(sender_pos < recipient_pos);
        assert!(recipient_pos < amount_pos);
        assert!(amount_pos < timestamp_pos);
        assert!(timestamp_pos < coinbase_pos);
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        // Coinbase with a sender.
        let mut tx = Transaction::coinbase(alice(), 1);
        tx.sender = Some(bob().public_pem().to_string());
        assert!(!tx.is_well_formed());

        // Ordinary transaction without a sender.
        let mut tx = Transaction::transfer(alice(), bob().public_pem(), 1.0);
        tx.sender = None;
        assert!(!tx.is_well_formed());

        // Non-positive amounts.
        let mut tx = Transaction::transfer(alice(), bob().public_pem(), 1.0);
        tx.amount = 0.0;
        assert!(!tx.is_well_formed());
        tx.amount = -5.0;
        assert!(!tx.is_well_formed());

        // Empty recipient.
        let mut tx = Transaction::transfer(alice(), "", 1.0);
        tx.recipient = "  ".to_string();
        assert!(!tx.is_well_formed());
    }

    #[test]
    fn touches_matches_normalized_addresses() {
        let tx = Transaction::transfer(alice(), bob().public_pem(), 1.0);
        assert!(tx.touches(alice().public_pem()));
        assert!(tx.touches(bob().public_pem()));
        // CRLF-mangled form of the same key still matches.
        let mangled = bob().public_pem().replace('\n', "\r\n");
        assert!(tx.touches(&mangled));
        // A third party does not.
        let other = Keypair::generate().unwrap();
        assert!(!tx.touches(other.public_pem()));
    }

    #[test]
    fn wire_roundtrip_preserves_signature_validity() {
        let tx = Transaction::transfer(alice(), bob().public_pem(), 3.25);
        let json = serde_json::to_string(&tx).unwrap();
        let recovered: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, recovered);
        assert!(recovered.verify_signature());
    }

    #[test]
    fn status_display_matches_wire_vocabulary() {
        assert_eq!(TransactionStatus::Pending.to_string(), "PENDING");
        assert_eq!(TransactionStatus::Confirmed.to_string(), "CONFIRMED");
        assert_eq!(TransactionStatus::Final.to_string(), "FINAL");
        assert_eq!(TransactionStatus::Rejected.to_string(), "REJECTED");
    }
}
