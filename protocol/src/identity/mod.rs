//! # Identity Management
//!
//! An Ember identity is an RSA keypair plus a little metadata: an opaque
//! 128-bit id, an optional human name, and creation/last-used timestamps.
//! The public PEM is the identity's address; the private PEM signs its
//! transactions. That's the whole model — your keys, your money.
//!
//! Identities live encrypted on disk (see [`store`]) and are decrypted
//! into memory only for the lifetime of a wallet or mining session.

pub mod store;

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::keys::{KeyError, Keypair};

pub use store::{IdentityStore, StoreError};

/// A keypair with wallet metadata. This is what the encrypted identity
/// store serializes, private key included — which is exactly why the
/// store encrypts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque 128-bit identifier, lowercase hex. Used as the node id when
    /// a wallet attaches to a node.
    pub id: String,

    /// PEM-encoded RSA public key — the on-chain address.
    pub public_key: String,

    /// PEM-encoded PKCS#8 RSA private key. Never logged, never sent.
    pub private_key: String,

    /// Optional human-readable label. Purely cosmetic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Unix milliseconds when the identity was generated.
    pub created_at: u64,

    /// Unix milliseconds of the most recent use, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<u64>,
}

impl Identity {
    /// Generate a fresh identity with a new RSA-2048 keypair and a random
    /// 128-bit id.
    ///
    /// Key generation is CPU-bound; on an async runtime, call this inside
    /// `spawn_blocking`.
    pub fn generate(name: Option<String>) -> Result<Self, KeyError> {
        let keypair = Keypair::generate()?;
        let mut id_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut id_bytes);

        Ok(Self {
            id: hex::encode(id_bytes),
            public_key: keypair.public_pem().to_string(),
            private_key: keypair.private_pem()?,
            name,
            created_at: Utc::now().timestamp_millis() as u64,
            last_used: None,
        })
    }

    /// Reconstruct the signing keypair from the stored private PEM.
    pub fn keypair(&self) -> Result<Keypair, KeyError> {
        Keypair::from_private_pem(&self.private_key)
    }

    /// Sign a message with this identity's private key, returning the
    /// signature as lowercase hex.
    pub fn sign(&self, message: &[u8]) -> Result<String, KeyError> {
        Ok(self.keypair()?.sign(message))
    }

    /// Record a use of this identity. The caller persists the change by
    /// re-saving the store.
    pub fn touch(&mut self) {
        self.last_used = Some(Utc::now().timestamp_millis() as u64);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::verify;

    #[test]
    fn generate_produces_usable_identity() {
        let identity = Identity::generate(Some("alice".to_string())).unwrap();
        assert_eq!(identity.id.len(), 32); // 128 bits as hex
        assert!(identity.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(identity.public_key.contains("BEGIN PUBLIC KEY"));
        assert!(identity.private_key.contains("BEGIN PRIVATE KEY"));
        assert_eq!(identity.name.as_deref(), Some("alice"));
        assert!(identity.created_at > 0);
        assert!(identity.last_used.is_none());
    }

    #[test]
    fn identity_signatures_verify_under_its_public_key() {
        let identity = Identity::generate(None).unwrap();
        let sig = identity.sign(b"a canonical transaction").unwrap();
        assert!(verify(&identity.public_key, b"a canonical transaction", &sig));
    }

    #[test]
    fn distinct_identities_have_distinct_ids_and_keys() {
        let a = Identity::generate(None).unwrap();
        let b = Identity::generate(None).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn touch_sets_last_used() {
        let mut identity = Identity::generate(None).unwrap();
        identity.touch();
        assert!(identity.last_used.is_some());
        assert!(identity.last_used.unwrap() >= identity.created_at);
    }

    #[test]
    fn serde_roundtrip_preserves_keys() {
        let identity = Identity::generate(Some("roundtrip".to_string())).unwrap();
        let json = serde_json::to_string(&identity).unwrap();
        let recovered: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity.id, recovered.id);
        assert_eq!(identity.public_key, recovered.public_key);
        assert_eq!(identity.private_key, recovered.private_key);
    }
}
