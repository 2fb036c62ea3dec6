//! # Hashing Utilities
//!
//! SHA-256 is the only hash function in Ember. Block hashes, transaction
//! canonical forms, proof-of-work targets — all of it is plain SHA-256
//! over a canonical JSON encoding. One function, zero ambiguity about
//! which digest a peer meant.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// Returns a fixed-size 32-byte digest. Use [`sha256_hex`] when the
/// result is headed for a hash field or the wire.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&digest);
    output
}

/// Compute the SHA-256 hash and return it as a lowercase hex string.
///
/// This is the form every hash takes on the wire and inside blocks:
/// 64 lowercase hex characters. Proof-of-work counts leading zeros on
/// exactly this representation.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
