//! # Cryptographic Primitives
//!
//! The three primitives the rest of Ember is built on, and nothing else:
//!
//! - **hash** — SHA-256 over canonical JSON encodings. Block hashes,
//!   proof-of-work targets, address fingerprints.
//! - **keys** — RSA-2048 keypairs with PEM serialization and detached
//!   RSA-SHA256 signatures. A PEM public key *is* an address.
//! - **encryption** — PBKDF2 + AES-256-GCM for the on-disk identity
//!   store. The only place secrets touch a filesystem.
//!
//! Don't roll your own. Everything here wraps audited RustCrypto
//! implementations; this module exists to pin the parameters and keep
//! error handling consistent.

pub mod encryption;
pub mod hash;
pub mod keys;

pub use encryption::{open, seal, EncryptionError};
pub use hash::{sha256, sha256_hex};
pub use keys::{address_fingerprint, normalize_address, verify, KeyError, Keypair};
