//! # Identity-Store Encryption
//!
//! Password-based authenticated encryption for wallet files:
//! PBKDF2-HMAC-SHA256 turns the password into an AES-256-GCM key, and
//! GCM gives us confidentiality and tamper detection in one operation.
//! No "encrypt-then-MAC" debates. It just works.
//!
//! ## Record format
//!
//! Every sealed record is a single line of four colon-separated lowercase
//! hex fields:
//!
//! ```text
//! hex(salt) : hex(iv) : hex(auth_tag) : hex(ciphertext)
//! ```
//!
//! 16-byte salt, 12-byte IV, 16-byte tag. The salt is per-record, so the
//! same password never produces the same key twice; the IV is per-record,
//! so the same key never sees a nonce reuse. GCM is notoriously
//! unforgiving about nonce reuse — random 96-bit nonces from the OS
//! CSPRNG keep us far away from that cliff.
//!
//! ## Error discipline
//!
//! Wrong password, flipped bit, truncated field — all of it surfaces as
//! the same opaque [`EncryptionError::DecryptFailed`]. The difference
//! between "wrong key" and "corrupted ciphertext" is none of an
//! attacker's business.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use crate::config::{
    AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH, PBKDF2_ITERATIONS, SALT_LENGTH,
};

/// Errors that can occur while sealing or opening a record.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong password or corrupted record")]
    DecryptFailed,

    #[error("malformed record: expected salt:iv:tag:ciphertext hex fields")]
    MalformedRecord,
}

/// Derive a 32-byte AES key from a password and salt.
///
/// PBKDF2-HMAC-SHA256 with 100,000 iterations. Deliberately slow — the
/// iteration count is the only thing standing between a stolen wallet
/// file and a GPU rig.
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; AES_KEY_LENGTH] {
    let mut key = [0u8; AES_KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Seal plaintext under a password, producing a `salt:iv:tag:ciphertext`
/// hex record.
///
/// A fresh random salt and IV are drawn from the OS CSPRNG for every
/// call, so sealing the same plaintext twice yields unrelated records.
pub fn seal(password: &str, plaintext: &[u8]) -> Result<String, EncryptionError> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| EncryptionError::EncryptFailed)?;

    // aes-gcm appends the 16-byte tag to the ciphertext; the record
    // format carries it as a separate field, so split it back out.
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| EncryptionError::EncryptFailed)?;
    if sealed.len() < AES_TAG_LENGTH {
        return Err(EncryptionError::EncryptFailed);
    }
    let tag = sealed.split_off(sealed.len() - AES_TAG_LENGTH);
    let ciphertext = sealed;

    Ok(format!(
        "{}:{}:{}:{}",
        hex::encode(salt),
        hex::encode(iv),
        hex::encode(tag),
        hex::encode(ciphertext),
    ))
}

/// Open a `salt:iv:tag:ciphertext` record with a password, returning the
/// plaintext.
///
/// # Errors
///
/// [`EncryptionError::MalformedRecord`] when the record does not have
/// four decodable hex fields of the right sizes;
/// [`EncryptionError::DecryptFailed`] for everything else — wrong
/// password, tampering, truncation.
pub fn open(password: &str, record: &str) -> Result<Vec<u8>, EncryptionError> {
    let mut parts = record.trim().split(':');
    let salt = decode_field(parts.next(), SALT_LENGTH)?;
    let iv = decode_field(parts.next(), AES_NONCE_LENGTH)?;
    let tag = decode_field(parts.next(), AES_TAG_LENGTH)?;
    let ciphertext = parts
        .next()
        .and_then(|f| hex::decode(f).ok())
        .ok_or(EncryptionError::MalformedRecord)?;
    if parts.next().is_some() {
        return Err(EncryptionError::MalformedRecord);
    }

    let key = derive_key(password, &salt);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| EncryptionError::DecryptFailed)?;

    // Re-join ciphertext || tag into the layout aes-gcm expects.
    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
        .map_err(|_| EncryptionError::DecryptFailed)
}

/// Decode one fixed-length hex field of the record.
fn decode_field(field: Option<&str>, expected_len: usize) -> Result<Vec<u8>, EncryptionError> {
    let bytes = field
        .and_then(|f| hex::decode(f).ok())
        .ok_or(EncryptionError::MalformedRecord)?;
    if bytes.len() != expected_len {
        return Err(EncryptionError::MalformedRecord);
    }
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
