//! # Encrypted Identity Store
//!
//! Wallet file format: one sealed record per line, each record the
//! AES-256-GCM encryption of one JSON-encoded [`Identity`]
//! (`salt:iv:tag:ciphertext`, see [`crate::crypto::encryption`]).
//!
//! Per-record salts mean the file never reveals whether two identities
//! share a password, and corrupting one line loses one identity, not the
//! whole wallet. Plaintext keys on disk are a felony; this module is the
//! only legal way in or out.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::Identity;
use crate::config::MIN_PASSWORD_LENGTH;
use crate::crypto::encryption::{self, EncryptionError};

/// Errors raised by the identity store. All of these are fatal from the
/// CLI's point of view — a wallet you cannot decrypt is a wallet you
/// cannot use.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("password must be at least {MIN_PASSWORD_LENGTH} characters")]
    WeakPassword,

    #[error("identity store not found at {0}")]
    NotFound(PathBuf),

    #[error("identity store already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("failed to read or write identity store: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decrypt identity store: {0}")]
    Crypto(#[from] EncryptionError),

    #[error("failed to generate identity: {0}")]
    Key(#[from] crate::crypto::keys::KeyError),

    #[error("corrupt identity record: {0}")]
    CorruptRecord(#[from] serde_json::Error),

    #[error("identity store is empty")]
    Empty,
}

/// A password-protected file of identities.
///
/// The store holds no decrypted state: every operation takes the
/// password, reads the file, and drops key material as soon as the
/// caller is done with it.
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Point the store at a wallet file. The file need not exist yet;
    /// [`create`](Self::create) will make it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The wallet file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a new wallet file containing a single fresh identity.
    ///
    /// Fails if the file already exists — overwriting a wallet destroys
    /// keys, so that has to be an explicit `rm` by the operator.
    pub fn create(&self, password: &str, name: Option<String>) -> Result<Identity, StoreError> {
        check_password(password)?;
        if self.path.exists() {
            return Err(StoreError::AlreadyExists(self.path.clone()));
        }

        let identity = Identity::generate(name)?;
        self.save(password, std::slice::from_ref(&identity))?;

        info!(id = %identity.id, path = %self.path.display(), "identity store created");
        Ok(identity)
    }

    /// Decrypt and return every identity in the store.
    pub fn load(&self, password: &str) -> Result<Vec<Identity>, StoreError> {
        check_password(password)?;
        if !self.path.exists() {
            return Err(StoreError::NotFound(self.path.clone()));
        }

        let contents = fs::read_to_string(&self.path)?;
        let mut identities = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let plaintext = encryption::open(password, line)?;
            identities.push(serde_json::from_slice(&plaintext)?);
        }
        if identities.is_empty() {
            return Err(StoreError::Empty);
        }
        Ok(identities)
    }

    /// Decrypt and return the primary (first) identity.
    pub fn load_primary(&self, password: &str) -> Result<Identity, StoreError> {
        Ok(self.load(password)?.remove(0))
    }

    /// Encrypt and write the given identities, replacing the file.
    ///
    /// The file is written with owner-only permissions on Unix. The
    /// contents are ciphertext either way, but there is no reason to let
    /// other users collect material to brute-force offline.
    pub fn save(&self, password: &str, identities: &[Identity]) -> Result<(), StoreError> {
        check_password(password)?;

        let mut contents = String::new();
        for identity in identities {
            let plaintext = serde_json::to_vec(identity)?;
            contents.push_str(&encryption::seal(password, &plaintext)?);
            contents.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Record a use of the identified identity and persist the change.
    pub fn mark_used(&self, password: &str, id: &str) -> Result<(), StoreError> {
        let mut identities = self.load(password)?;
        for identity in identities.iter_mut().filter(|i| i.id == id) {
            identity.touch();
        }
        self.save(password, &identities)
    }
}

/// Reject passwords below the minimum length before any key derivation.
fn check_password(password: &str) -> Result<(), StoreError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(StoreError::WeakPassword);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PASSWORD: &str = "a perfectly adequate password";

    fn store_in(dir: &tempfile::TempDir) -> IdentityStore {
        IdentityStore::new(dir.path().join("wallet.emb"))
    }

    #[test]
    fn create_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let created = store.create(PASSWORD, Some("miner".to_string())).unwrap();
        let loaded = store.load_primary(PASSWORD).unwrap();

        assert_eq!(created.id, loaded.id);
        assert_eq!(created.public_key, loaded.public_key);
        assert_eq!(created.private_key, loaded.private_key);
        assert_eq!(loaded.name.as_deref(), Some("miner"));
    }

    #[test]
    fn short_password_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.create("short", None),
            Err(StoreError::WeakPassword)
        ));
    }

    #[test]
    fn wrong_password_fails_to_load() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.create(PASSWORD, None).unwrap();

        assert!(matches!(
            store.load("a different wrong password"),
            Err(StoreError::Crypto(_))
        ));
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.create(PASSWORD, None).unwrap();
        assert!(matches!(
            store.create(PASSWORD, None),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.load(PASSWORD),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn tampered_record_fails_closed() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.create(PASSWORD, None).unwrap();

        let mut contents = fs::read_to_string(store.path()).unwrap();
        contents = contents.replacen('a', "b", 1);
        fs::write(store.path(), contents).unwrap();

        assert!(store.load(PASSWORD).is_err());
    }

    #[test]
    fn multiple_identities_roundtrip_in_order() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let a = Identity::generate(Some("a".to_string())).unwrap();
        let b = Identity::generate(Some("b".to_string())).unwrap();
        store.save(PASSWORD, &[a.clone(), b.clone()]).unwrap();

        let loaded = store.load(PASSWORD).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, a.id);
        assert_eq!(loaded[1].id, b.id);
    }

    #[test]
    fn mark_used_persists() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let identity = store.create(PASSWORD, None).unwrap();
        assert!(identity.last_used.is_none());

        store.mark_used(PASSWORD, &identity.id).unwrap();
        let reloaded = store.load_primary(PASSWORD).unwrap();
        assert!(reloaded.last_used.is_some());
    }
}
