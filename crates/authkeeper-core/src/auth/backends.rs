//! Persistence backends behind the credential store.

use std::collections::HashMap;
use std::path::PathBuf;

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use keyring::Entry;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::credentials::{CredentialError, CredentialKind, StoredCredential};

/// Durable key/value storage for credentials. Implementations do blocking I/O;
/// the store only calls them on the write path and once at open.
pub trait CredentialBackend: Send + Sync {
    fn load(&self, kind: CredentialKind) -> Result<Option<StoredCredential>, CredentialError>;
    fn save(&self, kind: CredentialKind, credential: &StoredCredential) -> Result<(), CredentialError>;
    fn remove(&self, kind: CredentialKind) -> Result<(), CredentialError>;

    /// Persist both tokens. If the refresh entry cannot be written, the
    /// access entry is put back so a later open never sees a mixed pair.
    fn save_pair(
        &self,
        access: &StoredCredential,
        refresh: &StoredCredential,
    ) -> Result<(), CredentialError> {
        let previous = self.load(CredentialKind::Access)?;
        self.save(CredentialKind::Access, access)?;

        if let Err(e) = self.save(CredentialKind::Refresh, refresh) {
            let restored = match previous {
                Some(prev) => self.save(CredentialKind::Access, &prev),
                None => self.remove(CredentialKind::Access),
            };
            if let Err(rollback) = restored {
                warn!(error = %rollback, "Failed to restore access token after partial write");
            }
            return Err(e);
        }
        Ok(())
    }
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<CredentialKind, StoredCredential>>,
}

impl CredentialBackend for MemoryBackend {
    fn load(&self, kind: CredentialKind) -> Result<Option<StoredCredential>, CredentialError> {
        Ok(self.entries.lock().get(&kind).cloned())
    }

    fn save(&self, kind: CredentialKind, credential: &StoredCredential) -> Result<(), CredentialError> {
        self.entries.lock().insert(kind, credential.clone());
        Ok(())
    }

    fn remove(&self, kind: CredentialKind) -> Result<(), CredentialError> {
        self.entries.lock().remove(&kind);
        Ok(())
    }

    fn save_pair(
        &self,
        access: &StoredCredential,
        refresh: &StoredCredential,
    ) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock();
        entries.insert(CredentialKind::Access, access.clone());
        entries.insert(CredentialKind::Refresh, refresh.clone());
        Ok(())
    }
}

// ============================================================================
// OS keychain
// ============================================================================

pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, kind: CredentialKind) -> Result<Entry, CredentialError> {
        Ok(Entry::new(&self.service, kind.entry_name())?)
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self, kind: CredentialKind) -> Result<Option<StoredCredential>, CredentialError> {
        match self.entry(kind)?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, kind: CredentialKind, credential: &StoredCredential) -> Result<(), CredentialError> {
        let json = serde_json::to_string(credential)?;
        self.entry(kind)?.set_password(&json)?;
        Ok(())
    }

    fn remove(&self, kind: CredentialKind) -> Result<(), CredentialError> {
        match self.entry(kind)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Encrypted file
// ============================================================================

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// On-disk layout of the sealed credential file
#[derive(Serialize, Deserialize)]
struct SealedFile {
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

type Entries = HashMap<CredentialKind, StoredCredential>;

/// Argon2 output for one salt. Deriving is deliberately slow, so the key is
/// kept for as long as the file keeps that salt.
struct DerivedKey {
    salt: Vec<u8>,
    key: [u8; KEY_LEN],
}

/// Stores both credentials in one file sealed with ChaCha20-Poly1305.
/// The key is derived from a passphrase with Argon2 and a random salt chosen
/// once per backend; the nonce is regenerated on every write.
pub struct EncryptedFileBackend {
    path: PathBuf,
    passphrase: String,
    // Also serializes read-modify-write cycles on the file.
    derived: Mutex<Option<DerivedKey>>,
}

impl EncryptedFileBackend {
    pub fn new(path: PathBuf, passphrase: impl Into<String>) -> Self {
        Self {
            path,
            passphrase: passphrase.into(),
            derived: Mutex::new(None),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN], CredentialError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        debug!("Derived credential file key");
        Ok(key)
    }

    /// Key for `salt`, deriving it only if the cached one is for another salt
    fn key_for(
        &self,
        salt: &[u8],
        derived: &mut Option<DerivedKey>,
    ) -> Result<[u8; KEY_LEN], CredentialError> {
        if let Some(cached) = derived.as_ref().filter(|d| d.salt == salt) {
            return Ok(cached.key);
        }
        let key = self.derive_key(salt)?;
        *derived = Some(DerivedKey {
            salt: salt.to_vec(),
            key,
        });
        Ok(key)
    }

    fn read_all(&self, derived: &mut Option<DerivedKey>) -> Result<Entries, CredentialError> {
        if !self.path.exists() {
            return Ok(Entries::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let sealed: SealedFile = serde_json::from_str(&contents)?;
        if sealed.nonce.len() != NONCE_LEN {
            return Err(CredentialError::Encryption("malformed nonce".to_string()));
        }

        let key = self.key_for(&sealed.salt, derived)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| {
                CredentialError::Encryption("wrong passphrase or corrupted file".to_string())
            })?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn write_all(
        &self,
        entries: &Entries,
        derived: &mut Option<DerivedKey>,
    ) -> Result<(), CredentialError> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let mut rng = rand::thread_rng();
        let salt = match derived.as_ref() {
            Some(cached) => cached.salt.clone(),
            None => {
                let mut salt = vec![0u8; SALT_LEN];
                rng.fill_bytes(&mut salt);
                salt
            }
        };
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let key = self.key_for(&salt, derived)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = serde_json::to_vec(entries)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| CredentialError::Encryption("encryption failed".to_string()))?;

        let sealed = SealedFile {
            salt,
            nonce: nonce.to_vec(),
            ciphertext,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(&sealed)?)?;
        debug!(path = ?self.path, "Credential file written");
        Ok(())
    }
}

impl CredentialBackend for EncryptedFileBackend {
    fn load(&self, kind: CredentialKind) -> Result<Option<StoredCredential>, CredentialError> {
        let mut derived = self.derived.lock();
        Ok(self.read_all(&mut derived)?.remove(&kind))
    }

    fn save(&self, kind: CredentialKind, credential: &StoredCredential) -> Result<(), CredentialError> {
        let mut derived = self.derived.lock();
        let mut entries = self.read_all(&mut derived)?;
        entries.insert(kind, credential.clone());
        self.write_all(&entries, &mut derived)
    }

    fn remove(&self, kind: CredentialKind) -> Result<(), CredentialError> {
        let mut derived = self.derived.lock();
        let mut entries = self.read_all(&mut derived)?;
        if entries.remove(&kind).is_some() {
            self.write_all(&entries, &mut derived)?;
        }
        Ok(())
    }

    /// Both tokens go out in a single sealed write.
    fn save_pair(
        &self,
        access: &StoredCredential,
        refresh: &StoredCredential,
    ) -> Result<(), CredentialError> {
        let mut derived = self.derived.lock();
        let mut entries = self.read_all(&mut derived)?;
        entries.insert(CredentialKind::Access, access.clone());
        entries.insert(CredentialKind::Refresh, refresh.clone());
        self.write_all(&entries, &mut derived)
    }
}

// ============================================================================
// Tests
// ============================================================================
