//! Credential store for the access/refresh token pair.
//!
//! Reads come from an in-memory mirror so header attachment never blocks on
//! I/O. Writes go to the persistence backend first and only then update the
//! mirror, so readers never observe a token the backend failed to keep.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::backends::{CredentialBackend, MemoryBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::Access, CredentialKind::Refresh];

    /// Name of the persisted entry (matches the cookie names the backend issues)
    pub fn entry_name(self) -> &'static str {
        match self {
            CredentialKind::Access => "accessToken",
            CredentialKind::Refresh => "refreshToken",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_name())
    }
}

/// Cross-site delivery mode for a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    fn strictness(self) -> u8 {
        match self {
            SameSite::Strict => 2,
            SameSite::Lax => 1,
            SameSite::None => 0,
        }
    }
}

/// Transport-security attributes written alongside every credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieOptions {
    pub same_site: SameSite,
    pub secure: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            same_site: SameSite::Lax,
            secure: true,
        }
    }
}

impl CookieOptions {
    /// True if these options expose the credential more widely than `policy` allows
    pub fn is_weaker_than(&self, policy: &CookieOptions) -> bool {
        (policy.secure && !self.secure)
            || self.same_site.strictness() < policy.same_site.strictness()
    }

    fn validate(&self) -> Result<(), CredentialError> {
        // Browsers drop SameSite=None cookies that are not Secure.
        if self.same_site == SameSite::None && !self.secure {
            return Err(CredentialError::InsecureCrossSite);
        }
        Ok(())
    }
}

/// A persisted credential together with the options it was written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub value: String,
    pub options: CookieOptions,
    pub stored_at: DateTime<Utc>,
}

impl StoredCredential {
    pub fn new(value: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            value: value.into(),
            options,
            stored_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Refusing to write {kind} with weaker options than the configured policy")]
    Downgrade { kind: CredentialKind },

    #[error("Cross-site credentials must be marked secure")]
    InsecureCrossSite,

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential encryption error: {0}")]
    Encryption(String),
}

pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    policy: CookieOptions,
    entries: RwLock<HashMap<CredentialKind, StoredCredential>>,
}

impl CredentialStore {
    /// Open a store over `backend`, loading whatever it already holds.
    pub fn open(
        backend: Box<dyn CredentialBackend>,
        policy: CookieOptions,
    ) -> Result<Self, CredentialError> {
        policy.validate()?;

        let mut entries = HashMap::new();
        for kind in CredentialKind::ALL {
            if let Some(stored) = backend.load(kind)? {
                entries.insert(kind, stored);
            }
        }
        debug!(entries = entries.len(), "Credential store opened");

        Ok(Self {
            backend,
            policy,
            entries: RwLock::new(entries),
        })
    }

    /// A process-local store with nothing persisted
    pub fn in_memory(policy: CookieOptions) -> Result<Self, CredentialError> {
        Self::open(Box::new(MemoryBackend::default()), policy)
    }

    pub fn policy(&self) -> CookieOptions {
        self.policy
    }

    pub fn get(&self, kind: CredentialKind) -> Option<String> {
        self.entries.read().get(&kind).map(|c| c.value.clone())
    }

    /// Full stored entry including its options
    pub fn entry(&self, kind: CredentialKind) -> Option<StoredCredential> {
        self.entries.read().get(&kind).cloned()
    }

    pub fn has_any(&self) -> bool {
        !self.entries.read().is_empty()
    }

    /// Write one credential with explicit options.
    pub fn set(
        &self,
        kind: CredentialKind,
        value: &str,
        options: CookieOptions,
    ) -> Result<(), CredentialError> {
        options.validate()?;
        if options.is_weaker_than(&self.policy) {
            return Err(CredentialError::Downgrade { kind });
        }

        let stored = StoredCredential::new(value, options);
        self.backend.save(kind, &stored)?;
        self.entries.write().insert(kind, stored);
        Ok(())
    }

    /// Options a rotated entry is written with: whatever the current entry
    /// carries, unless that has fallen below the policy.
    fn rotation_options(&self, kind: CredentialKind) -> CookieOptions {
        match self.entries.read().get(&kind) {
            Some(current) if !current.options.is_weaker_than(&self.policy) => current.options,
            _ => self.policy,
        }
    }

    /// Write both tokens; readers see both change together.
    pub fn set_pair(&self, access: &str, refresh: &str) -> Result<(), CredentialError> {
        let access = StoredCredential::new(access, self.rotation_options(CredentialKind::Access));
        let refresh =
            StoredCredential::new(refresh, self.rotation_options(CredentialKind::Refresh));
        self.backend.save_pair(&access, &refresh)?;

        let mut entries = self.entries.write();
        entries.insert(CredentialKind::Access, access);
        entries.insert(CredentialKind::Refresh, refresh);
        Ok(())
    }

    pub fn clear(&self, kind: CredentialKind) -> Result<(), CredentialError> {
        self.backend.remove(kind)?;
        self.entries.write().remove(&kind);
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), CredentialError> {
        for kind in CredentialKind::ALL {
            self.backend.remove(kind)?;
        }
        self.entries.write().clear();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn strict() -> CookieOptions {
        CookieOptions {
            same_site: SameSite::Strict,
            secure: true,
        }
    }

    #[test]
    fn test_set_get_clear() {
        let store = CredentialStore::in_memory(CookieOptions::default()).unwrap();
        assert_eq!(store.get(CredentialKind::Access), None);

        store
            .set(CredentialKind::Access, "A1", CookieOptions::default())
            .unwrap();
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A1"));
        assert_eq!(store.get(CredentialKind::Refresh), None);

        store.clear(CredentialKind::Access).unwrap();
        assert_eq!(store.get(CredentialKind::Access), None);
        // Clearing an absent entry is fine
        store.clear(CredentialKind::Access).unwrap();
    }

    #[test]
    fn test_options_preserved_verbatim() {
        let store = CredentialStore::in_memory(CookieOptions::default()).unwrap();
        store.set(CredentialKind::Refresh, "R1", strict()).unwrap();

        let entry = store.entry(CredentialKind::Refresh).unwrap();
        assert_eq!(entry.options, strict());
    }

    #[test]
    fn test_downgrade_rejected() {
        let store = CredentialStore::in_memory(strict()).unwrap();

        let lax = CookieOptions {
            same_site: SameSite::Lax,
            secure: true,
        };
        let err = store.set(CredentialKind::Access, "A1", lax).unwrap_err();
        assert!(matches!(err, CredentialError::Downgrade { kind: CredentialKind::Access }));

        let insecure = CookieOptions {
            same_site: SameSite::Strict,
            secure: false,
        };
        assert!(store.set(CredentialKind::Access, "A1", insecure).is_err());
        assert_eq!(store.get(CredentialKind::Access), None);
    }

    #[test]
    fn test_cross_site_requires_secure() {
        let policy = CookieOptions {
            same_site: SameSite::None,
            secure: false,
        };
        let store = CredentialStore::in_memory(CookieOptions {
            same_site: SameSite::None,
            secure: true,
        })
        .unwrap();
        let err = store.set(CredentialKind::Access, "A1", policy).unwrap_err();
        assert!(matches!(err, CredentialError::InsecureCrossSite));

        // The same check applies to the policy itself.
        assert!(matches!(
            CredentialStore::in_memory(policy),
            Err(CredentialError::InsecureCrossSite)
        ));
    }

    #[test]
    fn test_set_pair_and_clear_all() {
        let store = CredentialStore::in_memory(strict()).unwrap();
        store.set_pair("A1", "R1").unwrap();
        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A1"));
        assert_eq!(store.get(CredentialKind::Refresh).as_deref(), Some("R1"));
        assert_eq!(store.entry(CredentialKind::Access).unwrap().options, strict());

        store.clear_all().unwrap();
        assert!(!store.has_any());
    }

    #[test]
    fn test_set_pair_keeps_stricter_options() {
        let store = CredentialStore::in_memory(CookieOptions::default()).unwrap();
        store.set(CredentialKind::Refresh, "R1", strict()).unwrap();

        store.set_pair("A2", "R2").unwrap();
        let refresh = store.entry(CredentialKind::Refresh).unwrap();
        assert_eq!(refresh.value, "R2");
        assert_eq!(refresh.options, strict());
        // No previous entry, so the access token gets the policy.
        assert_eq!(
            store.entry(CredentialKind::Access).unwrap().options,
            CookieOptions::default()
        );
    }

    /// Memory backend whose refresh writes can be made to fail
    struct FlakyBackend {
        inner: Arc<MemoryBackend>,
        fail_refresh: Arc<AtomicBool>,
    }

    impl CredentialBackend for FlakyBackend {
        fn load(&self, kind: CredentialKind) -> Result<Option<StoredCredential>, CredentialError> {
            self.inner.load(kind)
        }

        fn save(&self, kind: CredentialKind, credential: &StoredCredential) -> Result<(), CredentialError> {
            if kind == CredentialKind::Refresh && self.fail_refresh.load(Ordering::SeqCst) {
                return Err(CredentialError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(kind, credential)
        }

        fn remove(&self, kind: CredentialKind) -> Result<(), CredentialError> {
            self.inner.remove(kind)
        }
    }

    #[test]
    fn test_failed_pair_write_leaves_old_pair() {
        let inner = Arc::new(MemoryBackend::default());
        let fail_refresh = Arc::new(AtomicBool::new(false));
        let backend = FlakyBackend {
            inner: Arc::clone(&inner),
            fail_refresh: Arc::clone(&fail_refresh),
        };
        let store = CredentialStore::open(Box::new(backend), CookieOptions::default()).unwrap();
        store.set_pair("A1", "R1").unwrap();

        fail_refresh.store(true, Ordering::SeqCst);
        assert!(store.set_pair("A2", "R2").is_err());

        assert_eq!(store.get(CredentialKind::Access).as_deref(), Some("A1"));
        assert_eq!(store.get(CredentialKind::Refresh).as_deref(), Some("R1"));
        let persisted = |kind| inner.load(kind).unwrap().map(|c| c.value);
        assert_eq!(persisted(CredentialKind::Access).as_deref(), Some("A1"));
        assert_eq!(persisted(CredentialKind::Refresh).as_deref(), Some("R1"));
    }

    #[test]
    fn test_open_hydrates_from_backend() {
        let backend = MemoryBackend::default();
        backend
            .save(
                CredentialKind::Refresh,
                &StoredCredential::new("R9", CookieOptions::default()),
            )
            .unwrap();

        let store = CredentialStore::open(Box::new(backend), CookieOptions::default()).unwrap();
        assert_eq!(store.get(CredentialKind::Refresh).as_deref(), Some("R9"));
        assert_eq!(store.get(CredentialKind::Access), None);
    }
}
