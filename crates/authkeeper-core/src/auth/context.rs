use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::credentials::{CredentialError, CredentialKind, CredentialStore};
use super::session::{SessionPatch, SessionState, UserIdentity};

/// Access/refresh pair as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Whether a refreshed pair was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Applied,
    /// A sign-in or sign-out happened after the refresh started; nothing was written.
    Superseded,
}

/// Credential store and session state together. These are the only write
/// paths, so the store and the observable session cannot drift apart.
///
/// Every sign-in that installs a new pair and every sign-out bumps a
/// generation number. A refresh records the generation it started under and
/// may only install its pair if no such sign-in or sign-out has happened since.
pub struct SessionContext {
    credentials: Arc<CredentialStore>,
    session: Arc<SessionState>,
    generation: Mutex<u64>,
}

impl SessionContext {
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            credentials: Arc::new(credentials),
            session: Arc::new(SessionState::new()),
            generation: Mutex::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Record a confirmed identity. New tokens, if the backend sent any, are
    /// persisted first; the session mirrors whatever the store then holds.
    pub fn establish(
        &self,
        user: UserIdentity,
        tokens: Option<&TokenPair>,
    ) -> Result<(), CredentialError> {
        let mut generation = self.generation.lock();
        if let Some(pair) = tokens {
            // A new pair starts a new session; an identity reload does not.
            *generation += 1;
            self.credentials
                .set_pair(&pair.access_token, &pair.refresh_token)?;
        }

        info!(user_id = %user.id, "Session established");
        self.session.replace(SessionPatch {
            user: Some(user),
            access_token: self.credentials.get(CredentialKind::Access),
            refresh_token: self.credentials.get(CredentialKind::Refresh),
        });
        Ok(())
    }

    /// Install a refreshed pair obtained under `started_at`; the user is untouched.
    pub fn rotate(
        &self,
        pair: &TokenPair,
        started_at: u64,
    ) -> Result<Rotation, CredentialError> {
        let generation = self.generation.lock();
        if *generation != started_at {
            debug!(started_at, current = *generation, "Discarding refresh from an ended session");
            return Ok(Rotation::Superseded);
        }

        self.credentials
            .set_pair(&pair.access_token, &pair.refresh_token)?;
        self.session
            .update_tokens(&pair.access_token, &pair.refresh_token);
        Ok(Rotation::Applied)
    }

    /// Logout-equivalent cleanup. The session is reset even if the store fails to clear.
    pub fn teardown(&self) -> Result<(), CredentialError> {
        let mut generation = self.generation.lock();
        *generation += 1;

        let cleared = self.credentials.clear_all();
        self.session.reset();
        cleared
    }

    /// Tear down only if no sign-in or sign-out happened since `started_at`.
    /// Returns whether anything was torn down.
    pub fn teardown_if_current(&self, started_at: u64) -> Result<bool, CredentialError> {
        let mut generation = self.generation.lock();
        if *generation != started_at {
            return Ok(false);
        }
        *generation += 1;

        let cleared = self.credentials.clear_all();
        self.session.reset();
        cleared.map(|()| true)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CookieOptions;

    fn context() -> SessionContext {
        SessionContext::new(CredentialStore::in_memory(CookieOptions::default()).unwrap())
    }

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    fn user() -> UserIdentity {
        UserIdentity {
            id: "u1".to_string(),
            name: String::new(),
            email: String::new(),
            avatar: None,
        }
    }

    #[test]
    fn test_establish_without_tokens_mirrors_store() {
        let ctx = context();
        ctx.credentials().set_pair("A2", "R2").unwrap();
        ctx.establish(user(), None).unwrap();

        let session = ctx.session().current();
        assert_eq!(session.user, Some(user()));
        assert_eq!(session.access_token.as_deref(), Some("A2"));
        assert_eq!(session.refresh_token.as_deref(), Some("R2"));
    }

    #[test]
    fn test_rotate_then_teardown() {
        let ctx = context();
        ctx.establish(user(), Some(&pair("A1", "R1"))).unwrap();
        let started = ctx.generation();
        assert_eq!(ctx.rotate(&pair("A2", "R2"), started).unwrap(), Rotation::Applied);

        assert_eq!(
            ctx.credentials().get(CredentialKind::Access).as_deref(),
            Some("A2")
        );
        assert_eq!(ctx.session().current().user, Some(user()));

        ctx.teardown().unwrap();
        ctx.teardown().unwrap();
        assert!(!ctx.credentials().has_any());
        assert!(ctx.session().current().user.is_none());
    }

    #[test]
    fn test_rotate_after_sign_in_is_discarded() {
        let ctx = context();
        ctx.establish(user(), Some(&pair("A1", "R1"))).unwrap();
        let started = ctx.generation();

        // A new sign-in lands while the refresh is still out.
        ctx.establish(user(), Some(&pair("L1", "LR1"))).unwrap();
        assert_eq!(ctx.rotate(&pair("A2", "R2"), started).unwrap(), Rotation::Superseded);

        assert_eq!(
            ctx.credentials().get(CredentialKind::Access).as_deref(),
            Some("L1")
        );
        assert_eq!(ctx.session().current().access_token.as_deref(), Some("L1"));
    }

    #[test]
    fn test_identity_reload_keeps_refresh_valid() {
        let ctx = context();
        ctx.establish(user(), Some(&pair("A1", "R1"))).unwrap();
        let started = ctx.generation();

        ctx.establish(user(), None).unwrap();
        assert_eq!(ctx.rotate(&pair("A2", "R2"), started).unwrap(), Rotation::Applied);
        assert_eq!(ctx.session().current().access_token.as_deref(), Some("A2"));
    }

    #[test]
    fn test_rotate_after_teardown_writes_nothing() {
        let ctx = context();
        ctx.establish(user(), Some(&pair("A1", "R1"))).unwrap();
        let started = ctx.generation();

        ctx.teardown().unwrap();
        assert_eq!(ctx.rotate(&pair("A2", "R2"), started).unwrap(), Rotation::Superseded);
        assert!(!ctx.credentials().has_any());
        assert_eq!(ctx.session().current().access_token, None);
    }

    #[test]
    fn test_conditional_teardown_spares_newer_session() {
        let ctx = context();
        ctx.establish(user(), Some(&pair("A1", "R1"))).unwrap();
        let started = ctx.generation();

        ctx.establish(user(), Some(&pair("L1", "LR1"))).unwrap();
        assert!(!ctx.teardown_if_current(started).unwrap());
        assert!(ctx.credentials().has_any());

        assert!(ctx.teardown_if_current(ctx.generation()).unwrap());
        assert!(!ctx.credentials().has_any());
    }
}
