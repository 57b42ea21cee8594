//! Session bootstrap: establish who is signed in at startup, and keep the
//! local session in line with an external sign-in provider.

use tracing::{debug, info};

use crate::api::{ApiError, AuthClient, SocialProfile};
use crate::auth::UserIdentity;

/// What the external identity provider currently reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalSession {
    /// Provider has not reported yet; nothing to reconcile
    Unknown,
    /// Provider reports no signed-in user
    Absent,
    Present(SocialProfile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Stored credentials were still good (possibly after a silent refresh)
    Restored(UserIdentity),
    /// Local session was empty and the external identity was exchanged for one
    SocialSignIn(UserIdentity),
    /// External provider signed out, so the local session was ended
    SignedOut,
    Anonymous,
}

impl AuthClient {
    /// Load the current user, then reconcile with the external provider.
    pub async fn bootstrap(&self, external: &ExternalSession) -> Result<BootstrapOutcome, ApiError> {
        let restored = match self.load_user().await {
            Ok(user) => {
                info!(user_id = %user.id, "Session restored");
                Some(user)
            }
            Err(ApiError::Unauthorized) => {
                debug!("No resumable session");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(outcome) = self.reconcile(external).await? {
            return Ok(outcome);
        }

        Ok(match restored {
            Some(user) => BootstrapOutcome::Restored(user),
            None => BootstrapOutcome::Anonymous,
        })
    }

    /// Align the local session with the external provider. Returns `None` when
    /// nothing had to change.
    pub async fn reconcile(
        &self,
        external: &ExternalSession,
    ) -> Result<Option<BootstrapOutcome>, ApiError> {
        let signed_in = self.session().is_authenticated();

        match external {
            ExternalSession::Present(profile) if !signed_in => {
                debug!(email = %profile.email, "Exchanging external identity for a session");
                let user = self.social_auth(profile).await?;
                Ok(Some(BootstrapOutcome::SocialSignIn(user)))
            }
            ExternalSession::Absent if signed_in => {
                debug!("External provider signed out, ending local session");
                self.logout().await?;
                Ok(Some(BootstrapOutcome::SignedOut))
            }
            _ => Ok(None),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::client::tests::client;
    use crate::api::client::{LOGIN_PATH, LOGOUT_PATH, ME_PATH, SOCIAL_AUTH_PATH};
    use crate::api::REFRESH_PATH;
    use crate::auth::{CookieOptions, CredentialKind};
    use crate::testing::{status, ScriptedTransport};
    use reqwest::StatusCode;

    const SIGN_IN_BODY: &str = r#"{
        "accessToken": "A1",
        "refreshToken": "R1",
        "user": { "_id": "u7", "name": "Grace", "email": "grace@example.com" }
    }"#;

    fn profile() -> SocialProfile {
        SocialProfile {
            email: "grace@example.com".to_string(),
            name: "Grace".to_string(),
            avatar: Some("https://x/g.png".to_string()),
        }
    }

    /// Backend with no session for anonymous callers
    fn backend() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(|call| match call.path.as_str() {
            ME_PATH if call.bearer.as_deref() == Some("A1") => ScriptedTransport::json(
                StatusCode::OK,
                r#"{"user":{"_id":"u7","name":"Grace","email":"grace@example.com"}}"#,
            ),
            LOGIN_PATH | SOCIAL_AUTH_PATH => ScriptedTransport::json(StatusCode::OK, SIGN_IN_BODY),
            LOGOUT_PATH => status(StatusCode::OK),
            _ => status(StatusCode::UNAUTHORIZED),
        }))
    }

    #[tokio::test]
    async fn test_restores_stored_session() {
        let transport = backend();
        let client = client(&transport);
        client.credentials().set_pair("A1", "R1").unwrap();

        let outcome = client.bootstrap(&ExternalSession::Unknown).await.unwrap();
        match outcome {
            BootstrapOutcome::Restored(user) => assert_eq!(user.id, "u7"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(client.session().is_authenticated());
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_anonymous_without_credentials() {
        let transport = backend();
        let client = client(&transport);

        let outcome = client.bootstrap(&ExternalSession::Unknown).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Anonymous);
        // No refresh token, so no refresh call.
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_external_identity_signs_in() {
        let transport = backend();
        let client = client(&transport);

        let outcome = client
            .bootstrap(&ExternalSession::Present(profile()))
            .await
            .unwrap();
        assert!(matches!(outcome, BootstrapOutcome::SocialSignIn(ref user) if user.id == "u7"));
        assert_eq!(
            client.credentials().get(CredentialKind::Access).as_deref(),
            Some("A1")
        );

        let social = transport
            .calls()
            .into_iter()
            .find(|c| c.path == SOCIAL_AUTH_PATH)
            .unwrap();
        assert_eq!(
            social.body,
            Some(serde_json::json!({
                "email": "grace@example.com",
                "name": "Grace",
                "avatar": "https://x/g.png"
            }))
        );
    }

    #[tokio::test]
    async fn test_external_identity_ignored_when_signed_in() {
        let transport = backend();
        let client = client(&transport);
        client.credentials().set_pair("A1", "R1").unwrap();

        let outcome = client
            .bootstrap(&ExternalSession::Present(profile()))
            .await
            .unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Restored(_)));
        assert_eq!(transport.calls_to(SOCIAL_AUTH_PATH), 0);
    }

    #[tokio::test]
    async fn test_external_sign_out_ends_session() {
        let transport = backend();
        let client = client(&transport);
        client.login("grace@example.com", "pw").await.unwrap();

        let outcome = client.reconcile(&ExternalSession::Absent).await.unwrap();
        assert_eq!(outcome, Some(BootstrapOutcome::SignedOut));
        assert!(!client.session().is_authenticated());
        assert!(!client.credentials().has_any());
        assert_eq!(transport.calls_to(LOGOUT_PATH), 1);

        // Already signed out: nothing further to do.
        let again = client.reconcile(&ExternalSession::Absent).await.unwrap();
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let transport = Arc::new(ScriptedTransport::new(|_| status(StatusCode::BAD_GATEWAY)));
        let client = client(&transport);
        client
            .credentials()
            .set(CredentialKind::Access, "A1", CookieOptions::default())
            .unwrap();

        let err = client.bootstrap(&ExternalSession::Unknown).await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));
    }
}
