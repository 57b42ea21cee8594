//! Auth operations against the backend.
//!
//! This module provides the `AuthClient` struct: registration, activation,
//! login, social sign-in, identity loading and logout. Every round trip goes
//! through the `RequestAuthorizer`; successful identity calls install tokens
//! and user into the `SessionContext`.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::authorizer::RequestAuthorizer;
use super::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use super::ApiError;
use crate::auth::{CredentialStore, SessionContext, SessionState, TokenPair, UserIdentity};
use crate::config::Config;

// ============================================================================
// Endpoints
// ============================================================================

pub const ME_PATH: &str = "me";
pub const REGISTRATION_PATH: &str = "registration";
pub const ACTIVATION_PATH: &str = "activate-user";
pub const LOGIN_PATH: &str = "login";
pub const SOCIAL_AUTH_PATH: &str = "social-auth";
pub const LOGOUT_PATH: &str = "logout";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(default)]
    pub message: String,
    pub activation_token: String,
}

#[derive(Serialize)]
struct ActivationRequest<'a> {
    activation_token: &'a str,
    activation_code: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivationResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Identity asserted by an external sign-in provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocialProfile {
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    access_token: String,
    refresh_token: String,
    user: UserIdentity,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    user: UserIdentity,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Client for the auth endpoints.
/// Clone is cheap - the authorizer and session are shared.
#[derive(Clone)]
pub struct AuthClient {
    authorizer: Arc<RequestAuthorizer>,
}

impl AuthClient {
    /// Create a client for the configured backend
    pub fn new(config: &Config, credentials: CredentialStore) -> anyhow::Result<Self> {
        let base_url = config.base_url()?;
        let transport = HttpTransport::new(
            &base_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        debug!(base_url = %base_url, "Auth client configured");

        Ok(Self::with_transport(
            Arc::new(transport),
            credentials,
            Duration::from_secs(config.refresh_timeout_secs),
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        credentials: CredentialStore,
        refresh_timeout: Duration,
    ) -> Self {
        let context = Arc::new(SessionContext::new(credentials));
        Self {
            authorizer: Arc::new(RequestAuthorizer::new(transport, context, refresh_timeout)),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        self.context().session()
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        self.context().credentials()
    }

    pub(crate) fn context(&self) -> &Arc<SessionContext> {
        self.authorizer.context()
    }

    /// Send an arbitrary request through the authorizer
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.authorizer.send(request).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send(ApiRequest::post(path, body)?).await?.json()
    }

    // ===== Auth Operations =====

    /// Register an account. The activation token is kept in the session for `activate`.
    pub async fn register(&self, data: &RegistrationData) -> Result<RegistrationResponse, ApiError> {
        let response: RegistrationResponse = self.post(REGISTRATION_PATH, data).await?;
        self.session().set_activation_token(&response.activation_token);
        info!(email = %data.email, "Registration accepted, awaiting activation");
        Ok(response)
    }

    /// Activate the most recently registered account with the emailed code
    pub async fn activate(&self, activation_code: &str) -> Result<ActivationResponse, ApiError> {
        let token = self
            .session()
            .current()
            .activation_token
            .ok_or(ApiError::MissingActivationToken)?;

        let body = ActivationRequest {
            activation_token: &token,
            activation_code,
        };
        let response: ActivationResponse = self.post(ACTIVATION_PATH, &body).await?;
        self.session().take_activation_token();
        info!("Account activated");
        Ok(response)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, ApiError> {
        let response: SignInResponse = self
            .post(LOGIN_PATH, &LoginRequest { email, password })
            .await?;
        self.sign_in(response)
    }

    /// Exchange an externally asserted identity for a backend session
    pub async fn social_auth(&self, profile: &SocialProfile) -> Result<UserIdentity, ApiError> {
        let response: SignInResponse = self.post(SOCIAL_AUTH_PATH, profile).await?;
        self.sign_in(response)
    }

    fn sign_in(&self, response: SignInResponse) -> Result<UserIdentity, ApiError> {
        let tokens = TokenPair {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        };
        self.context()
            .establish(response.user.clone(), Some(&tokens))?;
        Ok(response.user)
    }

    /// "Who am I": load the identity behind the stored credentials
    pub async fn load_user(&self) -> Result<UserIdentity, ApiError> {
        let response: MeResponse = self.get(ME_PATH).await?;

        let tokens = match (response.access_token, response.refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(TokenPair {
                access_token,
                refresh_token,
            }),
            _ => None,
        };
        self.context()
            .establish(response.user.clone(), tokens.as_ref())?;
        Ok(response.user)
    }

    /// Sign out locally and, if there is anything to sign out of, on the server.
    /// Idempotent: a second call finds nothing to clear and succeeds.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if self.credentials().has_any() {
            match self
                .send(ApiRequest::get(LOGOUT_PATH))
                .await
                .and_then(ApiResponse::error_for_status)
            {
                Ok(_) => debug!("Server session closed"),
                Err(e) => warn!(error = %e, "Logout request failed, clearing local session anyway"),
            }
        }

        self.context().teardown()?;
        info!("Signed out");
        Ok(())
    }
}

impl From<&UserIdentity> for SocialProfile {
    fn from(user: &UserIdentity) -> Self {
        Self {
            email: user.email.clone(),
            name: user.name.clone(),
            avatar: user.avatar.as_ref().map(|a| a.url().to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
