//! Request authorizer: attaches credentials to every call and recovers from
//! a 401 by refreshing once and retrying once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::refresh::RefreshCoordinator;
use super::transport::{authorization_headers, ApiRequest, ApiResponse, Transport};
use super::{ApiError, RefreshError};
use crate::auth::{CredentialKind, SessionContext};

pub struct RequestAuthorizer {
    transport: Arc<dyn Transport>,
    context: Arc<SessionContext>,
    refresher: RefreshCoordinator,
}

impl RequestAuthorizer {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<SessionContext>,
        refresh_timeout: Duration,
    ) -> Self {
        let refresher =
            RefreshCoordinator::new(Arc::clone(&transport), Arc::clone(&context), refresh_timeout);
        Self {
            transport,
            context,
            refresher,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Send `request` with the current credentials.
    ///
    /// Anything but a 401 is returned as received, error statuses included.
    /// A 401 triggers (or joins) a refresh and one retry; if the refresh fails
    /// the session is torn down and `ApiError::Unauthorized` is returned.
    /// Transport failures surface as `ApiError::NetworkError`.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let store = self.context.credentials();
        let sent_access = store.get(CredentialKind::Access);
        let headers = authorization_headers(
            sent_access.as_deref(),
            store.get(CredentialKind::Refresh).as_deref(),
        )?;

        let response = self.transport.execute(request.clone(), headers).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }
        debug!(path = %request.path, "Request rejected as unauthorized");

        let Some((access, refresh)) = self.recover(sent_access.as_deref()).await else {
            return Err(ApiError::Unauthorized);
        };

        let headers = authorization_headers(Some(&access), refresh.as_deref())?;
        let retried = self.transport.execute(request.clone(), headers).await?;
        if retried.is_unauthorized() {
            // No second refresh: a backend that keeps rejecting would loop forever.
            warn!(path = %request.path, "Request still unauthorized after refresh");
            return Err(ApiError::Unauthorized);
        }
        Ok(retried)
    }

    /// Credentials to retry with, or `None` once the session has been torn down.
    async fn recover(&self, sent_access: Option<&str>) -> Option<(String, Option<String>)> {
        let store = self.context.credentials();
        let started_at = self.context.generation();

        // A refresh may have landed between sending and the rejection.
        if let Some(current) = store.get(CredentialKind::Access) {
            if sent_access != Some(current.as_str()) {
                debug!("Credentials rotated while request was in flight, retrying");
                return Some((current, store.get(CredentialKind::Refresh)));
            }
        }

        match self.refresher.refresh().await {
            Ok(pair) => Some((pair.access_token, Some(pair.refresh_token))),
            Err(RefreshError::Superseded) => {
                // Signed in again: retry as the new session. Signed out: give up.
                debug!("Session changed during refresh");
                let current = store.get(CredentialKind::Access)?;
                Some((current, store.get(CredentialKind::Refresh)))
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                match self.context.teardown_if_current(started_at) {
                    Ok(true) => {}
                    Ok(false) => debug!("Session changed during refresh, leaving it in place"),
                    Err(e) => warn!(error = %e, "Failed to clear stored credentials"),
                }
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
