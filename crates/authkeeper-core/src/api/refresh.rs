//! Refresh protocol: exchanges the refresh token for a new pair, single-flight.
//!
//! At most one exchange runs at a time. The first caller spawns it and parks a
//! `Shared` handle in the slot; everyone arriving while it runs clones that
//! handle and receives the same outcome. The exchange runs on its own task so
//! a caller giving up does not cancel it for the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use super::transport::{authorization_headers, ApiRequest, Transport};
use super::RefreshError;
use crate::auth::{CredentialKind, Rotation, SessionContext, TokenPair};

pub const REFRESH_PATH: &str = "refresh";

type RefreshOutcome = Result<TokenPair, RefreshError>;
type InFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    context: Arc<SessionContext>,
    timeout: Duration,
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<SessionContext>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            context,
            timeout,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Join the running exchange, or start one. Must be called within a tokio runtime.
    pub async fn refresh(&self) -> RefreshOutcome {
        let attempt = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(running) => {
                    debug!("Joining in-flight token refresh");
                    running.clone()
                }
                None => {
                    let attempt = self.start();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    fn start(&self) -> InFlight {
        let transport = Arc::clone(&self.transport);
        let context = Arc::clone(&self.context);
        let slot = Arc::clone(&self.in_flight);
        let timeout = self.timeout;

        // The caller holds the slot lock until the handle is parked, so the
        // task cannot clear the slot before it has been filled.
        let task = tokio::spawn(async move {
            let outcome = exchange(transport.as_ref(), &context, timeout).await;
            slot.lock().take();
            outcome
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

/// One exchange against the refresh endpoint. Store and session are written
/// only on success, and only if the session it started from is still current.
async fn exchange(
    transport: &dyn Transport,
    context: &SessionContext,
    limit: Duration,
) -> RefreshOutcome {
    let started_at = context.generation();
    let store = context.credentials();
    let presented = store
        .get(CredentialKind::Refresh)
        .ok_or(RefreshError::MissingRefreshToken)?;

    let access = store.get(CredentialKind::Access);
    let headers = authorization_headers(access.as_deref(), Some(&presented))
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

    debug!("Exchanging refresh token");
    let response = match tokio::time::timeout(
        limit,
        transport.execute(ApiRequest::get(REFRESH_PATH), headers),
    )
    .await
    {
        Err(_) => return Err(RefreshError::TimedOut(limit)),
        Ok(Err(e)) => return Err(RefreshError::Network(e.to_string())),
        Ok(Ok(response)) => response,
    };

    if !response.is_success() {
        return Err(RefreshError::Rejected {
            status: response.status.as_u16(),
        });
    }

    let body: RefreshResponse = serde_json::from_str(&response.body)
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

    // Backends that do not rotate refresh tokens keep the presented one valid.
    let pair = TokenPair {
        access_token: body.access_token,
        refresh_token: body.refresh_token.unwrap_or(presented),
    };

    match context.rotate(&pair, started_at) {
        Ok(Rotation::Applied) => {
            info!("Access token refreshed");
            Ok(pair)
        }
        Ok(Rotation::Superseded) => Err(RefreshError::Superseded),
        Err(e) => Err(RefreshError::Store(e.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================
