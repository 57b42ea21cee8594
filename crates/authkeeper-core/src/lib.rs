//! Client-side session layer: holds the access/refresh token pair, attaches it
//! to every backend call, refreshes it on a 401, and keeps an observable
//! session in step with the stored credentials.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, ApiRequest, ApiResponse, AuthClient, RefreshError, SocialProfile};
pub use auth::{CookieOptions, CredentialKind, CredentialStore, Session, SessionEvent, UserIdentity};
pub use bootstrap::{BootstrapOutcome, ExternalSession};
pub use config::Config;
