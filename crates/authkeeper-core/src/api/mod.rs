//! Network side of the session layer.
//!
//! Every outbound call goes through the `RequestAuthorizer`, which attaches
//! the bearer access token (and the refresh token side channel), and on a
//! 401 runs the single-flight `RefreshCoordinator` before retrying once.
//! `AuthClient` builds the auth operations on top of it.

pub mod authorizer;
pub mod client;
pub mod error;
pub mod refresh;
pub mod transport;

pub use authorizer::RequestAuthorizer;
pub use client::{
    ActivationResponse, AuthClient, RegistrationData, RegistrationResponse, SocialProfile,
};
pub use error::{ApiError, RefreshError};
pub use refresh::{RefreshCoordinator, REFRESH_PATH};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport, REFRESH_TOKEN_HEADER};
