use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::auth::CredentialError;

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401 that survived the refresh path. The session may already be torn down.
    #[error("Unauthorized - please sign in again")]
    Unauthorized,

    /// 4xx other than 401/403/404/429, e.g. a malformed login body
    #[error("Request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Failed to encode request body: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("No activation token - register first")]
    MissingActivationToken,

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Why a refresh attempt failed. Cloneable so one outcome can be handed to
/// every request waiting on the same attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Refresh timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Refresh network error: {0}")]
    Network(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Failed to store refreshed tokens: {0}")]
    Store(String),

    /// The session was signed in or out while the exchange ran; its pair was dropped
    #[error("Session changed during refresh")]
    Superseded,

    #[error("Refresh task aborted: {0}")]
    Aborted(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Prefer the backend's `{ "message": ... }` over the raw body
    fn message_from(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => Self::truncate_body(&parsed.message),
            Err(_) => Self::truncate_body(body),
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::message_from(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            400..=499 => ApiError::Validation {
                status: status.as_u16(),
                message,
            },
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
