//! The seam between the authorizer and the network.
//!
//! `Transport` executes one already-authorized request. `HttpTransport` is the
//! reqwest implementation; tests substitute a scripted one.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::ApiError;

/// Side-channel header carrying the refresh token
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, without a leading slash
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Ok(Self {
            method: Method::POST,
            path: path.into(),
            body: Some(serde_json::to_value(body)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Convert a non-success response into the matching error
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let response = self.error_for_status()?;
        serde_json::from_str(&response.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: ApiRequest,
        headers: HeaderMap,
    ) -> BoxFuture<'_, Result<ApiResponse, ApiError>>;
}

/// Headers every request carries: JSON content type, the bearer access token
/// and the refresh token side channel when present.
pub(crate) fn authorization_headers(
    access: Option<&str>,
    refresh: Option<&str>,
) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(token) = access {
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
    }
    if let Some(token) = refresh {
        headers.insert(REFRESH_TOKEN_HEADER, HeaderValue::from_str(token)?);
    }
    Ok(headers)
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        // Cookie store so server-set cookies ride along, like a browser with credentials: "include"
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        request: ApiRequest,
        headers: HeaderMap,
    ) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        Box::pin(async move {
            let url = self.url(&request.path);
            debug!(method = %request.method, url = %url, "Sending request");

            let mut builder = self.client.request(request.method, &url).headers(headers);
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let body = response.text().await?;
            debug!(url = %url, status = status.as_u16(), "Response received");

            Ok(ApiResponse { status, body })
        })
    }
}
