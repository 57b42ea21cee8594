//! Scripted transport for exercising the authorizer without sockets.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, StatusCode};

use crate::api::transport::REFRESH_TOKEN_HEADER;
use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};

/// What the transport saw for one request
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub method: Method,
    pub path: String,
    /// Access token from the `Authorization: Bearer` header
    pub bearer: Option<String>,
    pub refresh_header: Option<String>,
    pub body: Option<serde_json::Value>,
}

type Handler = dyn Fn(&Call) -> ApiResponse + Send + Sync;

pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Call>>,
}

pub(crate) fn status(code: StatusCode) -> ApiResponse {
    ApiResponse::new(code, "")
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&Call) -> ApiResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold responses for `path` for `delay` before answering
    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    pub fn json(code: StatusCode, body: &str) -> ApiResponse {
        ApiResponse::new(code, body)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.path == path).count()
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: ApiRequest,
        headers: HeaderMap,
    ) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        Box::pin(async move {
            let call = Call {
                method: request.method,
                path: request.path,
                bearer: header_string(&headers, AUTHORIZATION.as_str())
                    .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string)),
                refresh_header: header_string(&headers, REFRESH_TOKEN_HEADER),
                body: request.body,
            };
            self.calls.lock().push(call.clone());

            if let Some(delay) = self.delays.get(&call.path) {
                tokio::time::sleep(*delay).await;
            }
            Ok((self.handler)(&call))
        })
    }
}
