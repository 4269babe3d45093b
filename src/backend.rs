//! Outbound boundary to the data-lake API.
//!
//! The [`Backend`] trait is the only seam between the core and the remote
//! API; the tool executor is its sole caller. [`HttpBackend`] maps each
//! tool invocation onto one HTTP request and classifies transport failures
//! so the executor can decide what to retry.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{BackendError, BackendErrorKind};

/// A backend capable of executing the registered tools.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Invokes the operation behind `tool` with validated arguments.
    ///
    /// # Errors
    ///
    /// Returns a classified [`BackendError`]; the executor retries
    /// retryable kinds and never treats any of them as a crash.
    async fn invoke(&self, tool: &str, args: &Value) -> Result<Value, BackendError>;
}

/// HTTP backend: one `POST {base}/tools/{name}` per invocation.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Creates an HTTP backend for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] (`RemoteRejected`) if the client cannot be
    /// constructed, which indicates a configuration problem.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                BackendError::new("<client>", BackendErrorKind::RemoteRejected, e.to_string())
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn classify(tool: &str, err: &reqwest::Error) -> BackendError {
        let kind = if err.is_timeout() {
            BackendErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            BackendErrorKind::TransientNetwork
        } else {
            BackendErrorKind::RemoteRejected
        };
        BackendError::new(tool, kind, err.to_string())
    }

    fn classify_status(tool: &str, status: reqwest::StatusCode, body: String) -> BackendError {
        // 5xx and 429 are worth retrying; other 4xx means the backend
        // understood and refused.
        let kind = if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            BackendErrorKind::TransientNetwork
        } else {
            BackendErrorKind::RemoteRejected
        };
        BackendError::new(tool, kind, format!("HTTP {status}: {body}"))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn invoke(&self, tool: &str, args: &Value) -> Result<Value, BackendError> {
        let url = format!("{}/tools/{tool}", self.base_url);
        debug!(%tool, %url, "invoking backend operation");

        let response = self
            .client
            .post(&url)
            .json(args)
            .send()
            .await
            .map_err(|e| Self::classify(tool, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(tool, status, body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::new(tool, BackendErrorKind::RemoteRejected, e.to_string()))
    }
}
