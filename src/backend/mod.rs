//! Simulation backend client
//!
//! The backend keeps per-user simulation resources. Every call carries the
//! JSON body `{"user": <email>}`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | start | `POST /start_session` |
//! | get | `GET /get_session` |
//! | delete | `DELETE /delete_session` |
//!
//! A 200 response carries opaque session data. Any other status is passed
//! through to the caller together with the backend's body.

use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::session::SimulationSessionHandle;

/// Failure talking to the simulation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// The backend answered with a non-200 status
    #[error("Backend service returned {status}: {message}")]
    Backend {
        /// Backend status code, passed through to the client
        status: u16,
        /// Backend body, verbatim
        message: String,
    },

    /// Network failure or timeout
    #[error("Backend service unavailable")]
    Unavailable(String),
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// HTTP client for the simulation backend
#[derive(Debug, Clone)]
pub struct SimulationBackend {
    http_client: Client,
    base_url: String,
}

impl SimulationBackend {
    /// Create a backend client. Timeouts are taken from `http_client`.
    #[must_use]
    pub fn new(http_client: Client, config: &BackendConfig) -> Self {
        Self {
            http_client,
            base_url: config.base_url(),
        }
    }

    /// Base URL calls are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a simulation session for `email`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] on a non-200 answer or a transport failure.
    pub async fn start(&self, email: &str) -> Result<SimulationSessionHandle, ProxyError> {
        let body = self.call(Method::POST, "/start_session", email).await?;
        Ok(handle_from_body(body))
    }

    /// Fetch the simulation session of `email`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] on a non-200 answer or a transport failure.
    pub async fn get(&self, email: &str) -> Result<SimulationSessionHandle, ProxyError> {
        let body = self.call(Method::GET, "/get_session", email).await?;
        Ok(handle_from_body(body))
    }

    /// Delete the simulation session of `email`.
    ///
    /// A 404 means there is nothing left to delete and counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] on any other non-200 answer or a transport failure.
    pub async fn delete(&self, email: &str) -> Result<(), ProxyError> {
        match self.call(Method::DELETE, "/delete_session", email).await {
            Ok(_) => Ok(()),
            Err(ProxyError::Backend { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!("Backend has no simulation session to delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn call(&self, method: Method, path: &str, email: &str) -> Result<String, ProxyError> {
        let url = format!("{}{path}", self.base_url);
        debug!(method = %method, url = %url, "Calling simulation backend");

        let response = self
            .http_client
            .request(method, &url)
            .json(&serde_json::json!({ "user": email }))
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Simulation backend unreachable");
                ProxyError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(ProxyError::Backend {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

/// Keep JSON bodies as-is, wrap anything else as a JSON string.
fn handle_from_body(body: String) -> SimulationSessionHandle {
    match serde_json::from_str(&body) {
        Ok(value) => SimulationSessionHandle(value),
        Err(_) => SimulationSessionHandle(serde_json::Value::String(body)),
    }
}
