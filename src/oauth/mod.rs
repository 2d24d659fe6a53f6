//! Identity provider clients
//!
//! - [`ProviderClient`]: authorization-code flow with PKCE against the
//!   provider's `/authorize`, `/oauth/token` and `/v2/logout` endpoints.
//! - [`ManagementClient`]: client-credentials access to the Management API.

pub mod client;
pub mod management;

pub use client::{AuthorizationRequest, ProviderClient};
pub use management::{ManagedUser, ManagementClient, NewUser};

/// Failure talking to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a non-success status
    #[error("provider returned HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Provider's error description, or the raw body
        message: String,
    },

    /// The provider answered 2xx with a body we could not interpret
    #[error("unexpected provider response: {0}")]
    Malformed(String),

    /// Network failure or timeout
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Convert a non-success response, preferring the provider's own message.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::Rejected {
            status,
            message: error_message(&body),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}

/// Pull a human-readable message out of a provider error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error_description", "message", "error"]
                .iter()
                .find_map(|field| v.get(*field).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_description() {
        let body = r#"{"error":"access_denied","error_description":"Unauthorized client"}"#;
        assert_eq!(error_message(body), "Unauthorized client");
    }

    #[test]
    fn error_message_reads_management_api_shape() {
        let body = r#"{"statusCode":409,"error":"Conflict","message":"The user already exists."}"#;
        assert_eq!(error_message(body), "The user already exists.");
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        assert_eq!(error_message("upstream exploded"), "upstream exploded");
        assert_eq!(error_message(""), "");
    }
}
