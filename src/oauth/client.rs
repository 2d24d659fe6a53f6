//! OAuth Client
//!
//! Authorization-code flow with PKCE against the identity provider.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use super::ProviderError;
use crate::config::ProviderConfig;
use crate::session::{LoginState, OAuthTokenSet};
use crate::{Error, Result};

/// OAuth client for the trusted identity provider
#[derive(Debug, Clone)]
pub struct ProviderClient {
    /// HTTP client for token requests
    http_client: Client,

    client_id: String,
    client_secret: String,

    /// API audience requested for access tokens
    audience: String,

    /// Requested scopes
    scopes: Vec<String>,

    authorize_endpoint: String,
    token_endpoint: String,
    logout_endpoint: String,
}

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    scope: Option<String>,
}

/// An authorization request ready to be sent to the browser.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Provider authorize URL, including state and PKCE challenge
    pub url: String,
    /// What the callback needs to finish the flow
    pub login: LoginState,
}

impl ProviderClient {
    /// Create a client from provider configuration
    #[must_use]
    pub fn new(http_client: Client, config: &ProviderConfig) -> Self {
        Self {
            http_client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            audience: config.audience.clone(),
            scopes: config.scopes.clone(),
            authorize_endpoint: config.authorize_endpoint(),
            token_endpoint: config.token_endpoint(),
            logout_endpoint: config.logout_endpoint(),
        }
    }

    /// Build the authorize URL for a new login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured authorize endpoint is not a URL.
    pub fn authorization_request(&self, redirect_uri: &str) -> Result<AuthorizationRequest> {
        let (code_verifier, code_challenge) = generate_pkce();
        let state = generate_state();

        let mut auth_url = Url::parse(&self.authorize_endpoint)
            .map_err(|e| Error::Config(format!("Invalid authorize endpoint: {e}")))?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("state", &state);
            params.append_pair("code_challenge", &code_challenge);
            params.append_pair("code_challenge_method", "S256");

            if !self.audience.is_empty() {
                params.append_pair("audience", &self.audience);
            }
            if !self.scopes.is_empty() {
                params.append_pair("scope", &self.scopes.join(" "));
            }
        }

        Ok(AuthorizationRequest {
            url: auth_url.to_string(),
            login: LoginState {
                state,
                code_verifier,
            },
        })
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The returned tokens are not trusted yet; the caller must validate the
    /// access token before storing anything.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the request fails or the provider rejects it.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> std::result::Result<OAuthTokenSet, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        debug!(endpoint = %self.token_endpoint, "Exchanging authorization code");
        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse token response: {e}")))?;

        Ok(OAuthTokenSet::from_response(
            token_response.access_token,
            token_response.token_type,
            token_response.refresh_token,
            token_response.id_token,
            token_response.expires_in,
            token_response.scope,
        ))
    }

    /// Provider logout URL that returns the browser to `return_to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured logout endpoint is not a URL.
    pub fn logout_url(&self, return_to: &str) -> Result<String> {
        let mut url = Url::parse(&self.logout_endpoint)
            .map_err(|e| Error::Config(format!("Invalid logout endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("returnTo", return_to)
            .append_pair("client_id", &self.client_id);
        Ok(url.to_string())
    }
}

/// Generate PKCE code verifier and challenge
fn generate_pkce() -> (String, String) {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    (verifier, challenge)
}

/// Generate a random state parameter
fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}
