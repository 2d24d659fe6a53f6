//! Management API client.
//!
//! Every call obtains a machine-to-machine token through the
//! client-credentials grant with the narrowest scope the call needs. Tokens
//! are cached per scope until shortly before they expire.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::ProviderError;
use crate::config::{ManagementConfig, ProviderConfig};
use crate::session::model::unix_now;

/// Tokens are refreshed this long before the provider says they expire.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// A user record as returned by the Management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedUser {
    /// Provider user id (e.g. `auth0|123`)
    pub user_id: String,
    /// Primary email
    #[serde(default)]
    pub email: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Account creation time
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last login time
    #[serde(default)]
    pub last_login: Option<String>,
    /// Number of logins
    #[serde(default)]
    pub logins_count: Option<u64>,
    /// Remaining attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of an admin create-user request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    /// Login email
    pub email: String,
    /// Initial password
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct ClientCredentialsResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: u64,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        unix_now().saturating_add(EXPIRY_BUFFER.as_secs()) < self.expires_at
    }
}

/// Client for the provider's Management API
pub struct ManagementClient {
    http_client: Client,
    token_endpoint: String,
    api_base: String,
    audience: String,
    client_id: String,
    client_secret: String,
    connection: String,
    /// Cached tokens by scope
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl std::fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementClient")
            .field("api_base", &self.api_base)
            .field("audience", &self.audience)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ManagementClient {
    /// Create a client using the M2M credentials in `management`
    #[must_use]
    pub fn new(http_client: Client, provider: &ProviderConfig, management: &ManagementConfig) -> Self {
        Self {
            http_client,
            token_endpoint: provider.token_endpoint(),
            api_base: provider.management_api(),
            audience: provider.management_audience(),
            client_id: management.client_id.clone(),
            client_secret: management.client_secret.clone(),
            connection: management.connection.clone(),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Get a Management API token for `scope`, from cache when still fresh.
    async fn token(&self, scope: &str) -> Result<String, ProviderError> {
        if let Some(cached) = self.tokens.read().get(scope).filter(|t| t.is_fresh()) {
            return Ok(cached.access_token.clone());
        }

        debug!(scope = %scope, "Requesting Management API token");
        let response = self
            .http_client
            .post(&self.token_endpoint)
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "audience": self.audience,
                "grant_type": "client_credentials",
                "scope": scope,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let token: ClientCredentialsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse token response: {e}")))?;

        let cached = CachedToken {
            access_token: token.access_token,
            expires_at: unix_now().saturating_add(token.expires_in.unwrap_or(0)),
        };
        let access_token = cached.access_token.clone();
        self.tokens.write().insert(scope.to_string(), cached);
        Ok(access_token)
    }

    /// `{api_base}/users[/{id}]` with the id percent-encoded as one segment.
    fn users_url(&self, user_id: Option<&str>) -> Result<Url, ProviderError> {
        let raw = match user_id {
            Some(id) => {
                let segment: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
                format!("{}/users/{segment}", self.api_base)
            }
            None => format!("{}/users", self.api_base),
        };
        Url::parse(&raw).map_err(|e| ProviderError::Malformed(format!("Invalid Management API URL: {e}")))
    }

    /// List users.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the token or the listing fails.
    pub async fn list_users(&self) -> Result<Vec<ManagedUser>, ProviderError> {
        let token = self.token("read:users").await?;
        let response = self
            .http_client
            .get(self.users_url(None)?)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// Fetch one user by provider user id.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the token or the lookup fails.
    pub async fn get_user(&self, user_id: &str) -> Result<ManagedUser, ProviderError> {
        let token = self.token("read:users").await?;
        let response = self
            .http_client
            .get(self.users_url(Some(user_id))?)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// Create a user in the configured database connection.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] carrying the provider's message on rejection.
    pub async fn create_user(&self, user: &NewUser) -> Result<ManagedUser, ProviderError> {
        let token = self.token("create:users").await?;
        let response = self
            .http_client
            .post(self.users_url(None)?)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "email": user.email,
                "password": user.password,
                "connection": self.connection,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// Delete a user.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the token or the deletion fails.
    pub async fn delete_user(&self, user_id: &str) -> Result<(), ProviderError> {
        let token = self.token("delete:users").await?;
        let response = self
            .http_client
            .delete(self.users_url(Some(user_id))?)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        Ok(())
    }

    /// Look up a user's email by subject.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Malformed`] if the user has no email.
    pub async fn user_email(&self, subject: &str) -> Result<String, ProviderError> {
        self.get_user(subject)
            .await?
            .email
            .ok_or_else(|| ProviderError::Malformed(format!("User {subject} has no email")))
    }
}
