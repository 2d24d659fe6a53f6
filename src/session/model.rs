//! Session records kept server-side, one per browser.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::token::TokenClaims;

/// Tokens returned by the provider's token endpoint.
///
/// Only `access_token` is interpreted, and only after re-validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokenSet {
    /// Access token (JWT issued for the configured audience)
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token, present when `offline_access` was granted
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// ID token, kept for display only
    #[serde(default)]
    pub id_token: Option<String>,

    /// Expiration time (Unix timestamp)
    #[serde(default)]
    pub expires_at: Option<u64>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthTokenSet {
    /// Create a token set from a token endpoint response
    #[must_use]
    pub fn from_response(
        access_token: String,
        token_type: Option<String>,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in: Option<u64>,
        scope: Option<String>,
    ) -> Self {
        Self {
            access_token,
            token_type: token_type.unwrap_or_else(default_token_type),
            refresh_token,
            id_token,
            expires_at: expires_in.map(|secs| unix_now().saturating_add(secs)),
            scope,
        }
    }

    /// Time until the provider-reported expiry
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let now = unix_now();
        (expires_at > now).then(|| Duration::from_secs(expires_at - now))
    }
}

/// Opaque session data returned by the simulation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationSessionHandle(pub serde_json::Value);

/// An authorization request that has been sent but not yet answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    /// CSRF `state` parameter sent to the provider
    pub state: String,
    /// PKCE code verifier matching the challenge sent to the provider
    pub code_verifier: String,
}

/// Server-side state of one browser.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    /// Provider tokens; `None` until the callback succeeds
    pub oauth_token_set: Option<OAuthTokenSet>,
    /// Permissions from the validated access token at login
    pub permissions: BTreeSet<String>,
    /// Backend simulation session, if one was started
    pub simulation_session: Option<SimulationSessionHandle>,
    /// Where to send the browser after login
    pub pending_return_path: Option<String>,
    /// Outstanding authorization request
    pub login: Option<LoginState>,
    /// Creation time (Unix seconds)
    pub created_at: u64,
    /// Subject of the validated access token at login
    #[serde(default)]
    pub subject: Option<String>,
    /// Email claim of the validated access token at login
    #[serde(default)]
    pub email: Option<String>,
}

impl Session {
    /// A pre-login session that only remembers an outstanding authorization request.
    #[must_use]
    pub fn awaiting_callback(login: LoginState, return_path: Option<String>) -> Self {
        Self {
            login: Some(login),
            pending_return_path: return_path,
            created_at: unix_now(),
            ..Self::default()
        }
    }

    /// An authenticated session. Permissions and identity come only from
    /// validated claims, so they outlive the access token itself.
    #[must_use]
    pub fn authenticated(tokens: OAuthTokenSet, claims: &TokenClaims) -> Self {
        Self {
            oauth_token_set: Some(tokens),
            permissions: claims.permissions.clone(),
            created_at: unix_now(),
            subject: Some(claims.subject.clone()),
            email: claims.email.clone(),
            ..Self::default()
        }
    }

    /// Whether the callback completed for this session
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.oauth_token_set.is_some()
    }

    /// The stored access token, if any
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.oauth_token_set
            .as_ref()
            .map(|t| t.access_token.as_str())
    }

    /// Whether the record has outlived `max_age`
    #[must_use]
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        unix_now().saturating_sub(self.created_at) >= max_age.as_secs()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
