//! Access token validation against the provider's key set.
//!
//! # Validation flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Look the `kid` up in the [`KeySet`]; a miss is final (no refetch).
//! 3. Verify the signature with the single configured algorithm.
//! 4. Check `exp`, `iss` and `aud` against configuration.
//! 5. Return [`TokenClaims`] with `permissions` defaulting to empty.
//!
//! Validation is pure apart from the key lookup and is repeated on every
//! privileged request; claims are never cached between requests.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, TokenData, Validation, errors::ErrorKind};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::keyset::KeySet;

/// Why a token was rejected.
///
/// The variants exist for logging and tests. Callers must not expose them to
/// clients beyond a generic rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not a structurally valid JWT, or no `kid` in the header
    #[error("malformed token")]
    MalformedToken,

    /// The `kid` is not in the key set
    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    /// Signature does not verify, or the header names another algorithm
    #[error("bad signature")]
    BadSignature,

    /// Signature is fine but `exp`, `iss` or `aud` is not acceptable
    #[error("claims rejected: {0}")]
    ClaimsRejected(String),
}

/// Claims of a validated access token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenClaims {
    /// `sub` (provider user id)
    #[serde(rename = "sub")]
    pub subject: String,
    /// `iss`
    #[serde(rename = "iss")]
    pub issuer: String,
    /// `aud` (always normalized to a list)
    #[serde(rename = "aud")]
    pub audience: Vec<String>,
    /// `exp` (Unix seconds)
    #[serde(rename = "exp")]
    pub expiry: u64,
    /// `permissions` (empty when the claim is absent)
    pub permissions: BTreeSet<String>,
    /// Email from the configured email claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Every other claim, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// Whether the token grants `permission`
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Wire shape of the payload, before normalization.
#[derive(Debug, Clone, Deserialize)]
struct RawClaims {
    sub: String,
    iss: String,
    #[serde(default, deserialize_with = "one_or_many")]
    aud: Vec<String>,
    exp: u64,
    #[serde(default)]
    permissions: Option<BTreeSet<String>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// `aud` may be a single string or an array of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Verifies access tokens issued by the trusted provider.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    keys: KeySet,
    audience: String,
    algorithm: Algorithm,
    leeway: Duration,
    email_claim: String,
}

impl TokenValidator {
    /// Create a validator for the key set's issuer and one expected audience.
    #[must_use]
    pub fn new(keys: KeySet, audience: impl Into<String>, algorithm: Algorithm) -> Self {
        Self {
            keys,
            audience: audience.into(),
            algorithm,
            leeway: Duration::ZERO,
            email_claim: "email".to_string(),
        }
    }

    /// Tolerate clock skew on `exp`
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Read the email from a custom (e.g. namespaced) claim
    #[must_use]
    pub fn with_email_claim(mut self, claim: impl Into<String>) -> Self {
        self.email_claim = claim.into();
        self
    }

    /// The key set used for verification
    #[must_use]
    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    /// Validate a raw bearer token.
    ///
    /// # Errors
    ///
    /// Returns the [`TokenError`] describing the first failed check.
    pub fn validate(&self, raw_token: &str) -> Result<TokenClaims, TokenError> {
        let header =
            jsonwebtoken::decode_header(raw_token).map_err(|_| TokenError::MalformedToken)?;
        let kid = header.kid.as_deref().ok_or(TokenError::MalformedToken)?;

        let key = self
            .keys
            .get_key(kid)
            .ok_or_else(|| TokenError::UnknownKey(kid.to_string()))?;

        // The algorithm is fixed by configuration, never taken from the token
        if header.alg != self.algorithm {
            debug!(kid = %kid, alg = ?header.alg, "Token algorithm does not match configuration");
            return Err(TokenError::BadSignature);
        }

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway.as_secs();
        validation.set_issuer(&[self.keys.issuer()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data: TokenData<RawClaims> =
            jsonwebtoken::decode(raw_token, &key.key, &validation).map_err(classify)?;
        let raw = data.claims;

        // `exp` must be strictly in the future
        let now = unix_now();
        if now >= raw.exp.saturating_add(self.leeway.as_secs()) {
            return Err(TokenError::ClaimsRejected("token expired".to_string()));
        }

        let mut extra = raw.extra;
        let email = if self.email_claim == "email" {
            extra.remove("email")
        } else {
            extra.get(&self.email_claim).cloned()
        }
        .and_then(|v| v.as_str().map(str::to_string));

        Ok(TokenClaims {
            subject: raw.sub,
            issuer: raw.iss,
            audience: raw.aud,
            expiry: raw.exp,
            permissions: raw.permissions.unwrap_or_default(),
            email,
            extra,
        })
    }
}

/// Map a `jsonwebtoken` failure onto the validator taxonomy.
fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::ClaimsRejected("token expired".to_string()),
        ErrorKind::InvalidIssuer => TokenError::ClaimsRejected("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => TokenError::ClaimsRejected("audience mismatch".to_string()),
        ErrorKind::ImmatureSignature => TokenError::ClaimsRejected("token not yet valid".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            TokenError::ClaimsRejected(format!("missing claim '{claim}'"))
        }
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => TokenError::MalformedToken,
        _ => TokenError::BadSignature,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
