//! Provider signing keys, fetched once and looked up by `kid`.
//!
//! The key set is loaded at startup from the provider's JWKS endpoint and is
//! read-only afterwards. There is no rotation: a `kid` that is not in the set
//! stays unknown until the process restarts.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm},
};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// A single verification key published by the provider.
#[derive(Clone)]
pub struct SigningKey {
    /// Key id (`kid`)
    pub key_id: String,
    /// Algorithm the key is published for, when the JWK declares one
    pub algorithm: Option<Algorithm>,
    /// Verification key material
    pub key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Convert a JWK into a signing key.
    ///
    /// Returns `None` for keys without a `kid` or with unusable material
    /// (symmetric keys are never accepted from a public key set).
    #[must_use]
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let key_id = jwk.common.key_id.clone()?;

        let key = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()?,
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()?
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => return None,
        };

        let algorithm = jwk.common.key_algorithm.and_then(signing_algorithm);

        Some(Self {
            key_id,
            algorithm,
            key,
        })
    }
}

/// Map a JWK `alg` to a JWS signing algorithm (encryption algorithms map to `None`).
fn signing_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        _ => None,
    }
}

/// The key set of the single trusted issuer.
#[derive(Debug, Clone)]
pub struct KeySet {
    issuer: String,
    keys: Arc<HashMap<String, SigningKey>>,
}

impl KeySet {
    /// Build a key set from already-converted keys.
    #[must_use]
    pub fn new(issuer: impl Into<String>, keys: impl IntoIterator<Item = SigningKey>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| (k.key_id.clone(), k))
            .collect::<HashMap<_, _>>();
        Self {
            issuer: issuer.into(),
            keys: Arc::new(keys),
        }
    }

    /// Build a key set from a parsed JWKS document, skipping unusable keys.
    #[must_use]
    pub fn from_jwks(issuer: impl Into<String>, jwks: &JwkSet) -> Self {
        let keys = jwks.keys.iter().filter_map(|jwk| {
            let key = SigningKey::from_jwk(jwk);
            if key.is_none() {
                warn!(kid = ?jwk.common.key_id, "Skipping unusable JWK");
            }
            key
        });
        Self::new(issuer, keys)
    }

    /// Fetch the provider's published key set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySet`] on network failure, a non-success status, an
    /// unparseable document, or a document with no usable keys. Callers treat
    /// this as fatal: nothing can be verified without keys.
    pub async fn fetch(http: &reqwest::Client, issuer: &str, jwks_uri: &str) -> Result<Self> {
        if !jwks_uri.starts_with("https://") {
            warn!(jwks_uri = %jwks_uri, "JWKS endpoint is not HTTPS");
        }

        debug!(issuer = %issuer, "Fetching JWKS from {jwks_uri}");
        let response = http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| Error::KeySet(format!("Failed to fetch {jwks_uri}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::KeySet(format!(
                "JWKS endpoint {jwks_uri} returned HTTP {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| Error::KeySet(format!("Invalid JWKS document: {e}")))?;

        let set = Self::from_jwks(issuer, &jwks);
        if set.is_empty() {
            return Err(Error::KeySet(format!("No usable keys published at {jwks_uri}")));
        }

        info!(issuer = %issuer, keys = set.len(), "Loaded provider signing keys");
        Ok(set)
    }

    /// Look up a key by `kid`.
    #[must_use]
    pub fn get_key(&self, key_id: &str) -> Option<&SigningKey> {
        self.keys.get(key_id)
    }

    /// Issuer this key set belongs to
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sorted key ids, for diagnostics
    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of usable keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no usable keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULUS: &str = "w2rrbt3DrXBbYOIP4QGBY8TAIqkfYDOTvGTGmpw1LW9rZKEjudUDy_EIS5I5vrZJC0rooxtZ5u6S2w7u3qhqm2oE1N-Q74LKAS7leRbtTtjw-Apt7kufPW_gndUqo0TqevxIrBtapl6gMXqbrnrY86kIxqXgzaNzc6EkHp7hThBRMpyd5Yn4Hmm4_C1hDwFgC2WBYQqDEpicqhXSeQNxNeFzDeXu67JL-uR3CR46Xp8TQ85EJ4aWp5VFg3WvJYGxaGogh4_JZAdusmvp--9oP6aRL9Gw9vfVZVuukigZKsgXtbE4b6ZELgVryAlcO5OK32QVimaau05diC6G9eiHNQ";

    fn jwks(value: serde_json::Value) -> JwkSet {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn from_jwks_indexes_rsa_keys_by_kid() {
        // GIVEN: a JWKS with one RSA key
        let set = KeySet::from_jwks(
            "https://tenant.example.com/",
            &jwks(serde_json::json!({
                "keys": [{"kty": "RSA", "kid": "key-1", "alg": "RS256", "use": "sig", "n": MODULUS, "e": "AQAB"}]
            })),
        );

        // THEN: the key is found by kid and carries its algorithm
        let key = set.get_key("key-1").unwrap();
        assert_eq!(key.algorithm, Some(Algorithm::RS256));
        assert!(set.get_key("key-2").is_none());
        assert_eq!(set.issuer(), "https://tenant.example.com/");
    }

    #[test]
    fn from_jwks_skips_keys_without_kid_and_symmetric_keys() {
        // GIVEN: an RSA key without kid and an octet key
        let set = KeySet::from_jwks(
            "https://tenant.example.com/",
            &jwks(serde_json::json!({
                "keys": [
                    {"kty": "RSA", "n": MODULUS, "e": "AQAB"},
                    {"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"}
                ]
            })),
        );

        // THEN: neither is usable
        assert!(set.is_empty());
    }

    #[test]
    fn key_ids_are_sorted() {
        let set = KeySet::from_jwks(
            "iss",
            &jwks(serde_json::json!({
                "keys": [
                    {"kty": "RSA", "kid": "b", "n": MODULUS, "e": "AQAB"},
                    {"kty": "RSA", "kid": "a", "n": MODULUS, "e": "AQAB"}
                ]
            })),
        );
        assert_eq!(set.key_ids(), vec!["a", "b"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn signing_key_debug_hides_material() {
        let set = KeySet::from_jwks(
            "iss",
            &jwks(serde_json::json!({
                "keys": [{"kty": "RSA", "kid": "k", "n": MODULUS, "e": "AQAB"}]
            })),
        );
        let debug = format!("{:?}", set.get_key("k").unwrap());
        assert!(debug.contains("\"k\""));
        assert!(!debug.contains(MODULUS));
    }
}
