//! Shared test harness: RSA fixtures, token minting, mock provider/backend
//! and a cookie-carrying browser.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use session_gateway::config::{Config, Environment};
use session_gateway::gateway::{AppState, build_state, create_router};
use session_gateway::session::{InMemorySessionStore, SessionStore};
use session_gateway::token::{KeySet, TokenValidator};

pub const ISSUER: &str = "https://tenant.example.com/";
pub const AUDIENCE: &str = "https://api.example.com";
pub const TRUSTED_KID: &str = "trusted-key";
pub const ROGUE_KID: &str = "rogue-key";
pub const COOKIE_NAME: &str = "gateway_session";

const TRUSTED_PEM: &[u8] = include_bytes!("../fixtures/trusted.pem");
const ROGUE_PEM: &[u8] = include_bytes!("../fixtures/rogue.pem");

pub const TRUSTED_N: &str = "w2rrbt3DrXBbYOIP4QGBY8TAIqkfYDOTvGTGmpw1LW9rZKEjudUDy_EIS5I5vrZJC0rooxtZ5u6S2w7u3qhqm2oE1N-Q74LKAS7leRbtTtjw-Apt7kufPW_gndUqo0TqevxIrBtapl6gMXqbrnrY86kIxqXgzaNzc6EkHp7hThBRMpyd5Yn4Hmm4_C1hDwFgC2WBYQqDEpicqhXSeQNxNeFzDeXu67JL-uR3CR46Xp8TQ85EJ4aWp5VFg3WvJYGxaGogh4_JZAdusmvp--9oP6aRL9Gw9vfVZVuukigZKsgXtbE4b6ZELgVryAlcO5OK32QVimaau05diC6G9eiHNQ";

/// Which private key signs a test token.
#[derive(Debug, Clone, Copy)]
pub enum Signer {
    Trusted,
    Rogue,
}

pub fn now() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    )
    .unwrap()
}

/// The JWKS the provider publishes: only the trusted key.
pub fn jwks() -> Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "kid": TRUSTED_KID,
            "alg": "RS256",
            "use": "sig",
            "n": TRUSTED_N,
            "e": "AQAB"
        }]
    })
}

pub fn trusted_keyset() -> KeySet {
    KeySet::from_jwks(ISSUER, &serde_json::from_value(jwks()).unwrap())
}

pub fn validator() -> TokenValidator {
    TokenValidator::new(trusted_keyset(), AUDIENCE, Algorithm::RS256)
}

/// Standard claims for `sub`, expiring `exp_in` seconds from now.
pub fn claims(sub: &str, permissions: &[&str], exp_in: i64) -> Value {
    json!({
        "sub": sub,
        "iss": ISSUER,
        "aud": [AUDIENCE, "https://tenant.example.com/userinfo"],
        "iat": now() - 10,
        "exp": now() + exp_in,
        "permissions": permissions,
        "email": format!("{}@example.com", sub.replace('|', "_")),
    })
}

/// Sign `claims` with `signer`, announcing `kid` in the header.
pub fn mint(signer: Signer, kid: &str, claims: &Value) -> String {
    let pem = match signer {
        Signer::Trusted => TRUSTED_PEM,
        Signer::Rogue => ROGUE_PEM,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}

/// A token the gateway accepts, with the given permissions.
pub fn valid_token(sub: &str, permissions: &[&str]) -> String {
    mint(Signer::Trusted, TRUSTED_KID, &claims(sub, permissions, 3600))
}

/// Gateway wired to mock provider and backend servers.
pub struct TestGateway {
    pub app: Router,
    pub state: Arc<AppState>,
    pub provider: MockServer,
    pub backend: MockServer,
}

impl TestGateway {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Like [`TestGateway::start`], with a last chance to adjust the config.
    pub async fn start_with(customize: impl FnOnce(&mut Config)) -> Self {
        let provider = MockServer::start().await;
        let backend = MockServer::start().await;

        let mut config = Config::default();
        config.server.environment = Environment::Local;
        config.provider.domain = "tenant.example.com".to_string();
        config.provider.base_url = Some(provider.uri());
        config.provider.issuer = Some(ISSUER.to_string());
        config.provider.client_id = "client-abc".to_string();
        config.provider.client_secret = "client-secret".to_string();
        config.provider.audience = AUDIENCE.to_string();
        config.management.client_id = "m2m-id".to_string();
        config.management.client_secret = "m2m-secret".to_string();
        config.backend.url = Some(backend.uri());
        config.session.secret_key = "integration-test-secret".to_string();
        config.session.secure = false;
        customize(&mut config);

        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let state = Arc::new(build_state(&config, trusted_keyset(), store).unwrap());
        let app = create_router(Arc::clone(&state));

        Self {
            app,
            state,
            provider,
            backend,
        }
    }

    /// Make the provider's token endpoint answer the next code exchange
    /// with `access_token`.
    pub async fn issue_on_exchange(&self, access_token: &str) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "refresh_token": "refresh",
                "token_type": "Bearer",
                "expires_in": 86400
            })))
            .up_to_n_times(1)
            .mount(&self.provider)
            .await;
    }

    /// Make the provider hand out Management API tokens.
    pub async fn issue_management_tokens(&self) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "m2m-token",
                "token_type": "Bearer",
                "expires_in": 86400
            })))
            .mount(&self.provider)
            .await;
    }
}

/// Carries the session cookie between requests like a browser would.
#[derive(Debug, Default)]
pub struct Browser {
    cookie: Option<String>,
}

impl Browser {
    pub fn new() -> Self {
        Self::default()
    }

    /// `name=value` of the current session cookie
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn set_cookie(&mut self, cookie: Option<String>) {
        self.cookie = cookie;
    }

    /// Headers a request from this browser would carry
    pub fn headers(&self) -> axum::http::HeaderMap {
        let mut headers = axum::http::HeaderMap::new();
        if let Some(cookie) = &self.cookie {
            headers.insert(header::COOKIE, cookie.parse().unwrap());
        }
        headers
    }

    pub async fn send(&mut self, gateway: &TestGateway, mut request: Request<Body>) -> Response<Body> {
        if let Some(cookie) = &self.cookie {
            request
                .headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }

        let response = gateway.app.clone().oneshot(request).await.unwrap();

        for value in response.headers().get_all(header::SET_COOKIE) {
            let pair = value.to_str().unwrap().split(';').next().unwrap().trim();
            if let Some(v) = pair.strip_prefix(&format!("{COOKIE_NAME}=")) {
                self.cookie = (!v.is_empty()).then(|| pair.to_string());
            }
        }
        response
    }

    /// Run `/login` then `/callback` with the provider issuing `access_token`.
    pub async fn login(&mut self, gateway: &TestGateway, access_token: &str) -> Response<Body> {
        let response = self.send(gateway, get("/login")).await;
        let state = query_param(&location(&response), "state").unwrap();

        gateway.issue_on_exchange(access_token).await;
        self.send(gateway, get(&format!("/callback?code=auth-code&state={state}")))
            .await
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}
