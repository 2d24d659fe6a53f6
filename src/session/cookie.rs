//! Signed session cookie binding a browser to its server-side [`Session`].
//!
//! The cookie carries only a random session id. Its signature is checked on
//! every request; a cookie that fails verification is treated as absent.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};
use tracing::warn;

use super::model::Session;
use super::store::SessionStore;
use crate::config::{SameSitePolicy, SessionConfig};

/// Cookie attributes plus the signing key.
#[derive(Clone)]
pub struct CookieSettings {
    name: String,
    key: Key,
    secure: bool,
    same_site: SameSite,
    max_age: std::time::Duration,
}

impl std::fmt::Debug for CookieSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSettings")
            .field("name", &self.name)
            .field("secure", &self.secure)
            .field("same_site", &self.same_site)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl CookieSettings {
    /// Derive cookie settings from configuration.
    ///
    /// The signing key is the SHA-512 digest of the configured secret. An
    /// empty secret yields a random per-process key, so sessions do not
    /// survive a restart.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        let key = if config.secret_key.is_empty() {
            warn!("No session secret configured, using a random key; sessions will not survive a restart");
            let bytes: [u8; 32] = rand::rng().random();
            Key::from(Sha512::digest(bytes).as_slice())
        } else {
            Key::from(Sha512::digest(config.secret_key.as_bytes()).as_slice())
        };

        Self {
            name: config.cookie_name.clone(),
            key,
            secure: config.secure,
            same_site: match config.same_site {
                SameSitePolicy::Strict => SameSite::Strict,
                SameSitePolicy::Lax => SameSite::Lax,
                SameSitePolicy::None => SameSite::None,
            },
            max_age: config.max_age,
        }
    }

    /// Cookie name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn session_cookie(&self, id: String) -> Cookie<'static> {
        let max_age = time::Duration::seconds(i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX));
        Cookie::build((self.name.clone(), id))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(max_age)
            .build()
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.name.clone(), "")).path("/").build()
    }
}

/// Shared handle to the session store and cookie settings.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookies: Arc<CookieSettings>,
}

impl SessionManager {
    /// Create a manager over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, cookies: CookieSettings) -> Self {
        Self {
            store,
            cookies: Arc::new(cookies),
        }
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Resolve the session cookie in `headers`.
    #[must_use]
    pub fn from_headers(&self, headers: &HeaderMap) -> RequestSession {
        let jar = SignedCookieJar::from_headers(headers, self.cookies.key.clone());
        let id = jar.get(self.cookies.name()).map(|c| c.value().to_string());
        RequestSession {
            jar,
            id,
            manager: self.clone(),
        }
    }
}

/// The session bound to the current request.
///
/// Mutations that rotate or drop the id return the updated cookie jar, which
/// the handler must include in its response.
pub struct RequestSession {
    jar: SignedCookieJar,
    id: Option<String>,
    manager: SessionManager,
}

impl RequestSession {
    /// Short, non-reversible identifier of the current session for logs.
    #[must_use]
    pub fn fingerprint(&self) -> Option<String> {
        self.id.as_deref().map(fingerprint)
    }

    /// Load the current session, if the cookie names a live one.
    pub async fn get(&self) -> Option<Session> {
        let id = self.id.as_deref()?;
        self.manager.store.load(id).await
    }

    /// Store `session` under a fresh id, replacing whatever the browser had.
    ///
    /// The old record is removed so its id cannot be replayed. Returns the
    /// fingerprint of the new id with the jar carrying the new cookie.
    pub async fn set(mut self, session: Session) -> (String, SignedCookieJar) {
        if let Some(old) = self.id.take() {
            self.manager.store.remove(&old).await;
        }
        let id = generate_session_id();
        let new_fingerprint = fingerprint(&id);
        self.manager.store.save(&id, session).await;
        (new_fingerprint, self.jar.add(self.manager.cookies.session_cookie(id)))
    }

    /// Mutate the current session in place. Returns `false` if there is none.
    pub async fn update(&self, mutator: impl FnOnce(&mut Session) + Send + 'static) -> bool {
        match self.id.as_deref() {
            Some(id) => self.manager.store.update(id, Box::new(mutator)).await,
            None => false,
        }
    }

    /// Drop the current session and expire the cookie.
    pub async fn clear(self) -> (Option<Session>, SignedCookieJar) {
        let removed = match self.id.as_deref() {
            Some(id) => self.manager.store.remove(id).await,
            None => None,
        };
        let jar = self.jar.remove(self.manager.cookies.removal_cookie());
        (removed, jar)
    }
}

impl<S> FromRequestParts<S> for RequestSession
where
    SessionManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(SessionManager::from_ref(state).from_headers(&parts.headers))
    }
}

/// Generate a session id with 256 bits of entropy.
fn generate_session_id() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// First 8 bytes of the SHA-256 of a session id, hex encoded.
#[must_use]
pub fn fingerprint(session_id: &str) -> String {
    hex::encode(&Sha256::digest(session_id.as_bytes())[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::unix_now;
    use crate::session::store::InMemorySessionStore;
    use axum::http::header;

    fn config(secret: &str) -> SessionConfig {
        SessionConfig {
            secret_key: secret.to_string(),
            ..SessionConfig::default()
        }
    }

    fn manager(secret: &str) -> SessionManager {
        SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            CookieSettings::from_config(&config(secret)),
        )
    }

    /// Turn a jar into the `Cookie` request header a browser would send back.
    fn cookie_header(jar: &SignedCookieJar, name: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let response = axum::response::IntoResponse::into_response(jar.clone());
        for value in response.headers().get_all(header::SET_COOKIE) {
            let pair = value.to_str().unwrap().split(';').next().unwrap();
            if pair.starts_with(&format!("{name}=")) {
                headers.append(header::COOKIE, pair.parse().unwrap());
            }
        }
        headers
    }

    fn session() -> Session {
        Session {
            created_at: unix_now(),
            ..Session::default()
        }
    }

    #[tokio::test]
    async fn no_cookie_means_no_session() {
        let manager = manager("secret");
        let request = manager.from_headers(&HeaderMap::new());
        assert!(request.get().await.is_none());
        assert!(request.fingerprint().is_none());
        assert!(!request.update(|_| {}).await);
    }

    #[tokio::test]
    async fn set_then_resolve_from_cookie() {
        // GIVEN: a session stored through one request
        let manager = manager("secret");
        let (_, jar) = manager.from_headers(&HeaderMap::new()).set(session()).await;

        // WHEN: the browser sends the cookie back
        let request = manager.from_headers(&cookie_header(&jar, "gateway_session"));

        // THEN: the same session is found
        assert!(request.get().await.is_some());
        assert_eq!(request.fingerprint().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn set_rotates_id_and_drops_old_record() {
        // GIVEN: an existing session
        let manager = manager("secret");
        let (_, first) = manager.from_headers(&HeaderMap::new()).set(session()).await;
        let first_headers = cookie_header(&first, "gateway_session");

        // WHEN: a new session is set over it
        let (_, second) = manager.from_headers(&first_headers).set(session()).await;

        // THEN: only the new id resolves
        assert!(manager.from_headers(&first_headers).get().await.is_none());
        let second_headers = cookie_header(&second, "gateway_session");
        assert!(manager.from_headers(&second_headers).get().await.is_some());
        assert_eq!(manager.store().len().await, 1);
    }

    #[tokio::test]
    async fn cookie_signed_with_other_key_is_ignored() {
        // GIVEN: a cookie issued under a different secret
        let other = manager("other-secret");
        let (_, jar) = other.from_headers(&HeaderMap::new()).set(session()).await;
        let headers = cookie_header(&jar, "gateway_session");

        // THEN: it does not resolve here
        let manager = manager("secret");
        assert!(manager.from_headers(&headers).get().await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_record() {
        let manager = manager("secret");
        let (_, jar) = manager.from_headers(&HeaderMap::new()).set(session()).await;
        let headers = cookie_header(&jar, "gateway_session");

        let (removed, _jar) = manager.from_headers(&headers).clear().await;

        assert!(removed.is_some());
        assert!(manager.from_headers(&headers).get().await.is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert_eq!(fingerprint("abc").len(), 16);
    }
}
