//! Login, callback and logout.
//!
//! ```text
//! Anonymous --/login--> AwaitingCallback --/callback--> Authenticated --/logout--> Anonymous
//! ```
//!
//! `/login` stores the `state` and PKCE verifier in the browser's session
//! before redirecting to the provider. `/callback` accepts the answer only if
//! the `state` matches, exchanges the code, validates the access token and
//! stores an authenticated session under a fresh id. Any failure is a 401
//! and leaves no authenticated session behind.

use std::sync::Arc;

use axum::{
    Form,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use super::pages;
use super::router::AppState;
use super::simulation::resolve_email;
use crate::audit::{self, AuditEvent};
use crate::config::{Environment, ServerConfig};
use crate::session::{RequestSession, Session};

/// Computes the externally visible origin of the gateway.
#[derive(Debug, Clone)]
pub struct PublicOrigin {
    environment: Environment,
    public_url: Option<String>,
}

impl PublicOrigin {
    /// Create from server configuration
    #[must_use]
    pub fn new(server: &ServerConfig) -> Self {
        Self {
            environment: server.environment,
            public_url: server
                .public_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// `scheme://host` for redirect URIs, without trailing slash.
    ///
    /// The configured public URL wins. Otherwise the scheme follows the
    /// environment and the host comes from `X-Forwarded-Host` or `Host`.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.public_url {
            return url.clone();
        }

        let host = headers
            .get("x-forwarded-host")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .or_else(|| headers.get(header::HOST).and_then(|v| v.to_str().ok()))
            .unwrap_or("localhost");

        format!("{}://{host}", self.environment.scheme())
    }
}

/// Accept `candidate` only if it is a path on this origin.
#[must_use]
pub fn safe_return_path(candidate: &str) -> Option<String> {
    let local = candidate.starts_with('/')
        && !candidate.starts_with("//")
        && !candidate.contains('\\')
        && !candidate.chars().any(char::is_control);
    local.then(|| candidate.to_string())
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn login_failed(message: &str) -> Response {
    pages::render(
        StatusCode::UNAUTHORIZED,
        &pages::ErrorPage {
            title: "Login failed",
            message,
        },
    )
}

/// Query of `/login`
#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    /// Local path to return to after login
    pub return_to: Option<String>,
}

/// GET /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LoginParams>,
    headers: HeaderMap,
    session: RequestSession,
) -> Response {
    let redirect_uri = format!("{}/callback", state.origin.resolve(&headers));
    let request = match state.provider.authorization_request(&redirect_uri) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Cannot build authorization request");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login is misconfigured").into_response();
        }
    };

    let return_path = params.return_to.as_deref().and_then(|candidate| {
        let path = safe_return_path(candidate);
        if path.is_none() {
            warn!(return_to = %candidate, "Ignoring non-local return path");
        }
        path
    });
    audit::emit(&AuditEvent::login_started(return_path.as_deref()));

    let login = request.login;
    let pending = Session::awaiting_callback(login.clone(), return_path.clone());

    // Keep an existing session (and its id) until the callback replaces it
    let updated = session
        .update(move |s| {
            s.login = Some(login);
            s.pending_return_path = return_path;
        })
        .await;
    if updated {
        return found(&request.url);
    }

    let (_, jar) = session.set(pending).await;
    (jar, found(&request.url)).into_response()
}

/// Parameters the provider sends to `/callback`
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Echoed `state`
    pub state: Option<String>,
    /// Provider error code
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
}

/// GET /callback
pub async fn callback_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    session: RequestSession,
    Query(params): Query<CallbackParams>,
) -> Response {
    complete_login(&state, &headers, session, params).await
}

/// POST /callback (`response_mode=form_post`)
pub async fn callback_form(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    session: RequestSession,
    Form(params): Form<CallbackParams>,
) -> Response {
    complete_login(&state, &headers, session, params).await
}

async fn complete_login(
    state: &AppState,
    headers: &HeaderMap,
    session: RequestSession,
    params: CallbackParams,
) -> Response {
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        warn!(error = %error, description = %description, "Provider returned an authorization error");
        return login_failed(&format!("{error}: {description}"));
    }

    let Some(current) = session.get().await else {
        warn!("Callback without a session");
        return login_failed("No login in progress");
    };
    let Some(pending) = current.login.clone() else {
        warn!(session = ?session.fingerprint(), "Callback without a pending login");
        return login_failed("No login in progress");
    };

    // One callback per authorization request
    session.update(|s| s.login = None).await;

    let Some(returned_state) = params.state.as_deref() else {
        return login_failed("Missing state parameter");
    };
    if !bool::from(pending.state.as_bytes().ct_eq(returned_state.as_bytes())) {
        warn!(session = ?session.fingerprint(), "OAuth state mismatch");
        return login_failed("State mismatch");
    }

    let Some(code) = params.code.as_deref() else {
        return login_failed("Missing authorization code");
    };

    let redirect_uri = format!("{}/callback", state.origin.resolve(headers));
    let tokens = match state
        .provider
        .exchange_code(code, &redirect_uri, &pending.code_verifier)
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(error = %e, "Authorization code exchange failed");
            return login_failed("Token exchange failed");
        }
    };

    let claims = match state.validator.validate(&tokens.access_token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(reason = %e, "Provider issued an access token that does not validate");
            return login_failed("Access token rejected");
        }
    };

    let return_path = current.pending_return_path.unwrap_or_else(|| "/".to_string());
    let (fingerprint, jar) = session.set(Session::authenticated(tokens, &claims)).await;

    info!(session = %fingerprint, subject = %claims.subject, "Login completed");
    audit::emit(&AuditEvent::session_created(
        fingerprint,
        &claims.subject,
        claims.email.as_deref(),
    ));

    (jar, found(&return_path)).into_response()
}

/// GET /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    session: RequestSession,
) -> Response {
    let fingerprint = session.fingerprint();
    let current = session.get().await;

    let email = match &current {
        Some(current) if current.simulation_session.is_some() => {
            let email = owner_email(&state, current).await;
            match email.as_deref() {
                Some(email) => match state.backend.delete(email).await {
                    Ok(()) => audit::emit(&AuditEvent::simulation_deleted(fingerprint.clone(), email)),
                    Err(e) => {
                        warn!(session = ?fingerprint, error = %e, "Failed to delete simulation session during logout");
                    }
                },
                None => {
                    warn!(session = ?fingerprint, "Simulation session left behind: user email unknown");
                }
            }
            email
        }
        Some(current) => current.email.clone(),
        None => None,
    };

    let (removed, jar) = session.clear().await;
    if removed.is_some() {
        audit::emit(&AuditEvent::session_cleared(fingerprint, email.as_deref()));
    }

    let return_to = format!("{}/", state.origin.resolve(&headers));
    let location = state.provider.logout_url(&return_to).unwrap_or_else(|e| {
        error!(error = %e, "Cannot build provider logout URL");
        "/".to_string()
    });

    (jar, found(&location)).into_response()
}

/// Email of the user owning `session`, for backend cleanup.
///
/// Claims of a still-valid access token come first. Once the token has
/// expired, the identity recorded at login is used, looking the email up by
/// subject when the token carried none.
async fn owner_email(state: &AppState, session: &Session) -> Option<String> {
    let claims = session
        .access_token()
        .and_then(|token| state.validator.validate(token).ok());

    let resolved = match (claims, &session.email, &session.subject) {
        (Some(claims), _, _) => resolve_email(state, &claims).await,
        (None, Some(email), _) => return Some(email.clone()),
        (None, None, Some(subject)) => state.management.user_email(subject).await,
        (None, None, None) => return None,
    };
    resolved
        .inspect_err(|e| debug!(error = %e, "Could not resolve email during logout"))
        .ok()
}
