//! Permission guard for privileged routes.
//!
//! The guard re-validates the session's access token on every request and
//! checks the required permission against the fresh claims. The permission
//! snapshot stored in the session is never consulted.
//!
//! | Situation | Result |
//! |-----------|--------|
//! | no session, or no access token | 302 `/login` |
//! | token invalid, or permission missing | 302 `/` |
//! | token valid with permission | handler runs with [`TokenClaims`] in extensions |

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::flow::found;
use super::router::AppState;
use crate::audit::{self, AuditEvent};
use crate::session::Session;
use crate::token::{TokenClaims, TokenValidator};

/// Outcome of checking a session against a required permission.
#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    /// Token valid and permission present
    Granted(TokenClaims),
    /// No session or no access token
    Anonymous,
    /// Token rejected or permission missing
    Denied(String),
}

/// Decide whether `session` may use an operation requiring `permission`.
#[must_use]
pub fn authorize(
    validator: &TokenValidator,
    session: Option<&Session>,
    permission: &str,
) -> Authorization {
    let Some(token) = session.and_then(Session::access_token) else {
        return Authorization::Anonymous;
    };

    match validator.validate(token) {
        Ok(claims) if claims.has_permission(permission) => Authorization::Granted(claims),
        Ok(_) => Authorization::Denied(format!("missing permission '{permission}'")),
        Err(e) => Authorization::Denied(format!("token rejected: {e}")),
    }
}

/// Middleware state: the app plus the permission a route group requires.
#[derive(Clone)]
pub struct PermissionGuard {
    state: Arc<AppState>,
    permission: Arc<str>,
}

impl PermissionGuard {
    /// Guard requiring `permission`
    #[must_use]
    pub fn new(state: Arc<AppState>, permission: &str) -> Self {
        Self {
            state,
            permission: Arc::from(permission),
        }
    }
}

/// Guard middleware, used with `middleware::from_fn_with_state`.
pub async fn require_permission(
    State(guard): State<PermissionGuard>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let session = guard.state.sessions.from_headers(request.headers());
    let current = session.get().await;
    let path = request.uri().path().to_string();

    match authorize(&guard.state.validator, current.as_ref(), &guard.permission) {
        Authorization::Granted(claims) => {
            debug!(path = %path, subject = %claims.subject, "Permission granted");
            // Inject claims for downstream handlers
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Authorization::Anonymous => {
            debug!(path = %path, "No authenticated session");
            found("/login")
        }
        Authorization::Denied(reason) => {
            warn!(path = %path, permission = %guard.permission, reason = %reason, "Permission denied");
            audit::emit(&AuditEvent::denied(
                session.fingerprint(),
                &guard.permission,
                &path,
                reason,
            ));
            found("/")
        }
    }
}
