//! Simulation session endpoints.
//!
//! Each endpoint validates the session's access token, resolves the user's
//! email and forwards the call to the [`SimulationBackend`](crate::backend::SimulationBackend).
//!
//! | Outcome | Response |
//! |---------|----------|
//! | no valid session | 401 `{"error": "Not authenticated"}` |
//! | backend non-200 | same status, `{"error": "Backend service returned <status>: <body>"}` |
//! | backend unreachable or timed out | 503 |

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::router::AppState;
use crate::audit::{self, AuditEvent};
use crate::backend::ProxyError;
use crate::oauth::ProviderError;
use crate::session::{RequestSession, Session};
use crate::token::TokenClaims;

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Backend { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn not_authenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Not authenticated" })),
    )
        .into_response()
}

/// Email of the user behind `claims`: the token's email claim, else a
/// Management API lookup by subject.
pub(crate) async fn resolve_email(
    state: &AppState,
    claims: &TokenClaims,
) -> Result<String, ProviderError> {
    if let Some(email) = &claims.email {
        return Ok(email.clone());
    }
    debug!(subject = %claims.subject, "No email claim, asking the Management API");
    state.management.user_email(&claims.subject).await
}

/// Validate the request's session and resolve its user's email.
async fn authenticated_email(state: &AppState, session: &RequestSession) -> Result<String, Response> {
    let current = session.get().await;
    let Some(token) = current.as_ref().and_then(Session::access_token) else {
        return Err(not_authenticated());
    };
    let claims = state.validator.validate(token).map_err(|e| {
        debug!(reason = %e, "Session token no longer validates");
        not_authenticated()
    })?;

    resolve_email(state, &claims).await.map_err(|e| {
        warn!(subject = %claims.subject, error = %e, "Could not resolve user email");
        let status = match e {
            ProviderError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": "Could not resolve user email" }))).into_response()
    })
}

/// POST /api/start-simulation-session
pub async fn start(State(state): State<Arc<AppState>>, session: RequestSession) -> Response {
    let email = match authenticated_email(&state, &session).await {
        Ok(email) => email,
        Err(response) => return response,
    };

    match state.backend.start(&email).await {
        Ok(handle) => {
            let body = handle.0.clone();
            session.update(move |s| s.simulation_session = Some(handle)).await;
            audit::emit(&AuditEvent::simulation_started(session.fingerprint(), &email));
            Json(body).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Backend refused to start a simulation session");
            e.into_response()
        }
    }
}

/// GET /get_session
pub async fn get(State(state): State<Arc<AppState>>, session: RequestSession) -> Response {
    let email = match authenticated_email(&state, &session).await {
        Ok(email) => email,
        Err(response) => return response,
    };

    match state.backend.get(&email).await {
        Ok(handle) => {
            let body = handle.0.clone();
            session.update(move |s| s.simulation_session = Some(handle)).await;
            Json(body).into_response()
        }
        Err(e) => {
            debug!(error = %e, "Backend returned no simulation session");
            e.into_response()
        }
    }
}

/// POST /delete_session
pub async fn delete(State(state): State<Arc<AppState>>, session: RequestSession) -> Response {
    let email = match authenticated_email(&state, &session).await {
        Ok(email) => email,
        Err(response) => return response,
    };

    match state.backend.delete(&email).await {
        Ok(()) => {
            session.update(|s| s.simulation_session = None).await;
            audit::emit(&AuditEvent::simulation_deleted(session.fingerprint(), &email));
            Json(json!({ "status": "success" })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Backend refused to delete the simulation session");
            e.into_response()
        }
    }
}
