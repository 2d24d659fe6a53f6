//! Admin dashboard and user management.
//!
//! All routes sit behind the permission guard, which leaves the caller's
//! validated [`TokenClaims`] in the request extensions.

use std::sync::{Arc, OnceLock};

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use super::pages;
use super::router::AppState;
use crate::audit::{self, AuditEvent};
use crate::oauth::{NewUser, ProviderError};
use crate::token::TokenClaims;

/// Provider user ids look like `auth0|123` or `google-oauth2|1098`.
#[must_use]
pub fn is_valid_user_id(user_id: &str) -> bool {
    static USER_ID_RE: OnceLock<Regex> = OnceLock::new();
    let re = USER_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9|_-]+$").expect("static regex"));
    re.is_match(user_id)
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

/// GET /admin
pub async fn dashboard(State(state): State<Arc<AppState>>) -> Response {
    match state.management.list_users().await {
        Ok(users) => pages::render(StatusCode::OK, &pages::AdminDashboardPage::new(Ok(&users))),
        Err(e) => {
            warn!(error = %e, "Could not list users");
            let message = match e {
                ProviderError::Rejected { message, .. } => message,
                other => other.to_string(),
            };
            pages::render(StatusCode::OK, &pages::AdminDashboardPage::new(Err(&message)))
        }
    }
}

/// DELETE /admin/delete-user/{user_id}
///
/// A provider failure still answers 200, with `"status": "error"` in the body.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<TokenClaims>,
    Path(user_id): Path<String>,
) -> Response {
    if !is_valid_user_id(&user_id) {
        warn!(user_id = %user_id, "Rejected malformed user id");
        return error_json(StatusCode::BAD_REQUEST, "Invalid user ID format");
    }

    match state.management.delete_user(&user_id).await {
        Ok(()) => {
            info!(user_id = %user_id, "User deleted");
            audit::emit(&AuditEvent::user_deleted(&claims.subject, &user_id));
            Json(json!({ "status": "success" })).into_response()
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "User deletion failed");
            error_json(StatusCode::OK, &e.to_string())
        }
    }
}

/// POST /admin/create-user
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<TokenClaims>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Response {
    let Json(user) = match body {
        Ok(body) => body,
        Err(rejection) => return error_json(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };

    match state.management.create_user(&user).await {
        Ok(created) => {
            info!(user_id = %created.user_id, "User created");
            audit::emit(&AuditEvent::user_created(&claims.subject, &created.user_id));
            Json(json!({ "status": "success" })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "User creation failed");
            let message = match e {
                ProviderError::Rejected { message, .. } if !message.is_empty() => message,
                ProviderError::Rejected { .. } => "Unknown error occurred".to_string(),
                other => other.to_string(),
            };
            error_json(StatusCode::BAD_REQUEST, &message)
        }
    }
}
