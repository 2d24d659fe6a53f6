//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::debug;

use super::flow::{self, PublicOrigin, found};
use super::guard::{PermissionGuard, require_permission};
use super::{admin, pages, simulation};
use crate::backend::SimulationBackend;
use crate::oauth::{ManagementClient, ProviderClient};
use crate::session::{RequestSession, Session, SessionManager};
use crate::token::TokenValidator;

/// Shared application state
pub struct AppState {
    /// Access token validator (holds the provider's key set)
    pub validator: TokenValidator,
    /// Authorization-code flow client
    pub provider: ProviderClient,
    /// Management API client
    pub management: ManagementClient,
    /// Simulation backend client
    pub backend: SimulationBackend,
    /// Session store and cookie settings
    pub sessions: SessionManager,
    /// Externally visible origin for redirect URIs
    pub origin: PublicOrigin,
    /// Permission required for `/admin` routes
    pub admin_permission: String,
}

impl FromRef<Arc<AppState>> for SessionManager {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.sessions.clone()
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let admin_guard = PermissionGuard::new(Arc::clone(&state), &state.admin_permission);

    let admin_routes = Router::new()
        .route("/admin", get(admin::dashboard))
        .route("/admin/delete-user/{user_id}", delete(admin::delete_user))
        .route("/admin/create-user", post(admin::create_user))
        .route_layer(middleware::from_fn_with_state(admin_guard, require_permission));

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/login", get(flow::login))
        .route(
            "/callback",
            get(flow::callback_query).post(flow::callback_form),
        )
        .route("/logout", get(flow::logout))
        .route("/launch-app", get(launch_app_handler))
        .route("/api/start-simulation-session", post(simulation::start))
        .route("/get_session", get(simulation::get))
        .route("/delete_session", post(simulation::delete))
        .route("/auth/info", get(auth_info_handler))
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

/// GET / - landing page
async fn index_handler(session: RequestSession) -> Response {
    let current = session.get().await;
    pages::render(StatusCode::OK, &pages::LandingPage::new(current.as_ref()))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "signing_keys": state.validator.keys().len(),
        "sessions": state.sessions.store().len().await,
    }))
}

/// GET /launch-app - requires a session whose token still validates
async fn launch_app_handler(
    State(state): State<Arc<AppState>>,
    session: RequestSession,
) -> Response {
    let current = session.get().await;
    let claims = current
        .as_ref()
        .and_then(Session::access_token)
        .and_then(|token| state.validator.validate(token).ok());

    match claims {
        Some(claims) => pages::render(
            StatusCode::OK,
            &pages::LaunchAppPage {
                email: claims.email.as_deref(),
            },
        ),
        None => found("/login?return_to=/launch-app"),
    }
}

/// GET /auth/info - validate a bearer token and echo its claims
async fn auth_info_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Authorization header is missing" })),
        )
            .into_response();
    };

    let parts: Vec<&str> = value.to_str().unwrap_or_default().split_whitespace().collect();
    let token = match parts.as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") => *token,
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid Authorization header" })),
            )
                .into_response();
        }
    };

    match state.validator.validate(token) {
        Ok(claims) => Json(claims).into_response(),
        Err(e) => {
            debug!(reason = %e, "Bearer token rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid token" })),
            )
                .into_response()
        }
    }
}
