//! Minimal server-rendered pages.
//!
//! Templates live in `templates/` and are compiled in by askama, which
//! HTML-escapes every interpolated value.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::error;

use crate::oauth::ManagedUser;
use crate::session::Session;

/// Render `page` as an HTML response with `status`.
pub fn render<T: Template>(status: StatusCode, page: &T) -> Response {
    match page.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render page");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

/// What the landing page shows about a logged-in user.
pub struct Account<'a> {
    permissions: Vec<&'a str>,
    expires_in_minutes: Option<u64>,
    simulation_active: bool,
}

/// Landing page describing the current session.
#[derive(Template)]
#[template(path = "landing.html")]
pub struct LandingPage<'a> {
    account: Option<Account<'a>>,
}

impl<'a> LandingPage<'a> {
    #[must_use]
    pub fn new(session: Option<&'a Session>) -> Self {
        let account = session.filter(|s| s.is_authenticated()).map(|session| Account {
            permissions: session.permissions.iter().map(String::as_str).collect(),
            expires_in_minutes: session
                .oauth_token_set
                .as_ref()
                .and_then(|t| t.time_until_expiry())
                .map(|remaining| remaining.as_secs() / 60),
            simulation_active: session.simulation_session.is_some(),
        });
        Self { account }
    }
}

/// Page shown to an authenticated user on `/launch-app`.
#[derive(Template)]
#[template(path = "launch_app.html")]
pub struct LaunchAppPage<'a> {
    pub email: Option<&'a str>,
}

/// Admin dashboard: the user list, or the provider's error.
#[derive(Template)]
#[template(path = "admin_dashboard.html")]
pub struct AdminDashboardPage<'a> {
    users: &'a [ManagedUser],
    error: Option<&'a str>,
}

impl<'a> AdminDashboardPage<'a> {
    #[must_use]
    pub fn new(users: Result<&'a [ManagedUser], &'a str>) -> Self {
        match users {
            Ok(users) => Self { users, error: None },
            Err(error) => Self {
                users: &[],
                error: Some(error),
            },
        }
    }
}

/// Error page for a failed login.
#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorPage<'a> {
    pub title: &'a str,
    pub message: &'a str,
}
