//! Session Gateway Library
//!
//! Session-authentication gateway between browsers, an OAuth2/OIDC identity
//! provider and a backend simulation service.
//!
//! # Features
//!
//! - **Login**: authorization-code flow with `state` and PKCE
//! - **Token validation**: JWKS signature, `exp`, `iss` and `aud` checks
//! - **Sessions**: server-side store behind a signed cookie, with expiry reaping
//! - **Permission guard**: per-request re-validation for privileged routes
//! - **Simulation proxy**: start/get/delete backend sessions keyed by the user's email
//! - **Admin**: user listing, creation and deletion through the Management API

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod session;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}"))),
    }
}
