//! Error types for the session gateway

use std::io;

use thiserror::Error;

/// Result type alias for the session gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Session gateway errors
///
/// These are startup and plumbing failures. Request-path failures use the
/// component error types ([`crate::token::TokenError`],
/// [`crate::oauth::ProviderError`], [`crate::backend::ProxyError`]) and are
/// turned into HTTP responses by the handlers.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The provider's key set could not be fetched or parsed
    #[error("Key set error: {0}")]
    KeySet(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
