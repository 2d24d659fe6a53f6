//! Access token verification.
//!
//! - [`KeySet`]: the provider's signing keys, fetched once at startup.
//! - [`TokenValidator`]: signature, `exp`, `iss` and `aud` checks that yield
//!   [`TokenClaims`] or a [`TokenError`].

pub mod keyset;
pub mod validator;

pub use keyset::{KeySet, SigningKey};
pub use validator::{TokenClaims, TokenError, TokenValidator};
