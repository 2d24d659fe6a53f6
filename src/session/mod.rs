//! Server-side sessions keyed by a signed cookie.
//!
//! - [`Session`]: what the gateway remembers about one browser.
//! - [`SessionStore`]: storage backend ([`InMemorySessionStore`] by default).
//! - [`RequestSession`]: extractor binding a request to its session.

pub mod cookie;
pub mod model;
pub mod store;

pub use cookie::{CookieSettings, RequestSession, SessionManager, fingerprint};
pub use model::{LoginState, OAuthTokenSet, Session, SimulationSessionHandle};
pub use store::{InMemorySessionStore, SessionMutator, SessionStore, spawn_reaper};
