//! Session store: server-side persistence of [`Session`] records.
//!
//! The [`SessionStore`] trait abstracts over storage backends and only
//! promises per-key atomicity. [`InMemorySessionStore`] is backed by a
//! `DashMap`, with a background reaper that evicts records older than the
//! cookie max-age.
//!
//! Requests for the same session id are not serialized against each other.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use super::model::Session;

/// Mutation applied to a stored session under its key's lock.
pub type SessionMutator = Box<dyn FnOnce(&mut Session) + Send>;

/// Trait abstracting the session storage backend.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Look up a session by id.
    async fn load(&self, id: &str) -> Option<Session>;

    /// Insert or replace the session stored under `id`.
    async fn save(&self, id: &str, session: Session);

    /// Apply `mutator` to the session under `id`.
    ///
    /// Returns `false` if there is no such session.
    async fn update(&self, id: &str, mutator: SessionMutator) -> bool;

    /// Remove a session, returning it if it existed.
    async fn remove(&self, id: &str) -> Option<Session>;

    /// Remove every session older than `max_age`. Returns the number removed.
    async fn reap_older_than(&self, max_age: Duration) -> usize;

    /// Number of stored sessions.
    async fn len(&self) -> usize;
}

/// In-memory session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    /// Create an empty session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    async fn save(&self, id: &str, session: Session) {
        self.sessions.insert(id.to_string(), session);
    }

    async fn update(&self, id: &str, mutator: SessionMutator) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                mutator(entry.value_mut());
                true
            }
            None => false,
        }
    }

    async fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    async fn reap_older_than(&self, max_age: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_older_than(max_age));
        before.saturating_sub(self.sessions.len())
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Spawn a background task that reaps expired sessions every `interval`.
///
/// The first pass runs immediately. The task exits when the `shutdown`
/// receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn SessionStore>,
    max_age: Duration,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_older_than(max_age).await;
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session reaper shutting down");
                    break;
                }
            }
        }
    })
}
