//! Audit logging for session and administration events.
//!
//! Every event is emitted via `tracing::info!` on the `audit` target with a
//! JSON payload, so the trail can be filtered independently of request logs.
//! Sessions are identified by [`fingerprint`](crate::session::fingerprint),
//! never by their raw id.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `session.login_started` | `/login` redirected a browser to the provider |
//! | `session.created` | The callback stored an authenticated session |
//! | `session.denied` | The permission guard rejected a request |
//! | `session.cleared` | `/logout` dropped a session |
//! | `simulation.started` | The backend started a simulation session |
//! | `simulation.deleted` | The backend simulation session was deleted |
//! | `admin.user_created` | An administrator created a user |
//! | `admin.user_deleted` | An administrator deleted a user |

use serde::Serialize;

/// Structured audit event.
#[derive(Debug, Default, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"session.created"`).
    pub event: &'static str,
    /// Session fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Provider user id of the acting user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Email of the acting user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Permission that was required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    /// Request path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// User affected by an admin action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user: Option<String>,
    /// Reason for denial events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Construct a `session.login_started` event.
    #[must_use]
    pub fn login_started(return_path: Option<&str>) -> Self {
        Self {
            event: "session.login_started",
            path: return_path.map(str::to_string),
            ..Self::default()
        }
    }

    /// Construct a `session.created` event.
    #[must_use]
    pub fn session_created(session: String, subject: &str, email: Option<&str>) -> Self {
        Self {
            event: "session.created",
            session: Some(session),
            subject: Some(subject.to_string()),
            email: email.map(str::to_string),
            ..Self::default()
        }
    }

    /// Construct a `session.denied` event.
    #[must_use]
    pub fn denied(
        session: Option<String>,
        permission: &str,
        path: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event: "session.denied",
            session,
            permission: Some(permission.to_string()),
            path: Some(path.to_string()),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Construct a `session.cleared` event.
    #[must_use]
    pub fn session_cleared(session: Option<String>, email: Option<&str>) -> Self {
        Self {
            event: "session.cleared",
            session,
            email: email.map(str::to_string),
            ..Self::default()
        }
    }

    /// Construct a `simulation.started` event.
    #[must_use]
    pub fn simulation_started(session: Option<String>, email: &str) -> Self {
        Self {
            event: "simulation.started",
            session,
            email: Some(email.to_string()),
            ..Self::default()
        }
    }

    /// Construct a `simulation.deleted` event.
    #[must_use]
    pub fn simulation_deleted(session: Option<String>, email: &str) -> Self {
        Self {
            event: "simulation.deleted",
            session,
            email: Some(email.to_string()),
            ..Self::default()
        }
    }

    /// Construct an `admin.user_created` event.
    #[must_use]
    pub fn user_created(actor: &str, target_user: &str) -> Self {
        Self {
            event: "admin.user_created",
            subject: Some(actor.to_string()),
            target_user: Some(target_user.to_string()),
            ..Self::default()
        }
    }

    /// Construct an `admin.user_deleted` event.
    #[must_use]
    pub fn user_deleted(actor: &str, target_user: &str) -> Self {
        Self {
            event: "admin.user_deleted",
            subject: Some(actor.to_string()),
            target_user: Some(target_user.to_string()),
            ..Self::default()
        }
    }
}

/// Emit an audit event on the `audit` target.
///
/// ```text
/// INFO audit: session audit audit={"event":"session.created","session":"9f2c..."}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(target: "audit", audit = %json, "session audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_created_carries_identity() {
        // GIVEN/WHEN: build a created event
        let event = AuditEvent::session_created("abcd".to_string(), "auth0|1", Some("a@b.c"));

        // THEN: type and identity are set, unrelated fields are not
        assert_eq!(event.event, "session.created");
        assert_eq!(event.subject.as_deref(), Some("auth0|1"));
        assert!(event.permission.is_none());
    }

    #[test]
    fn denied_event_contains_reason_and_permission() {
        let event = AuditEvent::denied(None, "admin", "/admin", "missing permission");

        assert_eq!(event.event, "session.denied");
        assert_eq!(event.permission.as_deref(), Some("admin"));
        assert_eq!(event.reason.as_deref(), Some("missing permission"));
    }

    #[test]
    fn absent_fields_are_omitted_from_json() {
        // GIVEN: an event with only a type and a path
        let event = AuditEvent::login_started(Some("/launch-app"));

        // WHEN: serialized
        let json = serde_json::to_value(&event).unwrap();

        // THEN: only populated fields appear
        assert_eq!(
            json,
            serde_json::json!({"event": "session.login_started", "path": "/launch-app"})
        );
    }

    #[test]
    fn admin_events_name_target() {
        let created = AuditEvent::user_created("auth0|admin", "new@example.com");
        let deleted = AuditEvent::user_deleted("auth0|admin", "auth0|123");

        assert_eq!(created.event, "admin.user_created");
        assert_eq!(deleted.target_user.as_deref(), Some("auth0|123"));
    }
}
