//! Append-only audit and activity records.
//!
//! The audit log answers "who did what to which record"; the activity log is
//! the per-incident timeline that operators see and that the SLA monitor
//! queries for idempotency. Both are append-only sinks with snapshot reads.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{IncidentId, UserId};

/// Who performed an action. System actors are distinguishable from humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// A human dispatcher, operator, or responder user.
    User(UserId),
    /// The autonomous assignment path.
    AutoPilot,
    /// The background SLA monitor.
    SlaMonitor,
}

impl Actor {
    pub fn is_system(&self) -> bool {
        !matches!(self, Self::User(_))
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::AutoPilot => write!(f, "system:auto-pilot"),
            Self::SlaMonitor => write!(f, "system:sla-monitor"),
        }
    }
}

/// One audit entry: actor, action, target, optional note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor: Actor,
    pub action: String,
    pub target: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Typed kinds for incident activity records.
///
/// The SLA monitor's idempotency check is a kind lookup, not string
/// matching against the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Assigned,
    AutoAssigned,
    Acknowledged,
    Declined,
    SlaBreach,
    AssignmentTimeout,
    ResponderOffline,
}

/// One entry in an incident's operator-visible timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub incident_id: IncidentId,
    pub actor: Actor,
    pub kind: ActivityKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit sink.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn append(&self, actor: Actor, action: &str, target: &str, note: Option<String>) {
        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            actor,
            action: action.to_string(),
            target: target.to_string(),
            note,
            created_at: Utc::now(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

/// Append-only per-incident activity sink.
#[derive(Debug, Default)]
pub struct ActivityLog {
    records: Mutex<Vec<ActivityRecord>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn append(&self, incident_id: &str, actor: Actor, kind: ActivityKind, message: &str) {
        let record = ActivityRecord {
            id: uuid::Uuid::new_v4().to_string(),
            incident_id: incident_id.to_string(),
            actor,
            kind,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    /// Timeline for one incident, in append order.
    pub fn for_incident(&self, incident_id: &str) -> Vec<ActivityRecord> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.incident_id == incident_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the incident already carries a record of `kind`.
    pub fn has_kind(&self, incident_id: &str, kind: ActivityKind) -> bool {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .any(|r| r.incident_id == incident_id && r.kind == kind)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_query_by_incident_and_kind() {
        let log = ActivityLog::new();
        log.append("inc-1", Actor::SlaMonitor, ActivityKind::SlaBreach, "breach");
        log.append("inc-2", Actor::AutoPilot, ActivityKind::AutoAssigned, "assigned");

        assert_eq!(log.for_incident("inc-1").len(), 1);
        assert!(log.has_kind("inc-1", ActivityKind::SlaBreach));
        assert!(!log.has_kind("inc-1", ActivityKind::AutoAssigned));
        assert!(!log.has_kind("inc-2", ActivityKind::SlaBreach));
    }

    #[test]
    fn test_audit_append_order() {
        let log = AuditLog::new();
        log.append(Actor::User("u1".to_string()), "incident.assign", "inc-1", None);
        log.append(Actor::SlaMonitor, "incident.requeue", "inc-1", Some("timeout".to_string()));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "incident.assign");
        assert!(entries[1].actor.is_system());
    }

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::AutoPilot.to_string(), "system:auto-pilot");
        assert_eq!(Actor::User("u9".to_string()).to_string(), "user:u9");
    }
}
