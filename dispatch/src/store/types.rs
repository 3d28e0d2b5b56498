//! Domain records held by the storage layer.
//!
//! Incidents and responders are created by collaborators (intake,
//! onboarding); the engine only transitions their assignment-related fields.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Unique identifier for incidents.
pub type IncidentId = String;

/// Unique identifier for responders.
pub type ResponderId = String;

/// Unique identifier for agencies.
pub type AgencyId = String;

/// Unique identifier for human users (dispatchers, agency staff).
pub type UserId = String;

/// Dispatch-relevant lifecycle states of an incident.
///
/// Forward only: Received → Assigned → Responding → Resolved. Decline and
/// acknowledgment-timeout repair return Assigned → Received; nothing returns
/// from Responding or later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Reported and waiting for dispatch.
    Received,
    /// Under manual review by an operator; still dispatchable.
    UnderReview,
    /// A responder (or agency) holds the assignment.
    Assigned,
    /// The responder is working the incident.
    Responding,
    /// Closed.
    Resolved,
}

impl IncidentStatus {
    /// Whether a new assignment may be committed in this state.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Received | Self::UnderReview)
    }
}

/// Operational state of a responder unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderStatus {
    Available,
    Assigned,
    EnRoute,
    OnScene,
    Offline,
}

impl ResponderStatus {
    /// Committed states hold exactly one incident.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Assigned | Self::EnRoute | Self::OnScene)
    }
}

/// Categorical type of an agency, used by category-affinity scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgencyKind {
    Police,
    Fire,
    Medical,
    Traffic,
    Utility,
    Other,
}

/// A reported event requiring dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    /// Short operator-facing description.
    pub summary: String,
    pub status: IncidentStatus,
    /// Severity 0–5; `None` until classification completes.
    pub severity: Option<u8>,
    pub category: Option<String>,
    pub location: Option<GeoPoint>,
    pub assigned_agency_id: Option<AgencyId>,
    pub assigned_responder_id: Option<ResponderId>,
    pub reported_at: DateTime<Utc>,
    /// Set when an assignment is committed.
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Set when the responder confirms the assignment.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Responders that refused this incident. Grows monotonically.
    pub declined_responders: BTreeSet<ResponderId>,
}

impl Incident {
    /// Create a freshly-received incident.
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            summary: summary.into(),
            status: IncidentStatus::Received,
            severity: None,
            category: None,
            location: None,
            assigned_agency_id: None,
            assigned_responder_id: None,
            reported_at: Utc::now(),
            dispatched_at: None,
            acknowledged_at: None,
            declined_responders: BTreeSet::new(),
        }
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_classification(mut self, severity: u8, category: impl Into<String>) -> Self {
        self.severity = Some(severity.min(5));
        self.category = Some(category.into());
        self
    }

    /// Whether `responder_id` previously refused this incident.
    pub fn has_declined(&self, responder_id: &str) -> bool {
        self.declined_responders.contains(responder_id)
    }
}

/// A mobile unit belonging to an agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Responder {
    pub id: ResponderId,
    pub agency_id: AgencyId,
    pub name: String,
    pub status: ResponderStatus,
    pub location: Option<GeoPoint>,
    /// The incident this unit holds; `Some` iff status is committed.
    pub incident_id: Option<IncidentId>,
    /// Last heartbeat; drives the offline sweep.
    pub last_seen_at: DateTime<Utc>,
}

impl Responder {
    pub fn new(agency_id: impl Into<AgencyId>, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agency_id: agency_id.into(),
            name: name.into(),
            status: ResponderStatus::Available,
            location: None,
            incident_id: None,
            last_seen_at: Utc::now(),
        }
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// Record a heartbeat.
    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}

/// An organization owning responders and, optionally, a jurisdiction area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agency {
    pub id: AgencyId,
    pub name: String,
    pub kind: AgencyKind,
    pub active: bool,
    /// Closed ring of vertices; `None` means no defined operating area.
    pub jurisdiction: Option<Vec<GeoPoint>>,
}

impl Agency {
    pub fn new(name: impl Into<String>, kind: AgencyKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            active: true,
            jurisdiction: None,
        }
    }

    pub fn with_jurisdiction(mut self, ring: Vec<GeoPoint>) -> Self {
        self.jurisdiction = Some(ring);
        self
    }
}
