//! Incident-update notifications for collaborators.
//!
//! A broadcast bus in the manner of the coordination event bus: publishing
//! never blocks and never fails when nobody is listening. Consumers (socket
//! gateways, the responder app bridge) subscribe and filter by scope.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::store::{AgencyId, IncidentId, IncidentStatus, ResponderId, ResponderStatus, UserId};

/// Channel capacity for the broadcast bus.
const CHANNEL_CAPACITY: usize = 256;

/// Delivery scope for one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationScope {
    /// A single user.
    User(UserId),
    /// Everyone watching an agency.
    Agency(AgencyId),
    /// Administrators / supervisors.
    Admins,
}

/// Events published by the engine after a transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// An incident's dispatch-relevant state changed.
    IncidentUpdated {
        incident_id: IncidentId,
        status: IncidentStatus,
        timestamp: DateTime<Utc>,
    },

    /// A responder's operational status changed.
    ResponderStatusChanged {
        responder_id: ResponderId,
        agency_id: AgencyId,
        status: ResponderStatus,
        timestamp: DateTime<Utc>,
    },
}

impl DispatchEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IncidentUpdated { .. } => "incident_updated",
            Self::ResponderStatusChanged { .. } => "responder_status_changed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::IncidentUpdated { timestamp, .. }
            | Self::ResponderStatusChanged { timestamp, .. } => *timestamp,
        }
    }
}

/// A scoped event as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub scopes: Vec<NotificationScope>,
    pub event: DispatchEvent,
}

impl Notification {
    /// Whether this notification is addressed to `scope`.
    pub fn is_for(&self, scope: &NotificationScope) -> bool {
        self.scopes.contains(scope)
    }
}

/// Shared reference to a Notifier.
pub type SharedNotifier = Arc<Notifier>;

/// Broadcast-based notification publisher.
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedNotifier {
        Arc::new(self)
    }

    /// Publish an event to all subscribers. No receivers is not an error.
    pub fn publish(&self, scopes: Vec<NotificationScope>, event: DispatchEvent) {
        let event_type = event.event_type();
        match self.sender.send(Notification { scopes, event }) {
            Ok(count) => debug!(event_type, receivers = count, "notification published"),
            Err(_) => debug!(event_type, "notification published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Subscribe to notifications addressed to one scope.
    pub fn subscribe_scope(&self, scope: NotificationScope) -> ScopedReceiver {
        ScopedReceiver {
            receiver: self.subscribe(),
            scope,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields notifications addressed to its scope.
pub struct ScopedReceiver {
    receiver: broadcast::Receiver<Notification>,
    scope: NotificationScope,
}

impl ScopedReceiver {
    pub async fn recv(&mut self) -> Result<Notification, broadcast::error::RecvError> {
        loop {
            let notification = self.receiver.recv().await?;
            if notification.is_for(&self.scope) {
                return Ok(notification);
            }
        }
    }
}
