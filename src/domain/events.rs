//! Domain Events
//!
//! Immutable records of cache changes and protocol exchanges, published
//! after the cache lock has been released.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::{ProxyId, Revision};

/// Domain event representing a significant occurrence in the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// Group definitions were reloaded from a new configuration revision.
    GroupsRefreshed {
        config_revision: u64,
        groups: usize,
        hpmap_revision: Revision,
        timestamp: DateTime<Utc>,
    },

    /// A relocation batch was applied.
    HostsRelocated {
        relocations: usize,
        changes: usize,
        hpmap_revision: Revision,
        timestamp: DateTime<Utc>,
    },

    /// A proxy sync request was answered.
    ProxySynced {
        proxy_id: ProxyId,
        mode: String,
        known_revision: Revision,
        hpmap_revision: Revision,
        deleted_hosts: usize,
        timestamp: DateTime<Utc>,
    },

    /// An inbound message was rejected as malformed.
    MessageRejected {
        code: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The service loop exited.
    ServiceStopped { timestamp: DateTime<Utc> },
}

impl DomainEvent {
    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::GroupsRefreshed { .. } => "GroupsRefreshed",
            DomainEvent::HostsRelocated { .. } => "HostsRelocated",
            DomainEvent::ProxySynced { .. } => "ProxySynced",
            DomainEvent::MessageRejected { .. } => "MessageRejected",
            DomainEvent::ServiceStopped { .. } => "ServiceStopped",
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::GroupsRefreshed { timestamp, .. }
            | DomainEvent::HostsRelocated { timestamp, .. }
            | DomainEvent::ProxySynced { timestamp, .. }
            | DomainEvent::MessageRejected { timestamp, .. }
            | DomainEvent::ServiceStopped { timestamp } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_serialization() {
        let event = DomainEvent::HostsRelocated {
            relocations: 2,
            changes: 4,
            hpmap_revision: 12,
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "HostsRelocated");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"HostsRelocated\""));

        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
