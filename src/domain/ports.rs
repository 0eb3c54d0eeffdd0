//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the proxy group manager depends on. Adapters in
//! [`crate::adapters`] provide concrete implementations.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Domain Layer                  │
//! │      GroupSource      │    EventPublisher     │
//! └──────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │               Adapters (Impls)                │
//! │  StaticGroupSource │ FileGroupSource │ ...    │
//! └──────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::error::Result;

// =============================================================================
// Identifiers
// =============================================================================

/// Monitored host identifier
pub type HostId = u64;

/// Proxy group identifier
pub type GroupId = u64;

/// Proxy identifier
pub type ProxyId = u64;

/// Host-to-proxy mapping revision
pub type Revision = u64;

// =============================================================================
// Value Objects
// =============================================================================

/// Configured definition of one proxy group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    /// Group identifier
    pub id: GroupId,

    /// Proxy currently serving the group, if any
    #[serde(default)]
    pub proxy_id: Option<ProxyId>,

    /// Initial members, used only when the group first appears
    #[serde(default)]
    pub hosts: Vec<HostId>,
}

impl GroupDefinition {
    /// Create a group definition without initial members.
    pub fn new(id: GroupId, proxy_id: Option<ProxyId>) -> Self {
        Self {
            id,
            proxy_id,
            hosts: Vec::new(),
        }
    }

    /// Attach initial members.
    pub fn with_hosts(mut self, hosts: impl IntoIterator<Item = HostId>) -> Self {
        self.hosts = hosts.into_iter().collect();
        self
    }
}

/// Authoritative group configuration at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    /// Configuration revision; an unchanged revision means nothing to apply
    pub revision: u64,

    /// All configured groups
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,

    /// Registered proxies, including ones not serving any group yet
    #[serde(default)]
    pub proxies: Vec<ProxyId>,
}

impl GroupSnapshot {
    /// Create an empty snapshot at the given revision.
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            ..Default::default()
        }
    }

    /// Add a group definition.
    pub fn with_group(mut self, group: GroupDefinition) -> Self {
        self.groups.push(group);
        self
    }

    /// Add a registered proxy.
    pub fn with_proxy(mut self, proxy_id: ProxyId) -> Self {
        self.proxies.push(proxy_id);
        self
    }
}

// =============================================================================
// Group Source Port
// =============================================================================

/// Port for reading the current group configuration.
///
/// Called before every relocation batch so relocations apply against the
/// latest group definitions.
#[async_trait]
pub trait GroupSource: Send + Sync {
    /// Get the latest group snapshot.
    async fn snapshot(&self) -> Result<GroupSnapshot>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish a batch of events in order.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
