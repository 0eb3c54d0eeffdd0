//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - identifiers, group snapshot value objects and
//!   the `GroupSource` / `EventPublisher` traits
//! - **Events** (`events.rs`) - domain events for audit logging

pub mod events;
pub mod ports;

pub use events::DomainEvent;
pub use ports::{
    EventPublisher, GroupDefinition, GroupId, GroupSnapshot, GroupSource, HostId, ProxyId,
    Revision,
};
