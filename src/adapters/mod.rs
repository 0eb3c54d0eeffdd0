//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports.
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 Ports (Traits)                  │
//! │        GroupSource     │    EventPublisher      │
//! └────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌────────────────────────────────────────────────┐
//! │              Adapters (This Module)             │
//! │  StaticGroupSource │ FileGroupSource            │
//! │  LoggingEventPublisher │ InMemoryEventCollector │
//! └────────────────────────────────────────────────┘
//! ```

mod event_publisher;
mod group_source;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use group_source::{parse_snapshot, FileGroupSource, StaticGroupSource};
