//! Proxy Group Manager
//!
//! Tracks which hosts belong to which monitoring proxy group and lets each
//! proxy keep a local copy of its host assignment up to date with small
//! deltas instead of re-downloading the whole mapping on every poll.
//!
//! # Architecture
//!
//! ```text
//! relocation producer ──┐                         ┌──▶ relocation handler ──┐
//!                       ├──▶ IpcServer ──▶ PgService                        ├──▶ PgCache
//! proxy sync poller ────┘        ▲                └──▶ sync handler ────────┘
//!                                └───────────── SYNC_RESPONSE ◀─────┘
//! ```
//!
//! Every membership change bumps a global hostmap revision (once per batch)
//! and stamps the removed hosts into the serving proxy's deletion log. A proxy
//! reporting the revision it last applied receives only the deletions it has
//! not seen yet, or a full resync once a day.
//!
//! # Modules
//!
//! - [`adapters`] - Group source and event publisher implementations
//! - [`cache`] - Lock-protected group/proxy cache
//! - [`config`] - Service configuration
//! - [`domain`] - Identifiers, ports and domain events
//! - [`error`] - Error types
//! - [`ipc`] - Unix socket server and client
//! - [`metrics`] - Prometheus counters
//! - [`protocol`] - Frame codec and typed messages
//! - [`service`] - Service loop, relocation and sync handlers

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod ipc;
pub mod metrics;
pub mod protocol;
pub mod service;

// Re-export commonly used types
pub use cache::{CacheGuard, PgCache};
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use ipc::{IpcClient, IpcServer};
pub use metrics::PgMetrics;
pub use protocol::{HostRelocation, SyncMode, SyncRequest, SyncResponse};
pub use service::{PgService, PgServiceHandle};
