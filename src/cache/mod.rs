//! Proxy Group Cache
//!
//! In-memory state shared by the relocation and sync handlers.
//!
//! ```text
//! ┌─────────────────────────── PgCache (Mutex) ────────────────────────────┐
//! │  hpmap_revision      groups: id → Group { proxy, hosts }               │
//! │  hostmap: host → group                                                 │
//! │  proxies: id → Proxy { sync_time, remote revision, deleted hosts }     │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The deletion log is the only structure with churn: entries are appended
//! on removal, pruned once a proxy reports a revision at or past their stamp,
//! and cleared on a full resync.

mod model;
mod store;

#[cfg(test)]
mod proptest;

pub use model::{DeletedHost, Group, Proxy};
pub use store::{CacheGuard, PgCache, RefreshOutcome};
