//! Service metrics
//!
//! Prometheus counters for relocation and sync traffic.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::error::{Error, Result};
use crate::protocol::SyncMode;

/// Counters exported by the proxy group service
#[derive(Debug, Clone)]
pub struct PgMetrics {
    relocation_batches: IntCounter,
    membership_changes: IntCounter,
    revision_bumps: IntCounter,
    sync_replies: IntCounterVec,
    rejected_messages: IntCounter,
    hpmap_revision: IntGauge,
}

impl PgMetrics {
    /// Create counters and register them with the given registry
    pub fn register(registry: &Registry) -> Result<Self> {
        let metrics = Self::unregistered()?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.relocation_batches.clone()),
            Box::new(metrics.membership_changes.clone()),
            Box::new(metrics.revision_bumps.clone()),
            Box::new(metrics.sync_replies.clone()),
            Box::new(metrics.rejected_messages.clone()),
            Box::new(metrics.hpmap_revision.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(|e| Error::Internal(format!("Failed to register metric: {}", e)))?;
        }

        Ok(metrics)
    }

    /// Create counters that are not exported anywhere (tests, embedding)
    pub fn unregistered() -> Result<Self> {
        let map_err = |e: prometheus::Error| Error::Internal(format!("Invalid metric: {}", e));

        Ok(Self {
            relocation_batches: IntCounter::new(
                "pgmanager_relocation_batches_total",
                "Host relocation batches applied",
            )
            .map_err(map_err)?,
            membership_changes: IntCounter::new(
                "pgmanager_membership_changes_total",
                "Group membership additions and removals",
            )
            .map_err(map_err)?,
            revision_bumps: IntCounter::new(
                "pgmanager_revision_bumps_total",
                "Hostmap revision increments from relocation batches",
            )
            .map_err(map_err)?,
            sync_replies: IntCounterVec::new(
                Opts::new("pgmanager_sync_replies_total", "Proxy sync replies by mode"),
                &["mode"],
            )
            .map_err(map_err)?,
            rejected_messages: IntCounter::new(
                "pgmanager_rejected_messages_total",
                "Inbound messages rejected as malformed",
            )
            .map_err(map_err)?,
            hpmap_revision: IntGauge::new(
                "pgmanager_hpmap_revision",
                "Current host-to-proxy mapping revision",
            )
            .map_err(map_err)?,
        })
    }

    pub fn record_relocation(&self, changes: usize, bumped: bool) {
        self.relocation_batches.inc();
        self.membership_changes.inc_by(changes as u64);
        if bumped {
            self.revision_bumps.inc();
        }
    }

    pub fn record_sync(&self, mode: SyncMode) {
        self.sync_replies.with_label_values(&[mode.as_str()]).inc();
    }

    pub fn record_rejected(&self) {
        self.rejected_messages.inc();
    }

    pub fn set_revision(&self, revision: u64) {
        self.hpmap_revision.set(revision as i64);
    }

    /// Last published hostmap revision
    pub fn revision(&self) -> u64 {
        self.hpmap_revision.get().max(0) as u64
    }

    pub fn relocation_batches(&self) -> u64 {
        self.relocation_batches.get()
    }

    pub fn revision_bumps(&self) -> u64 {
        self.revision_bumps.get()
    }

    pub fn sync_replies(&self, mode: SyncMode) -> u64 {
        self.sync_replies.with_label_values(&[mode.as_str()]).get()
    }

    pub fn rejected_messages(&self) -> u64 {
        self.rejected_messages.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_record() {
        let registry = Registry::new();
        let metrics = PgMetrics::register(&registry).unwrap();

        metrics.record_relocation(3, true);
        metrics.record_relocation(0, false);
        metrics.record_sync(SyncMode::Partial);
        metrics.record_rejected();

        assert_eq!(metrics.relocation_batches(), 2);
        assert_eq!(metrics.revision_bumps(), 1);
        assert_eq!(metrics.sync_replies(SyncMode::Partial), 1);
        assert_eq!(metrics.sync_replies(SyncMode::Full), 0);
        assert_eq!(metrics.rejected_messages(), 1);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("pgmanager_relocation_batches_total 2"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PgMetrics::register(&registry).unwrap();
        assert!(PgMetrics::register(&registry).is_err());
    }
}
