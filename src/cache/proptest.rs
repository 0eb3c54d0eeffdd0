//! Property-Based Tests for the Group Cache
//!
//! Drives random relocation batches and sync requests through the cache and
//! checks the revision and deletion-log bookkeeping.
//!
//! # Test Properties
//!
//! 1. **One Bump Per Batch**: a batch that changes membership bumps the
//!    revision by exactly one, a batch that changes nothing leaves it alone
//! 2. **Idempotence**: reapplying a batch of distinct host moves is a no-op
//! 3. **Log Stamping**: no deletion is stamped past the committed revision
//! 4. **Partial Sync**: a proxy only receives deletions newer than the
//!    revision it reports
//! 5. **Full Sync**: a stale proxy gets FULL and an empty deletion log

#![cfg(test)]

use std::collections::BTreeMap;

use proptest::prelude::*;

use super::PgCache;
use crate::domain::{GroupDefinition, GroupSnapshot, HostId};
use crate::protocol::{HostRelocation, SyncMode, SyncRequest};
use crate::service::{apply_relocations, proxy_sync_data};

const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

/// Groups 1 and 2 are served by proxy 1, groups 3 and 4 by proxy 2.
fn seeded_cache() -> PgCache {
    let cache = PgCache::new();
    let snapshot = GroupSnapshot::new(1)
        .with_group(GroupDefinition::new(1, Some(1)).with_hosts(1..=5))
        .with_group(GroupDefinition::new(2, Some(1)).with_hosts(6..=10))
        .with_group(GroupDefinition::new(3, Some(2)).with_hosts(11..=15))
        .with_group(GroupDefinition::new(4, Some(2)));
    cache.lock().refresh_groups(&snapshot);

    for proxy_id in [1, 2] {
        let mut guard = cache.lock();
        if let Some(proxy) = guard.lookup_proxy_mut(proxy_id) {
            proxy.sync_time = NOW - 60;
        }
    }
    cache
}

// =============================================================================
// Property Strategies
// =============================================================================

/// Group ids including 0 (none) and 5 (not in the cache).
fn group_strategy() -> impl Strategy<Value = u64> {
    0u64..=5
}

fn relocation_strategy() -> impl Strategy<Value = HostRelocation> {
    (1u64..=20, group_strategy(), group_strategy())
        .prop_map(|(host, from, to)| HostRelocation::new(host, from, to))
}

fn batch_strategy() -> impl Strategy<Value = Vec<HostRelocation>> {
    prop::collection::vec(relocation_strategy(), 0..16)
}

/// Batches where every host moves at most once and never onto its source.
fn distinct_batch_strategy() -> impl Strategy<Value = Vec<HostRelocation>> {
    batch_strategy().prop_map(|batch| {
        let mut by_host: BTreeMap<HostId, HostRelocation> = BTreeMap::new();
        for relocation in batch {
            if relocation.source_group_id != relocation.dest_group_id {
                by_host.entry(relocation.host_id).or_insert(relocation);
            }
        }
        by_host.into_values().collect()
    })
}

// =============================================================================
// Revision Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: every batch bumps the revision by one iff it changed membership.
    #[test]
    fn prop_one_bump_per_changing_batch(batches in prop::collection::vec(batch_strategy(), 1..6)) {
        let cache = seeded_cache();

        for batch in &batches {
            let before = cache.hpmap_revision();
            let outcome = apply_relocations(&cache, None, batch);

            let expected = if outcome.changes > 0 { before + 1 } else { before };
            prop_assert_eq!(outcome.hpmap_revision, expected);
            prop_assert_eq!(cache.hpmap_revision(), expected);
        }
    }

    /// Property: applying the same batch of distinct moves twice changes nothing the second time.
    #[test]
    fn prop_reapplying_batch_is_noop(batch in distinct_batch_strategy()) {
        let cache = seeded_cache();

        apply_relocations(&cache, None, &batch);
        let revision = cache.hpmap_revision();

        let again = apply_relocations(&cache, None, &batch);
        prop_assert_eq!(again.changes, 0);
        prop_assert_eq!(cache.hpmap_revision(), revision);
    }

    /// Property: deletion log entries never carry a revision that was not committed.
    #[test]
    fn prop_deletions_stamped_with_committed_revision(
        batches in prop::collection::vec(batch_strategy(), 1..6)
    ) {
        let cache = seeded_cache();

        for batch in &batches {
            apply_relocations(&cache, None, batch);

            let guard = cache.lock();
            let revision = guard.hpmap_revision();
            for proxy_id in [1, 2] {
                let proxy = guard.lookup_proxy(proxy_id).unwrap();
                for entry in proxy.deleted_group_hosts() {
                    prop_assert!(entry.revision <= revision);
                }
            }
        }
    }
}

// =============================================================================
// Sync Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: PARTIAL carries exactly the deletions newer than the reported revision.
    #[test]
    fn prop_partial_sync_omits_acknowledged_deletions(
        batches in prop::collection::vec(batch_strategy(), 1..6),
        proxy_id in 1u64..=2,
        lag in 0u64..4,
    ) {
        let cache = seeded_cache();
        for batch in &batches {
            apply_relocations(&cache, None, batch);
        }

        let known = cache.hpmap_revision().saturating_sub(lag);
        let expected: Vec<HostId> = cache
            .lock()
            .lookup_proxy(proxy_id)
            .unwrap()
            .deleted_group_hosts()
            .iter()
            .filter(|entry| entry.revision > known)
            .map(|entry| entry.host_id)
            .collect();

        let response = proxy_sync_data(&cache, SyncRequest::new(proxy_id, known), NOW, DAY);
        prop_assert_eq!(response.mode(), SyncMode::Partial);
        prop_assert_eq!(response.deleted_hosts(), expected.as_slice());

        // the acknowledged part is gone for good
        let guard = cache.lock();
        let proxy = guard.lookup_proxy(proxy_id).unwrap();
        prop_assert!(proxy.deleted_group_hosts().iter().all(|entry| entry.revision > known));
    }

    /// Property: a proxy past the resync interval always gets FULL with an empty log.
    #[test]
    fn prop_stale_proxy_gets_full(
        batches in prop::collection::vec(batch_strategy(), 1..6),
        proxy_id in 1u64..=2,
        known in 0u64..10,
        overdue in 0i64..DAY,
    ) {
        let cache = seeded_cache();
        for batch in &batches {
            apply_relocations(&cache, None, batch);
        }

        let now = NOW - 60 + DAY + overdue;
        let response = proxy_sync_data(&cache, SyncRequest::new(proxy_id, known), now, DAY);
        prop_assert_eq!(response.mode(), SyncMode::Full);
        prop_assert!(response.deleted_hosts().is_empty());
        prop_assert!(cache.lock().lookup_proxy(proxy_id).unwrap().deleted_group_hosts().is_empty());
    }
}
