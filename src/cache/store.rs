//! Proxy Group Cache Store
//!
//! Groups, proxies, per-proxy deletion logs and the global hostmap revision,
//! all behind a single mutex. Callers take a [`CacheGuard`] with
//! [`PgCache::lock`] and perform a whole logical operation (one relocation
//! batch, one sync response) before dropping it.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::model::{Group, Proxy};
use crate::domain::{GroupId, GroupSnapshot, HostId, ProxyId, Revision};

/// Outcome of applying a group snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Snapshot revision differed from the last applied one
    pub applied: bool,
    /// Groups created from the snapshot
    pub groups_added: usize,
    /// Groups no longer present in the snapshot
    pub groups_removed: usize,
    /// Host memberships changed (seeded, dropped or moved to another proxy)
    pub changes: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    hpmap_revision: Revision,
    config_revision: Option<u64>,
    groups: HashMap<GroupId, Group>,
    proxies: HashMap<ProxyId, Proxy>,
    /// host -> group currently holding it
    hostmap: HashMap<HostId, GroupId>,
}

impl CacheState {
    /// Revision the current batch commits once it bumps
    fn pending_revision(&self) -> Revision {
        self.hpmap_revision + 1
    }

    fn detach_host(&mut self, group_id: GroupId, host_id: HostId) -> bool {
        let revision = self.pending_revision();
        let Some(group) = self.groups.get_mut(&group_id) else {
            return false;
        };

        if !group.remove_host(host_id) {
            return false;
        }

        if self.hostmap.get(&host_id) == Some(&group_id) {
            self.hostmap.remove(&host_id);
        }

        if let Some(proxy) = group.proxy_id().and_then(|id| self.proxies.get_mut(&id)) {
            proxy.log_deletion(host_id, revision);
        }

        true
    }

    fn attach_host(&mut self, group_id: GroupId, host_id: HostId) -> bool {
        if !self.groups.contains_key(&group_id) {
            return false;
        }

        if let Some(&current) = self.hostmap.get(&host_id) {
            if current == group_id {
                return false;
            }
            warn!(
                host_id,
                from = current,
                to = group_id,
                "Host added to group while still assigned elsewhere, detaching it first"
            );
            self.detach_host(current, host_id);
        }

        let Some(group) = self.groups.get_mut(&group_id) else {
            return false;
        };
        group.insert_host(host_id);
        self.hostmap.insert(host_id, group_id);
        true
    }

    /// Drop every member of a group, logging each on its serving proxy.
    fn release_members(&mut self, group: &mut Group) -> usize {
        let revision = self.pending_revision();
        let hosts = group.take_hosts();
        if let Some(proxy) = group.proxy_id().and_then(|id| self.proxies.get_mut(&id)) {
            for &host_id in &hosts {
                proxy.log_deletion(host_id, revision);
            }
        }

        for host_id in &hosts {
            if self.hostmap.get(host_id) == Some(&group.id()) {
                self.hostmap.remove(host_id);
            }
        }

        hosts.len()
    }

    fn ensure_proxy(&mut self, proxy_id: ProxyId) {
        self.proxies
            .entry(proxy_id)
            .or_insert_with(|| Proxy::new(proxy_id));
    }

    fn refresh(&mut self, snapshot: &GroupSnapshot) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();

        if self.config_revision == Some(snapshot.revision) {
            return outcome;
        }
        outcome.applied = true;

        for &proxy_id in &snapshot.proxies {
            self.ensure_proxy(proxy_id);
        }

        let stale: Vec<GroupId> = self
            .groups
            .keys()
            .filter(|id| !snapshot.groups.iter().any(|def| def.id == **id))
            .copied()
            .collect();

        for group_id in stale {
            if let Some(mut group) = self.groups.remove(&group_id) {
                outcome.changes += self.release_members(&mut group);
                outcome.groups_removed += 1;
            }
        }

        for def in &snapshot.groups {
            if let Some(proxy_id) = def.proxy_id {
                self.ensure_proxy(proxy_id);
            }

            match self.groups.remove(&def.id) {
                Some(mut group) => {
                    if group.proxy_id() != def.proxy_id {
                        // the previous proxy must drop every member; the new
                        // one picks them up from its next full resync
                        let hosts: Vec<HostId> = group.hosts().collect();
                        outcome.changes += self.release_members(&mut group);
                        group.set_proxy(def.proxy_id);
                        for host_id in hosts {
                            group.insert_host(host_id);
                            self.hostmap.insert(host_id, def.id);
                        }
                    }
                    self.groups.insert(def.id, group);
                }
                None => {
                    let mut group = Group::new(def.id, def.proxy_id);
                    for &host_id in &def.hosts {
                        if let Some(other) = self.hostmap.get(&host_id) {
                            warn!(
                                host_id,
                                group_id = def.id,
                                current = *other,
                                "Skipping initial member already assigned to another group"
                            );
                            continue;
                        }
                        if group.insert_host(host_id) {
                            self.hostmap.insert(host_id, def.id);
                            outcome.changes += 1;
                        }
                    }
                    self.groups.insert(def.id, group);
                    outcome.groups_added += 1;
                }
            }
        }

        self.config_revision = Some(snapshot.revision);

        if outcome.changes > 0 {
            self.hpmap_revision += 1;
        }

        outcome
    }
}

/// Shared, lock-protected proxy group cache.
#[derive(Debug, Default)]
pub struct PgCache {
    state: Mutex<CacheState>,
}

impl PgCache {
    /// Create an empty cache at revision 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache starting from a known hostmap revision
    pub fn with_revision(revision: Revision) -> Self {
        Self {
            state: Mutex::new(CacheState {
                hpmap_revision: revision,
                ..Default::default()
            }),
        }
    }

    /// Acquire exclusive access; released when the guard drops.
    pub fn lock(&self) -> CacheGuard<'_> {
        CacheGuard {
            state: self.state.lock(),
        }
    }

    /// Current hostmap revision (takes the lock briefly)
    pub fn hpmap_revision(&self) -> Revision {
        self.lock().hpmap_revision()
    }
}

/// Exclusive access to the cache for the duration of one logical operation.
pub struct CacheGuard<'a> {
    state: MutexGuard<'a, CacheState>,
}

impl CacheGuard<'_> {
    /// Global host-to-proxy mapping revision
    pub fn hpmap_revision(&self) -> Revision {
        self.state.hpmap_revision
    }

    /// Configuration revision of the last applied group snapshot
    pub fn config_revision(&self) -> Option<u64> {
        self.state.config_revision
    }

    /// Reconcile group definitions with the given snapshot.
    ///
    /// Membership of groups that already exist is left as is; it is owned by
    /// relocation events. Bumps the revision once if any membership changed.
    pub fn refresh_groups(&mut self, snapshot: &GroupSnapshot) -> RefreshOutcome {
        let outcome = self.state.refresh(snapshot);
        if outcome.applied {
            debug!(
                config_revision = snapshot.revision,
                added = outcome.groups_added,
                removed = outcome.groups_removed,
                changes = outcome.changes,
                hpmap_revision = self.state.hpmap_revision,
                "Refreshed proxy groups"
            );
        }
        outcome
    }

    pub fn lookup_group(&self, group_id: GroupId) -> Option<&Group> {
        self.state.groups.get(&group_id)
    }

    pub fn lookup_proxy(&self, proxy_id: ProxyId) -> Option<&Proxy> {
        self.state.proxies.get(&proxy_id)
    }

    pub fn lookup_proxy_mut(&mut self, proxy_id: ProxyId) -> Option<&mut Proxy> {
        self.state.proxies.get_mut(&proxy_id)
    }

    /// Group currently holding the host
    pub fn host_group(&self, host_id: HostId) -> Option<GroupId> {
        self.state.hostmap.get(&host_id).copied()
    }

    pub fn group_count(&self) -> usize {
        self.state.groups.len()
    }

    pub fn proxy_count(&self) -> usize {
        self.state.proxies.len()
    }

    /// Register a proxy; returns false if it was already known.
    pub fn add_proxy(&mut self, proxy_id: ProxyId) -> bool {
        if self.state.proxies.contains_key(&proxy_id) {
            return false;
        }
        self.state.ensure_proxy(proxy_id);
        true
    }

    /// Forget a proxy together with its deletion log.
    pub fn remove_proxy(&mut self, proxy_id: ProxyId) -> bool {
        self.state.proxies.remove(&proxy_id).is_some()
    }

    /// Remove a host from a group, logging the deletion on the group's proxy
    /// with the revision the current batch commits.
    ///
    /// Returns false (no-op) if the group is unknown or the host is not a member.
    pub fn remove_host_from_group(&mut self, group_id: GroupId, host_id: HostId) -> bool {
        self.state.detach_host(group_id, host_id)
    }

    /// Add a host to a group.
    ///
    /// Returns false (no-op) if the group is unknown or already holds the host.
    pub fn add_host_to_group(&mut self, group_id: GroupId, host_id: HostId) -> bool {
        self.state.attach_host(group_id, host_id)
    }

    /// Commit the current batch; returns the new revision.
    pub fn bump_revision(&mut self) -> Revision {
        self.state.hpmap_revision += 1;
        self.state.hpmap_revision
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DeletedHost;
    use crate::domain::GroupDefinition;

    fn seeded() -> PgCache {
        let cache = PgCache::new();
        let snapshot = GroupSnapshot::new(1)
            .with_group(GroupDefinition::new(3, Some(9)).with_hosts([42, 43]))
            .with_group(GroupDefinition::new(5, Some(10)));
        cache.lock().refresh_groups(&snapshot);
        cache
    }

    // =========================================================================
    // Refresh Tests
    // =========================================================================

    #[test]
    fn test_refresh_creates_groups_and_proxies() {
        let cache = seeded();
        let guard = cache.lock();

        assert_eq!(guard.group_count(), 2);
        assert_eq!(guard.proxy_count(), 2);
        assert!(guard.lookup_group(3).unwrap().contains(42));
        assert_eq!(guard.host_group(43), Some(3));
        assert_eq!(guard.hpmap_revision(), 1);
        assert_eq!(guard.config_revision(), Some(1));
    }

    #[test]
    fn test_refresh_same_revision_is_noop() {
        let cache = seeded();
        let mut guard = cache.lock();
        let snapshot = GroupSnapshot::new(1);

        let outcome = guard.refresh_groups(&snapshot);

        assert!(!outcome.applied);
        assert_eq!(guard.group_count(), 2);
        assert_eq!(guard.hpmap_revision(), 1);
    }

    #[test]
    fn test_refresh_removed_group_logs_deletions() {
        let cache = seeded();
        let mut guard = cache.lock();
        let snapshot = GroupSnapshot::new(2).with_group(GroupDefinition::new(5, Some(10)));

        let outcome = guard.refresh_groups(&snapshot);

        assert_eq!(outcome.groups_removed, 1);
        assert_eq!(outcome.changes, 2);
        assert!(guard.lookup_group(3).is_none());
        assert_eq!(guard.host_group(42), None);
        assert_eq!(guard.hpmap_revision(), 2);
        assert_eq!(
            guard.lookup_proxy(9).unwrap().deleted_group_hosts(),
            &[DeletedHost::new(42, 2), DeletedHost::new(43, 2)]
        );
    }

    #[test]
    fn test_refresh_proxy_reassignment_keeps_members() {
        let cache = seeded();
        let mut guard = cache.lock();
        let snapshot = GroupSnapshot::new(2)
            .with_group(GroupDefinition::new(3, Some(11)))
            .with_group(GroupDefinition::new(5, Some(10)));

        guard.refresh_groups(&snapshot);

        let group = guard.lookup_group(3).unwrap();
        assert_eq!(group.proxy_id(), Some(11));
        assert_eq!(group.hosts().collect::<Vec<_>>(), vec![42, 43]);
        assert_eq!(guard.host_group(42), Some(3));
        assert_eq!(guard.lookup_proxy(9).unwrap().deleted_host_ids(), vec![42, 43]);
        assert!(guard.lookup_proxy(11).is_some());
    }

    #[test]
    fn test_refresh_skips_member_of_other_group() {
        let cache = seeded();
        let mut guard = cache.lock();
        let snapshot = GroupSnapshot::new(2)
            .with_group(GroupDefinition::new(3, Some(9)))
            .with_group(GroupDefinition::new(5, Some(10)))
            .with_group(GroupDefinition::new(7, None).with_hosts([42, 50]));

        guard.refresh_groups(&snapshot);

        assert_eq!(guard.host_group(42), Some(3));
        assert_eq!(guard.host_group(50), Some(7));
        assert!(!guard.lookup_group(7).unwrap().contains(42));
    }

    // =========================================================================
    // Membership Tests
    // =========================================================================

    #[test]
    fn test_remove_host_logs_pending_revision() {
        let cache = seeded();
        let mut guard = cache.lock();

        assert!(guard.remove_host_from_group(3, 42));
        assert!(!guard.lookup_group(3).unwrap().contains(42));
        assert_eq!(
            guard.lookup_proxy(9).unwrap().deleted_group_hosts(),
            &[DeletedHost::new(42, 2)]
        );

        // not a member any more
        assert!(!guard.remove_host_from_group(3, 42));
        assert_eq!(guard.lookup_proxy(9).unwrap().deleted_group_hosts().len(), 1);
    }

    #[test]
    fn test_remove_from_unknown_group_is_noop() {
        let cache = seeded();
        let mut guard = cache.lock();
        assert!(!guard.remove_host_from_group(99, 42));
        assert_eq!(guard.host_group(42), Some(3));
    }

    #[test]
    fn test_remove_from_group_without_proxy() {
        let cache = PgCache::new();
        let mut guard = cache.lock();
        guard.refresh_groups(
            &GroupSnapshot::new(1).with_group(GroupDefinition::new(1, None).with_hosts([5])),
        );

        assert!(guard.remove_host_from_group(1, 5));
        assert_eq!(guard.proxy_count(), 0);
    }

    #[test]
    fn test_add_host_is_idempotent() {
        let cache = seeded();
        let mut guard = cache.lock();

        assert!(guard.add_host_to_group(5, 77));
        assert!(!guard.add_host_to_group(5, 77));
        assert_eq!(guard.host_group(77), Some(5));
        assert!(!guard.add_host_to_group(99, 78));
    }

    #[test]
    fn test_add_host_detaches_from_previous_group() {
        let cache = seeded();
        let mut guard = cache.lock();

        assert!(guard.add_host_to_group(5, 42));

        assert!(!guard.lookup_group(3).unwrap().contains(42));
        assert!(guard.lookup_group(5).unwrap().contains(42));
        assert_eq!(guard.lookup_proxy(9).unwrap().deleted_host_ids(), vec![42]);
    }

    // =========================================================================
    // Proxy Lifecycle Tests
    // =========================================================================

    #[test]
    fn test_add_and_remove_proxy() {
        let cache = PgCache::new();
        let mut guard = cache.lock();

        assert!(guard.add_proxy(1));
        assert!(!guard.add_proxy(1));
        assert!(guard.lookup_proxy(1).is_some());
        assert!(guard.remove_proxy(1));
        assert!(!guard.remove_proxy(1));
    }

    #[test]
    fn test_bump_revision() {
        let cache = PgCache::with_revision(10);
        let revision = cache.lock().bump_revision();
        assert_eq!(revision, 11);
        assert_eq!(cache.hpmap_revision(), 11);
    }

    #[test]
    fn test_cache_shared_across_threads() {
        use std::sync::Arc;

        let cache = Arc::new(seeded());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let mut guard = cache.lock();
                    guard.add_host_to_group(5, 1000 + i);
                    guard.bump_revision();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let guard = cache.lock();
        assert_eq!(guard.hpmap_revision(), 5);
        assert_eq!(guard.lookup_group(5).unwrap().host_count(), 4);
    }
}
