//! Cache records: groups, proxies and deletion-log entries

use std::collections::BTreeSet;

use crate::domain::{GroupId, HostId, ProxyId, Revision};

/// A host that left a group served by a proxy, stamped with the hostmap
/// revision of the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedHost {
    pub host_id: HostId,
    pub revision: Revision,
}

impl DeletedHost {
    pub fn new(host_id: HostId, revision: Revision) -> Self {
        Self { host_id, revision }
    }
}

/// Proxy group with its current members and serving proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: GroupId,
    proxy_id: Option<ProxyId>,
    hosts: BTreeSet<HostId>,
}

impl Group {
    /// Create an empty group.
    pub fn new(id: GroupId, proxy_id: Option<ProxyId>) -> Self {
        Self {
            id,
            proxy_id,
            hosts: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Proxy currently serving this group
    pub fn proxy_id(&self) -> Option<ProxyId> {
        self.proxy_id
    }

    pub fn contains(&self, host_id: HostId) -> bool {
        self.hosts.contains(&host_id)
    }

    /// Member host ids in ascending order
    pub fn hosts(&self) -> impl Iterator<Item = HostId> + '_ {
        self.hosts.iter().copied()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub(crate) fn set_proxy(&mut self, proxy_id: Option<ProxyId>) {
        self.proxy_id = proxy_id;
    }

    pub(crate) fn insert_host(&mut self, host_id: HostId) -> bool {
        self.hosts.insert(host_id)
    }

    pub(crate) fn remove_host(&mut self, host_id: HostId) -> bool {
        self.hosts.remove(&host_id)
    }

    pub(crate) fn take_hosts(&mut self) -> BTreeSet<HostId> {
        std::mem::take(&mut self.hosts)
    }
}

/// Monitoring proxy as seen by the group manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    id: ProxyId,
    /// Unix time of the last full resync countdown restart
    pub sync_time: i64,
    /// Revision the proxy last reported as applied
    pub remote_hostmap_revision: Revision,
    deleted_group_hosts: Vec<DeletedHost>,
}

impl Proxy {
    /// Create a proxy that has never synced, so its first sync is FULL.
    pub fn new(id: ProxyId) -> Self {
        Self {
            id,
            sync_time: 0,
            remote_hostmap_revision: 0,
            deleted_group_hosts: Vec::new(),
        }
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    /// Pending deletions in the order they were recorded
    pub fn deleted_group_hosts(&self) -> &[DeletedHost] {
        &self.deleted_group_hosts
    }

    /// Host ids of pending deletions in log order
    pub fn deleted_host_ids(&self) -> Vec<HostId> {
        self.deleted_group_hosts.iter().map(|d| d.host_id).collect()
    }

    pub(crate) fn log_deletion(&mut self, host_id: HostId, revision: Revision) {
        self.deleted_group_hosts
            .push(DeletedHost::new(host_id, revision));
    }

    /// Drop every entry the proxy has already incorporated; returns the
    /// number of entries removed.
    pub fn prune_deleted(&mut self, known_revision: Revision) -> usize {
        let before = self.deleted_group_hosts.len();
        self.deleted_group_hosts
            .retain(|entry| entry.revision > known_revision);
        before - self.deleted_group_hosts.len()
    }

    /// Discard the whole deletion log.
    pub fn clear_deleted(&mut self) {
        self.deleted_group_hosts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_proxy_never_synced() {
        let proxy = Proxy::new(9);
        assert_eq!(proxy.id(), 9);
        assert_eq!(proxy.sync_time, 0);
        assert!(proxy.deleted_group_hosts().is_empty());
    }

    #[test]
    fn test_prune_keeps_newer_entries_in_order() {
        let mut proxy = Proxy::new(1);
        proxy.log_deletion(5, 3);
        proxy.log_deletion(6, 4);
        proxy.log_deletion(7, 5);
        proxy.log_deletion(8, 4);

        let removed = proxy.prune_deleted(4);

        assert_eq!(removed, 3);
        assert_eq!(proxy.deleted_group_hosts(), &[DeletedHost::new(7, 5)]);
    }

    #[test]
    fn test_clear_deleted() {
        let mut proxy = Proxy::new(1);
        proxy.log_deletion(5, 3);
        proxy.clear_deleted();
        assert!(proxy.deleted_host_ids().is_empty());
    }

    #[test]
    fn test_group_membership() {
        let mut group = Group::new(3, Some(9));
        assert!(group.insert_host(42));
        assert!(!group.insert_host(42));
        assert!(group.contains(42));
        assert!(group.remove_host(42));
        assert!(!group.remove_host(42));
        assert_eq!(group.host_count(), 0);
    }
}
