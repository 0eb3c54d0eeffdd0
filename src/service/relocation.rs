//! Relocation Handler
//!
//! Applies a batch of host moves to the cache under a single lock scope.

use tracing::{debug, trace};

use crate::cache::PgCache;
use crate::domain::{GroupSnapshot, Revision};
use crate::protocol::HostRelocation;

/// Result of applying one relocation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationOutcome {
    /// Triples in the batch
    pub relocations: usize,
    /// Removals and additions that changed membership
    pub changes: usize,
    /// Revision after the batch (and after the preceding group refresh)
    pub hpmap_revision: Revision,
    /// Group refresh applied a new configuration revision
    pub groups_refreshed: bool,
}

impl RelocationOutcome {
    /// Whether this batch committed a new revision
    pub fn bumped(&self) -> bool {
        self.changes > 0
    }
}

/// Apply a relocation batch.
///
/// Groups are refreshed from `snapshot` first (when one is available) so the
/// moves apply against current group definitions. Triples are applied in
/// order; unknown groups are skipped. The revision is bumped once at the end
/// if anything changed.
pub fn apply_relocations(
    cache: &PgCache,
    snapshot: Option<&GroupSnapshot>,
    relocations: &[HostRelocation],
) -> RelocationOutcome {
    let mut guard = cache.lock();

    let groups_refreshed = snapshot
        .map(|snapshot| guard.refresh_groups(snapshot).applied)
        .unwrap_or(false);

    let mut changes = 0;

    for relocation in relocations {
        if let Some(source) = relocation.source() {
            if guard.lookup_group(source).is_none() {
                trace!(host_id = relocation.host_id, group_id = source, "Unknown source group");
            } else if guard.remove_host_from_group(source, relocation.host_id) {
                changes += 1;
            }
        }

        if let Some(dest) = relocation.dest() {
            if guard.lookup_group(dest).is_none() {
                trace!(host_id = relocation.host_id, group_id = dest, "Unknown destination group");
            } else if guard.add_host_to_group(dest, relocation.host_id) {
                changes += 1;
            }
        }
    }

    let hpmap_revision = if changes > 0 {
        guard.bump_revision()
    } else {
        guard.hpmap_revision()
    };

    drop(guard);

    debug!(
        relocations = relocations.len(),
        changes, hpmap_revision, "Applied host relocation batch"
    );

    RelocationOutcome {
        relocations: relocations.len(),
        changes,
        hpmap_revision,
        groups_refreshed,
    }
}

// =============================================================================
// Tests
// =============================================================================
