//! Sync Protocol Handler
//!
//! Decides whether a proxy needs a full, partial or no resync and builds the
//! reply, all within one cache lock scope.

use tracing::{debug, warn};

use crate::cache::PgCache;
use crate::protocol::{SyncRequest, SyncResponse, MAX_PARTIAL_HOSTS};

/// Answer a proxy sync request at time `now` (unix seconds).
///
/// A proxy whose last resync countdown started `full_resync_secs` or more ago
/// gets FULL and its deletion log is discarded. Otherwise the log is pruned of
/// everything at or below `known_revision` and the remainder is sent as
/// PARTIAL. Whenever the proxy reports a revision different from the one it
/// reported last, the countdown restarts.
pub fn proxy_sync_data(
    cache: &PgCache,
    request: SyncRequest,
    now: i64,
    full_resync_secs: i64,
) -> SyncResponse {
    proxy_sync_data_within(cache, request, now, full_resync_secs, MAX_PARTIAL_HOSTS)
}

/// Like [`proxy_sync_data`], but a PARTIAL reply carries at most
/// `max_deleted_hosts` ids. A longer deletion log is discarded and the proxy
/// gets FULL instead.
pub fn proxy_sync_data_within(
    cache: &PgCache,
    request: SyncRequest,
    now: i64,
    full_resync_secs: i64,
    max_deleted_hosts: usize,
) -> SyncResponse {
    let max_deleted_hosts = max_deleted_hosts.min(MAX_PARTIAL_HOSTS);
    let mut guard = cache.lock();
    let hpmap_revision = guard.hpmap_revision();

    let Some(proxy) = guard.lookup_proxy_mut(request.proxy_id) else {
        debug!(proxy_id = request.proxy_id, "Sync requested by unknown proxy");
        return SyncResponse::None { hpmap_revision };
    };

    let response = if now - proxy.sync_time >= full_resync_secs {
        proxy.clear_deleted();
        SyncResponse::Full { hpmap_revision }
    } else {
        let pruned = proxy.prune_deleted(request.known_revision);
        if pruned > 0 {
            debug!(proxy_id = request.proxy_id, pruned, "Pruned acknowledged host deletions");
        }

        let pending = proxy.deleted_group_hosts().len();
        if pending > max_deleted_hosts {
            warn!(
                proxy_id = request.proxy_id,
                pending,
                limit = max_deleted_hosts,
                "Deletion log does not fit one reply, forcing full resync"
            );
            proxy.clear_deleted();
            SyncResponse::Full { hpmap_revision }
        } else {
            SyncResponse::Partial {
                hpmap_revision,
                deleted_hosts: proxy.deleted_host_ids(),
            }
        }
    };

    if proxy.remote_hostmap_revision != request.known_revision {
        proxy.sync_time = now;
        proxy.remote_hostmap_revision = request.known_revision;
    }

    response
}

// =============================================================================
// Tests
// =============================================================================
