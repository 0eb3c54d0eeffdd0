//! Service configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{MAX_PARTIAL_HOSTS, SYNC_RESPONSE_HEADER};

/// Default IPC socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/pgmanager.sock";

/// Interval after which a proxy is forced into a full resync (one day)
pub const FULL_RESYNC_INTERVAL: Duration = Duration::from_secs(86_400);

/// Default bound on a single blocking receive in the service loop
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default maximum IPC frame payload (16MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for the proxy group service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Unix socket the IPC server listens on
    pub socket_path: PathBuf,

    /// Upper bound for one receive on the inbox before re-checking for shutdown
    pub poll_timeout: Duration,

    /// Age of the last full resync after which FULL mode is forced
    pub full_resync_interval: Duration,

    /// Capacity of the inbound message queue
    pub inbox_capacity: usize,

    /// Largest accepted frame payload
    pub max_frame_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            full_resync_interval: FULL_RESYNC_INTERVAL,
            inbox_capacity: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServiceConfig {
    /// Create a config listening on the given socket, defaults elsewhere
    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Reject settings the service loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout.is_zero() {
            return Err(Error::Config("poll timeout must be non-zero".to_string()));
        }
        if self.full_resync_interval.is_zero() {
            return Err(Error::Config(
                "full resync interval must be non-zero".to_string(),
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(Error::Config("inbox capacity must be non-zero".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(Error::Config("max frame size must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Most deleted host ids a PARTIAL reply may carry within `max_frame_size`
    pub fn max_partial_hosts(&self) -> usize {
        let room = self.max_frame_size.saturating_sub(SYNC_RESPONSE_HEADER) / 8;
        room.min(MAX_PARTIAL_HOSTS)
    }

    /// Full resync interval in whole seconds, as compared against sync timestamps
    pub fn full_resync_secs(&self) -> i64 {
        self.full_resync_interval.as_secs() as i64
    }
}

// =============================================================================
// Tests
// =============================================================================
