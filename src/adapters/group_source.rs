//! Group Source Adapters
//!
//! Implementations of the `GroupSource` port: a fixed in-memory snapshot and
//! a YAML/JSON file re-read on every refresh.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::ports::{GroupSnapshot, GroupSource};
use crate::error::{Error, Result};

/// Snapshot held in memory and replaced explicitly.
#[derive(Debug, Default)]
pub struct StaticGroupSource {
    snapshot: RwLock<GroupSnapshot>,
}

impl StaticGroupSource {
    pub fn new(snapshot: GroupSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Replace the snapshot returned by subsequent refreshes.
    pub fn set(&self, snapshot: GroupSnapshot) {
        *self.snapshot.write() = snapshot;
    }
}

#[async_trait]
impl GroupSource for StaticGroupSource {
    async fn snapshot(&self) -> Result<GroupSnapshot> {
        Ok(self.snapshot.read().clone())
    }
}

/// Snapshot loaded from a YAML or JSON file.
#[derive(Debug, Clone)]
pub struct FileGroupSource {
    path: PathBuf,
}

impl FileGroupSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl GroupSource for FileGroupSource {
    async fn snapshot(&self) -> Result<GroupSnapshot> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Snapshot(format!("cannot read {}: {}", self.path.display(), e)))?;

        let snapshot = parse_snapshot(&self.path, &raw)?;
        debug!(
            path = %self.path.display(),
            revision = snapshot.revision,
            groups = snapshot.groups.len(),
            "Loaded group snapshot"
        );
        Ok(snapshot)
    }
}

/// Parse a snapshot, choosing JSON for `.json` files and YAML otherwise.
pub fn parse_snapshot(path: &Path, raw: &str) -> Result<GroupSnapshot> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(raw)
            .map_err(|e| Error::Snapshot(format!("invalid JSON in {}: {}", path.display(), e)))
    } else {
        serde_yaml::from_str(raw)
            .map_err(|e| Error::Snapshot(format!("invalid YAML in {}: {}", path.display(), e)))
    }
}
