//! Infrastructure implementation of the `SnapshotStore` port.
//!
//! `FsSnapshotStore` reads `agent.yaml` from the agent root and watches for
//! a staged replacement in `.pending/agent.yaml`. All file access runs via
//! `tokio::task::spawn_blocking`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::application::ports::SnapshotStore;
use crate::domain::{AgentSnapshot, SnapshotVersion};
use crate::infra::fs::{AgentRoot, remove_if_exists};

pub struct FsSnapshotStore {
    root: AgentRoot,
}

impl FsSnapshotStore {
    #[must_use]
    pub fn new(root: AgentRoot) -> Self {
        Self { root }
    }

    fn load_sync(root: &AgentRoot) -> Result<AgentSnapshot> {
        read_snapshot(&root.snapshot_file())
    }

    /// Newest parseable candidate strictly newer than `current`.
    fn check_sync(root: &AgentRoot, current: &SnapshotVersion) -> Option<AgentSnapshot> {
        [root.staged_snapshot_file(), root.snapshot_file()]
            .iter()
            .filter(|path| path.exists())
            .filter_map(|path| match read_snapshot(path) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{e:#}"), "ignoring snapshot");
                    None
                }
            })
            .filter(|snapshot| snapshot.version > *current)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    fn promote_sync(root: &AgentRoot) -> Result<bool> {
        let staged = root.staged_snapshot_file();
        if !staged.exists() {
            return Ok(false);
        }
        let candidate = match read_snapshot(&staged) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %staged.display(), error = %format!("{e:#}"), "not promoting staged snapshot");
                return Ok(false);
            }
        };
        let active = root.snapshot_file();
        if let Ok(current) = read_snapshot(&active) {
            if current.version >= candidate.version {
                warn!(
                    staged = %candidate.version,
                    active = %current.version,
                    "discarding stale staged snapshot"
                );
                remove_if_exists(&staged)?;
                remove_pending_dir(&staged);
                return Ok(false);
            }
        }
        std::fs::rename(&staged, &active).with_context(|| {
            format!("promoting {} to {}", staged.display(), active.display())
        })?;
        remove_pending_dir(&staged);
        Ok(true)
    }
}

impl SnapshotStore for FsSnapshotStore {
    async fn load(&self) -> Result<AgentSnapshot> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::load_sync(&root))
            .await
            .context("snapshot load task panicked")?
    }

    async fn check_for_update(&self, current: &SnapshotVersion) -> Result<Option<AgentSnapshot>> {
        let root = self.root.clone();
        let current = current.clone();
        tokio::task::spawn_blocking(move || Self::check_sync(&root, &current))
            .await
            .context("snapshot check task panicked")
    }

    async fn promote_staged(&self) -> Result<bool> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::promote_sync(&root))
            .await
            .context("snapshot promote task panicked")?
    }
}

/// Remove the staging directory once it is empty.
fn remove_pending_dir(staged: &Path) {
    let Some(pending) = staged.parent() else {
        return;
    };
    match std::fs::remove_dir(pending) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %pending.display(), error = %e, "keeping staging directory"),
    }
}

fn read_snapshot(path: &Path) -> Result<AgentSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    AgentSnapshot::from_yaml(&text).with_context(|| format!("loading snapshot {}", path.display()))
}
