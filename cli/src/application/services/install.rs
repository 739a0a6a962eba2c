//! Application service — agent package installation.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! Extraction happens once, before the first agent instance is opened;
//! failures are reported and never retried.

use std::path::Path;

use anyhow::{Context, Result};

use crate::application::ports::{AgentPackager, ProgressReporter, SnapshotStore};
use crate::domain::AgentSnapshot;

/// Extract `package` into `root` and validate the snapshot it contains.
///
/// # Errors
///
/// Returns an error if extraction fails or the extracted snapshot does not
/// load.
pub async fn install_agent(
    packager: &impl AgentPackager,
    store: &impl SnapshotStore,
    reporter: &impl ProgressReporter,
    package: &Path,
    root: &Path,
) -> Result<AgentSnapshot> {
    reporter.step(&format!("extracting {}", package.display()));
    packager
        .extract_agent_package(package, root)
        .await
        .with_context(|| format!("extracting agent package {}", package.display()))?;

    let snapshot = store
        .load()
        .await
        .context("extracted package does not contain a valid agent snapshot")?;
    reporter.success(&format!(
        "installed cell {} of uvn {} ({})",
        snapshot.cell, snapshot.uvn.name, snapshot.version
    ));
    Ok(snapshot)
}
