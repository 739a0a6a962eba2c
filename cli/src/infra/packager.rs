//! Infrastructure implementation of the `AgentPackager` port.
//!
//! Packages are `.tar.xz` archives holding `agent.yaml` and a `keys/`
//! directory, either at the top level or inside a single top-level
//! directory. They are unpacked with the system `tar` into a temporary
//! directory and copied into the agent root with fixed permissions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::ports::{AgentPackager, CommandRunner};
use crate::infra::fs::{AgentRoot, set_mode};

/// Extraction of large packages on slow disks can take a while.
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct TarPackager<R> {
    runner: R,
}

impl<R: CommandRunner> TarPackager<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> AgentPackager for TarPackager<R> {
    async fn extract_agent_package(&self, package: &Path, root: &Path) -> Result<()> {
        anyhow::ensure!(package.is_file(), "package {} does not exist", package.display());
        let staging = tempfile::tempdir().context("creating extraction directory")?;

        let package_arg = package.to_string_lossy();
        let staging_arg = staging.path().to_string_lossy();
        let output = self
            .runner
            .run_with_timeout(
                "tar",
                &["xJf", &package_arg, "-C", &staging_arg],
                EXTRACT_TIMEOUT,
            )
            .await?;
        anyhow::ensure!(
            output.status.success(),
            "tar failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );

        let source = staging.path().to_owned();
        let root = AgentRoot::new(root);
        tokio::task::spawn_blocking(move || install_tree(&source, &root))
            .await
            .context("package install task panicked")?
    }
}

fn install_tree(staging: &Path, root: &AgentRoot) -> Result<()> {
    let source = locate_package_root(staging)?;
    std::fs::create_dir_all(root.path())
        .with_context(|| format!("creating agent root {}", root.path().display()))?;
    set_mode(root.path(), 0o755)?;

    let snapshot = root.snapshot_file();
    std::fs::copy(source.join("agent.yaml"), &snapshot)
        .with_context(|| format!("installing {}", snapshot.display()))?;
    set_mode(&snapshot, 0o644)?;

    let keys = source.join("keys");
    if keys.is_dir() {
        copy_private_dir(&keys, &root.keys_dir())?;
    }
    Ok(())
}

/// Directory of the extracted tree that holds `agent.yaml`.
fn locate_package_root(staging: &Path) -> Result<PathBuf> {
    if staging.join("agent.yaml").is_file() {
        return Ok(staging.to_owned());
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(staging).context("listing extracted package")? {
        let path = entry.context("listing extracted package")?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    match dirs.as_slice() {
        [single] if single.join("agent.yaml").is_file() => Ok(single.clone()),
        _ => anyhow::bail!("package does not contain agent.yaml"),
    }
}

/// Copy a directory tree; directories get 0700, files 0600.
fn copy_private_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).with_context(|| format!("creating {}", to.display()))?;
    set_mode(to, 0o700)?;
    for entry in std::fs::read_dir(from).with_context(|| format!("listing {}", from.display()))? {
        let entry = entry.with_context(|| format!("listing {}", from.display()))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_private_dir(&source, &target)?;
        } else {
            std::fs::copy(&source, &target)
                .with_context(|| format!("installing {}", target.display()))?;
            set_mode(&target, 0o600)?;
        }
    }
    Ok(())
}
