//! Filesystem infrastructure — agent root layout and raw file ops.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Default agent root on a cell.
pub const DEFAULT_ROOT: &str = "/var/lib/uvn-agent";

/// On-disk layout of an agent root.
///
/// ```text
/// <root>/agent.yaml            active snapshot
/// <root>/.pending/agent.yaml   staged snapshot, promoted on reload
/// <root>/keys/                 package key material (0700)
/// <root>/peers/*.pub           installed peer public keys
/// <root>/vpn/*.conf            tunnel configuration files
/// <root>/run/agent.lock        instance lock
/// <root>/run/agent.status.json instance status
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoot {
    root: PathBuf,
}

impl AgentRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join("agent.yaml")
    }

    #[must_use]
    pub fn staged_snapshot_file(&self) -> PathBuf {
        self.root.join(".pending").join("agent.yaml")
    }

    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    #[must_use]
    pub fn peers_dir(&self) -> PathBuf {
        self.root.join("peers")
    }

    #[must_use]
    pub fn vpn_dir(&self) -> PathBuf {
        self.root.join("vpn")
    }

    #[must_use]
    pub fn config_file(&self, interface: &str) -> PathBuf {
        self.vpn_dir().join(format!("{interface}.conf"))
    }

    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.run_dir().join("agent.lock")
    }

    #[must_use]
    pub fn status_file(&self) -> PathBuf {
        self.run_dir().join("agent.status.json")
    }
}

/// Write `contents` to `path` through a temp file and a rename, creating
/// the parent directory if needed.
///
/// # Errors
///
/// Returns an error if any filesystem operation fails.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    std::fs::write(&temp, contents)
        .with_context(|| format!("writing temp file {}", temp.display()))?;
    set_mode(&temp, mode)?;
    std::fs::rename(&temp, path).with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}

/// Remove a file; a missing file is not an error.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

/// Set unix permission bits; a no-op elsewhere.
///
/// # Errors
///
/// Returns an error if the permissions cannot be changed.
#[allow(unused_variables)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }
    Ok(())
}
