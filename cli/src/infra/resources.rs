//! Infrastructure implementation of the `ResourceProvider` port.
//!
//! Every agent instance holds the instance lock of its root and publishes a
//! status file for operators. Both are removed when the instance closes.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::ports::{Resource, ResourceProvider};
use crate::domain::{AgentError, AgentSnapshot};
use crate::infra::fs::{AgentRoot, remove_if_exists, write_atomic};

/// Contents of `run/agent.status.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub uvn: String,
    pub cell: String,
    pub version: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

pub struct LocalResources {
    root: AgentRoot,
}

impl LocalResources {
    #[must_use]
    pub fn new(root: AgentRoot) -> Self {
        Self { root }
    }
}

impl ResourceProvider for LocalResources {
    fn acquire(&self, snapshot: &AgentSnapshot) -> Result<Vec<Box<dyn Resource>>> {
        let mut lock = InstanceLock::acquire(self.root.lock_file())?;
        let status = AgentStatus {
            uvn: snapshot.uvn.name.clone(),
            cell: snapshot.cell.clone(),
            version: snapshot.version.to_string(),
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        match StatusFile::publish(self.root.status_file(), &status) {
            Ok(status) => Ok(vec![Box::new(lock), Box::new(status)]),
            Err(e) => {
                lock.release()?;
                Err(e)
            }
        }
    }
}

/// Exclusive ownership of an agent root.
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Create the lock file, failing if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::AlreadyRunning`] when another instance holds
    /// the lock.
    pub fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AgentError::AlreadyRunning { lock: path }.into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("creating lock file {}", path.display()));
            }
        };
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("writing lock file {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Resource for InstanceLock {
    fn name(&self) -> &str {
        "instance lock"
    }

    fn release(&mut self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

/// Status published for operators while an instance is open.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// # Errors
    ///
    /// Returns an error if the status file cannot be written.
    pub fn publish(path: PathBuf, status: &AgentStatus) -> Result<Self> {
        let json = serde_json::to_vec_pretty(status).context("serializing agent status")?;
        write_atomic(&path, &json, 0o644)?;
        Ok(Self { path })
    }
}

impl Resource for StatusFile {
    fn name(&self) -> &str {
        "status file"
    }

    fn release(&mut self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}
