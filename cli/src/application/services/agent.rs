//! Application service — agent instance lifecycle.
//!
//! An [`Agent`] is bound to exactly one snapshot and owns the resources
//! acquired for it. Resources are released in reverse acquisition order by
//! [`Agent::close`], or by `Drop` on any other exit path.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::application::ports::{Resource, ResourceProvider};
use crate::domain::{AgentError, AgentSnapshot, SnapshotVersion};

pub struct Agent {
    snapshot: Arc<AgentSnapshot>,
    resources: Vec<Box<dyn Resource>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("version", &self.snapshot.version)
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl Agent {
    /// Open an instance for `snapshot`, acquiring its resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the resources cannot be acquired, for example
    /// [`AgentError::AlreadyRunning`] when another instance holds the node.
    pub fn open(provider: &impl ResourceProvider, snapshot: Arc<AgentSnapshot>) -> Result<Self> {
        let resources = provider.acquire(&snapshot)?;
        debug!(
            version = %snapshot.version,
            resources = resources.len(),
            "agent instance opened"
        );
        Ok(Self { snapshot, resources })
    }

    #[must_use]
    pub fn snapshot(&self) -> &Arc<AgentSnapshot> {
        &self.snapshot
    }

    #[must_use]
    pub fn version(&self) -> &SnapshotVersion {
        &self.snapshot.version
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Release every resource, even when some releases fail.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Teardown`] listing every failed release.
    pub fn close(mut self) -> Result<()> {
        let errors = release_all(&mut self.resources);
        debug!(version = %self.snapshot.version, "agent instance closed");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Teardown { errors }.into())
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if self.resources.is_empty() {
            return;
        }
        for error in release_all(&mut self.resources) {
            warn!(version = %self.snapshot.version, %error, "resource release failed");
        }
    }
}

fn release_all(resources: &mut Vec<Box<dyn Resource>>) -> Vec<String> {
    let mut errors = Vec::new();
    while let Some(mut resource) = resources.pop() {
        if let Err(e) = resource.release() {
            errors.push(format!("{}: {e:#}", resource.name()));
        }
    }
    errors
}
