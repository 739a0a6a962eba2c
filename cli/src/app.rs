//! Application context — unified state passed to every command handler.
//!
//! `AppContext` owns the output context, the agent root, and the agent
//! settings, and builds the infrastructure adapters the commands wire into
//! application services.

use std::path::PathBuf;

use anyhow::{Context, Result};
use uvn_common::AgentSettings;

use crate::application::services::convergence::EngineConfig;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::fs::AgentRoot;
use crate::infra::node::LinuxNode;
use crate::infra::packager::TarPackager;
use crate::infra::resources::LocalResources;
use crate::infra::snapshot_store::FsSnapshotStore;
use crate::output::OutputContext;

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    pub output: OutputFlags,
    /// Agent root directory.
    pub root: PathBuf,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    pub root: AgentRoot,
    /// Engine tunables from `UVN_AGENT_*`.
    pub settings: AgentSettings,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the `UVN_AGENT_*` environment is invalid.
    pub fn new(flags: &AppFlags) -> Result<Self> {
        let settings = AgentSettings::from_env()
            .context("invalid agent settings in UVN_AGENT_* environment variables")?;
        tracing::debug!(?settings, root = %flags.root.display(), "agent context");
        Ok(Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            root: AgentRoot::new(&flags.root),
            settings,
        })
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::from_settings(&self.settings)
    }

    #[must_use]
    pub fn node(&self) -> LinuxNode<TokioCommandRunner> {
        LinuxNode::new(
            self.root.clone(),
            TokioCommandRunner::new(self.settings.action_timeout()),
        )
    }

    #[must_use]
    pub fn store(&self) -> FsSnapshotStore {
        FsSnapshotStore::new(self.root.clone())
    }

    #[must_use]
    pub fn resources(&self) -> LocalResources {
        LocalResources::new(self.root.clone())
    }

    #[must_use]
    pub fn packager(&self) -> TarPackager<TokioCommandRunner> {
        TarPackager::new(TokioCommandRunner::default())
    }
}
