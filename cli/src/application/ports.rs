//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` — never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::path::Path;
use std::process::Output;

use anyhow::Result;

use crate::domain::{
    ActionFailure, AgentSnapshot, ConvergenceMode, DeltaItem, RealizedState, ReloadSignal,
    SnapshotVersion,
};

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: std::time::Duration,
    ) -> Result<Output>;
}

// ── Node Driver Port ──────────────────────────────────────────────────────────

/// Result of a corrective action that did not fail.
#[derive(Debug)]
pub enum ActionStatus {
    Applied,
    /// The action found that the snapshot itself must be re-derived.
    Reload(ReloadSignal),
}

/// Observes and mutates the node an agent manages.
///
/// Implementations must not block indefinitely; the engine bounds every
/// call with a timeout and treats an elapsed timeout as retryable.
#[allow(async_fn_in_trait)]
pub trait NodeDriver {
    /// Observe the parts of the node that `mode` covers.
    async fn observe(
        &self,
        snapshot: &AgentSnapshot,
        mode: ConvergenceMode,
    ) -> Result<RealizedState, ActionFailure>;
    /// Apply one corrective action.
    async fn apply(
        &self,
        snapshot: &AgentSnapshot,
        item: &DeltaItem,
    ) -> Result<ActionStatus, ActionFailure>;
}

// ── Snapshot Store Port ───────────────────────────────────────────────────────

/// Source of agent snapshots for one agent root.
#[allow(async_fn_in_trait)]
pub trait SnapshotStore {
    /// Load the active snapshot.
    async fn load(&self) -> Result<AgentSnapshot>;
    /// Return the newest snapshot available with a version strictly newer
    /// than `current`, if any. Unparseable candidates are ignored.
    async fn check_for_update(&self, current: &SnapshotVersion) -> Result<Option<AgentSnapshot>>;
    /// Make a staged snapshot the active one. Returns `false` when nothing
    /// was staged or the staged snapshot is not newer than the active one,
    /// in which case it is discarded.
    async fn promote_staged(&self) -> Result<bool>;
}

// ── Resource Ports ────────────────────────────────────────────────────────────

/// Something an agent instance owns and must give back on teardown.
pub trait Resource: Send {
    fn name(&self) -> &str;
    /// Release the resource. Called at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying release operation fails.
    fn release(&mut self) -> Result<()>;
}

/// Hands out the resources of a new agent instance.
pub trait ResourceProvider {
    /// Acquire every resource for `snapshot`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource cannot be acquired; resources
    /// acquired before the failure are released first.
    fn acquire(&self, snapshot: &AgentSnapshot) -> Result<Vec<Box<dyn Resource>>>;
}

// ── Packager Port ─────────────────────────────────────────────────────────────

/// Unpacks agent packages produced by the registry.
#[allow(async_fn_in_trait)]
pub trait AgentPackager {
    /// Extract `package` into the agent root `root`.
    async fn extract_agent_package(&self, package: &Path, root: &Path) -> Result<()>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait — no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}
