//! Application service — agent runtime loop.
//!
//! Opens an agent instance, runs the requested action on it, and replaces
//! the instance whenever the action ends in a reload. The old instance is
//! always closed before the new one is opened.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::application::ports::{NodeDriver, ResourceProvider, SnapshotStore};
use crate::application::services::agent::Agent;
use crate::application::services::convergence::{
    Convergence, ConvergenceEngine, EngineConfig, deadline_after,
};
use crate::domain::{AgentError, ConvergenceMode, Outcome, ReloadSignal, SnapshotVersion};

/// Action requested from the agent.
#[derive(Debug, Clone)]
pub enum AgentAction {
    /// Converge once, bounded by `max_spin_time`.
    Sync {
        max_spin_time: Duration,
        config_only: bool,
    },
    /// Keep the node converged until `stop` flips to `true`.
    Run { stop: watch::Receiver<bool> },
    /// Pick up a newer snapshot, if any, and converge its configuration.
    Update,
}

impl AgentAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "sync",
            Self::Run { .. } => "run",
            Self::Update => "update",
        }
    }
}

/// What an action achieved on the last instance it ran on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Converged(Convergence),
    Stopped,
    Updated(Convergence),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub result: ActionResult,
    /// Number of reloads absorbed while the action ran.
    pub reloads: u32,
    /// Snapshot version of the instance that completed the action.
    pub version: SnapshotVersion,
}

pub struct Runtime<'a, N, S, P> {
    node: &'a N,
    store: &'a S,
    resources: &'a P,
    config: EngineConfig,
}

impl<'a, N, S, P> Runtime<'a, N, S, P>
where
    N: NodeDriver,
    S: SnapshotStore,
    P: ResourceProvider,
{
    pub fn new(node: &'a N, store: &'a S, resources: &'a P, config: EngineConfig) -> Self {
        Self {
            node,
            store,
            resources,
            config,
        }
    }

    /// Open an instance from the active snapshot of the agent root.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded or the instance
    /// resources cannot be acquired.
    pub async fn open(&self) -> Result<Agent> {
        let snapshot = self.store.load().await.context("loading agent snapshot")?;
        Agent::open(self.resources, Arc::new(snapshot))
    }

    /// Replace `old` with an instance built from `signal`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ReloadLoop`] if the replacement snapshot has
    /// the same version as `old`, and propagates teardown and open errors.
    pub async fn reload(&self, old: Agent, signal: ReloadSignal) -> Result<Agent> {
        let previous = old.version().clone();
        info!(version = %previous, reason = %signal.reason, "reloading agent");
        old.close()?;

        if self.store.promote_staged().await? {
            info!("promoted staged snapshot");
        }
        let snapshot = match signal.snapshot {
            Some(snapshot) => snapshot,
            None => Arc::new(self.store.load().await.context("reloading agent snapshot")?),
        };
        if snapshot.version == previous {
            return Err(AgentError::ReloadLoop {
                version: previous.to_string(),
            }
            .into());
        }
        Agent::open(self.resources, snapshot)
    }

    /// Run `action` to completion, absorbing any number of reloads.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the action, by a reload, or by the final
    /// teardown. The instance is closed on every path.
    pub async fn run(&self, action: &AgentAction) -> Result<ActionOutcome> {
        let mut agent = self.open().await?;
        let mut reloads = 0_u32;
        loop {
            let outcome = self.execute(&agent, action).await;
            match outcome {
                Ok(Outcome::Done(result)) => {
                    let version = agent.version().clone();
                    agent.close()?;
                    return Ok(ActionOutcome {
                        result,
                        reloads,
                        version,
                    });
                }
                Ok(Outcome::Reload(signal)) => {
                    agent = self.reload(agent, signal).await?;
                    reloads += 1;
                }
                Err(e) => {
                    if let Err(teardown) = agent.close() {
                        warn!(error = %format!("{teardown:#}"), "teardown after failure");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn execute(&self, agent: &Agent, action: &AgentAction) -> Result<Outcome<ActionResult>> {
        let engine = ConvergenceEngine::new(self.node, self.store, self.config);
        let snapshot = agent.snapshot();
        info!(version = %snapshot.version, action = action.name(), "running action");
        match action {
            AgentAction::Sync {
                max_spin_time,
                config_only,
            } => Ok(engine
                .spin_until_consistent(snapshot, *max_spin_time, *config_only)
                .await?
                .map(ActionResult::Converged)),
            AgentAction::Run { stop } => {
                let mut stop = stop.clone();
                Ok(engine
                    .spin(snapshot, &mut stop)
                    .await?
                    .map(|()| ActionResult::Stopped))
            }
            AgentAction::Update => {
                if let Some(newer) = self.store.check_for_update(&snapshot.version).await? {
                    let reason = format!("update to snapshot {}", newer.version);
                    return Ok(Outcome::Reload(ReloadSignal::with_snapshot(reason, newer)));
                }
                let deadline = deadline_after(self.config.round_budget);
                Ok(engine
                    .converge(snapshot, ConvergenceMode::ConfigOnly, deadline)
                    .await?
                    .map(ActionResult::Updated))
            }
        }
    }
}
