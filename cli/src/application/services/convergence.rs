//! Application service — convergence engine.
//!
//! Drives a node towards the desired state of a snapshot in rounds:
//! observe, diff, apply the highest-priority batch, repeat. Every external
//! call is bounded by a timeout derived from the remaining time to the
//! deadline, and the snapshot store is consulted before every corrective
//! action so that a reload interrupts a round between two actions.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uvn_common::AgentSettings;

use crate::application::ports::{ActionStatus, NodeDriver, SnapshotStore};
use crate::domain::{
    ActionFailure, AgentError, AgentSnapshot, ConvergenceMode, DeltaItem, DesiredState, Outcome,
    RealizedState, ReloadSignal, RetryPolicy, compute_delta, next_batch,
};

/// Timing parameters of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Upper bound for one observation or corrective action.
    pub action_timeout: Duration,
    /// Idle time between rounds in [`ConvergenceEngine::spin`].
    pub spin_interval: Duration,
    /// Deadline of each round in [`ConvergenceEngine::spin`].
    pub round_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default())
    }
}

impl EngineConfig {
    #[must_use]
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            retry: RetryPolicy::from_settings(settings),
            action_timeout: settings.action_timeout(),
            spin_interval: settings.spin_interval(),
            round_budget: settings.round_budget(),
        }
    }
}

/// Result of a convergence call that was not interrupted by a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// The node matches the snapshot.
    Consistent { rounds: u32, actions: u32 },
    /// The deadline passed first; `outstanding` is the last known delta.
    TimedOut { outstanding: Vec<DeltaItem> },
}

impl Convergence {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent { .. })
    }
}

/// Interval between reload checks while [`ConvergenceEngine::spin`] idles.
const IDLE_RELOAD_POLL: Duration = Duration::from_secs(1);

/// Stand-in for a deadline too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `budget` from now, saturating instead of overflowing.
#[must_use]
pub fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget).unwrap_or(now + FAR_FUTURE)
}

/// Outcome of one bounded attempt loop.
enum Attempt<T> {
    Ok(T),
    DeadlineReached,
}

pub struct ConvergenceEngine<'a, N, S> {
    node: &'a N,
    store: &'a S,
    config: EngineConfig,
}

impl<'a, N: NodeDriver, S: SnapshotStore> ConvergenceEngine<'a, N, S> {
    pub fn new(node: &'a N, store: &'a S, config: EngineConfig) -> Self {
        Self { node, store, config }
    }

    /// Drive the node towards `snapshot` until it is consistent, the
    /// deadline passes, or a reload is requested.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::FatalCorrectiveFailure`] when an action fails
    /// permanently or exhausts its retries, and propagates snapshot store
    /// errors.
    pub async fn converge(
        &self,
        snapshot: &AgentSnapshot,
        mode: ConvergenceMode,
        deadline: Instant,
    ) -> Result<Outcome<Convergence>> {
        let node = self.node;
        let desired = DesiredState::from_snapshot(snapshot);
        let mut outstanding: Option<Vec<DeltaItem>> = None;
        let mut rounds = 0_u32;
        let mut actions = 0_u32;

        loop {
            if Instant::now() >= deadline {
                return Ok(Outcome::Done(timed_out(&desired, mode, outstanding)));
            }
            if let Some(signal) = self.check_reload(snapshot).await? {
                return Ok(Outcome::Reload(signal));
            }

            rounds += 1;
            let realized = match self
                .attempt("observe node state", deadline, move || node.observe(snapshot, mode))
                .await?
            {
                Attempt::Ok(realized) => realized,
                Attempt::DeadlineReached => {
                    return Ok(Outcome::Done(timed_out(&desired, mode, outstanding)));
                }
            };

            let delta = compute_delta(&desired, &realized, mode);
            if delta.is_empty() {
                debug!(version = %snapshot.version, %mode, rounds, actions, "node is consistent");
                return Ok(Outcome::Done(Convergence::Consistent { rounds, actions }));
            }
            debug!(
                version = %snapshot.version,
                round = rounds,
                outstanding = delta.len(),
                "convergence round"
            );

            let batch = next_batch(&delta);
            for (index, item) in batch.iter().enumerate() {
                if let Some(signal) = self.check_reload(snapshot).await? {
                    return Ok(Outcome::Reload(signal));
                }
                let label = item.to_string();
                match self
                    .attempt(&label, deadline, move || node.apply(snapshot, item))
                    .await?
                {
                    Attempt::Ok(ActionStatus::Applied) => {
                        actions += 1;
                        info!(version = %snapshot.version, action = %item, "applied");
                    }
                    Attempt::Ok(ActionStatus::Reload(signal)) => {
                        info!(
                            version = %snapshot.version,
                            action = %item,
                            reason = %signal.reason,
                            "action requested reload"
                        );
                        return Ok(Outcome::Reload(signal));
                    }
                    Attempt::DeadlineReached => {
                        let outstanding = delta[index..].to_vec();
                        return Ok(Outcome::Done(Convergence::TimedOut { outstanding }));
                    }
                }
            }
            outstanding = Some(delta[batch.len()..].to_vec());
        }
    }

    /// Converge once with a deadline of `max_spin_time` from now.
    ///
    /// # Errors
    ///
    /// See [`ConvergenceEngine::converge`].
    pub async fn spin_until_consistent(
        &self,
        snapshot: &AgentSnapshot,
        max_spin_time: Duration,
        config_only: bool,
    ) -> Result<Outcome<Convergence>> {
        let mode = if config_only {
            ConvergenceMode::ConfigOnly
        } else {
            ConvergenceMode::Full
        };
        self.converge(snapshot, mode, deadline_after(max_spin_time))
            .await
    }

    /// Keep the node converged until `stop` flips to `true` or its sender
    /// goes away. The store is polled for reloads while idling between
    /// rounds.
    ///
    /// # Errors
    ///
    /// See [`ConvergenceEngine::converge`].
    pub async fn spin(
        &self,
        snapshot: &AgentSnapshot,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Outcome<()>> {
        loop {
            if *stop.borrow() {
                return Ok(Outcome::Done(()));
            }
            let deadline = deadline_after(self.config.round_budget);
            match self.converge(snapshot, ConvergenceMode::Full, deadline).await? {
                Outcome::Reload(signal) => return Ok(Outcome::Reload(signal)),
                Outcome::Done(Convergence::TimedOut { outstanding }) => {
                    warn!(
                        version = %snapshot.version,
                        outstanding = outstanding.len(),
                        "round budget exhausted before the node was consistent"
                    );
                }
                Outcome::Done(Convergence::Consistent { .. }) => {}
            }

            let idle_until = deadline_after(self.config.spin_interval);
            loop {
                let wake = idle_until.min(deadline_after(IDLE_RELOAD_POLL));
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            return Ok(Outcome::Done(()));
                        }
                    }
                    () = tokio::time::sleep_until(wake) => {}
                }
                if Instant::now() >= idle_until {
                    break;
                }
                if let Some(signal) = self.check_reload(snapshot).await? {
                    return Ok(Outcome::Reload(signal));
                }
            }
        }
    }

    async fn check_reload(&self, snapshot: &AgentSnapshot) -> Result<Option<ReloadSignal>> {
        let Some(newer) = self.store.check_for_update(&snapshot.version).await? else {
            return Ok(None);
        };
        info!(
            version = %snapshot.version,
            next = %newer.version,
            "newer snapshot available"
        );
        let reason = format!("snapshot {} replaces {}", newer.version, snapshot.version);
        Ok(Some(ReloadSignal::with_snapshot(reason, newer)))
    }

    /// Run `op` with the retry policy, a per-attempt timeout, and the
    /// overall deadline.
    async fn attempt<T, F, Fut>(&self, label: &str, deadline: Instant, mut op: F) -> Result<Attempt<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionFailure>>,
    {
        let mut attempt = 1_u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Attempt::DeadlineReached);
            }
            let limit = self.config.action_timeout.min(remaining);
            let reason = match tokio::time::timeout(limit, op()).await {
                Ok(Ok(value)) => return Ok(Attempt::Ok(value)),
                Ok(Err(ActionFailure::Fatal(reason))) => {
                    return Err(fatal(label, attempt, reason));
                }
                Ok(Err(ActionFailure::Retryable(reason))) => reason,
                Err(_) => format!("timed out after {}ms", limit.as_millis()),
            };

            if Instant::now() >= deadline {
                return Ok(Attempt::DeadlineReached);
            }
            if !self.config.retry.allows(attempt + 1) {
                return Err(fatal(label, attempt, reason));
            }
            let delay = self
                .config
                .retry
                .backoff(attempt)
                .min(deadline.saturating_duration_since(Instant::now()));
            warn!(
                action = label,
                attempt,
                error = %reason,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "action failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn fatal(label: &str, attempts: u32, reason: String) -> anyhow::Error {
    AgentError::FatalCorrectiveFailure {
        item: label.to_owned(),
        attempts,
        reason,
    }
    .into()
}

fn timed_out(
    desired: &DesiredState,
    mode: ConvergenceMode,
    outstanding: Option<Vec<DeltaItem>>,
) -> Convergence {
    let outstanding =
        outstanding.unwrap_or_else(|| compute_delta(desired, &RealizedState::default(), mode));
    Convergence::TimedOut { outstanding }
}
