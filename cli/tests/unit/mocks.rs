//! Shared mock infrastructure for unit tests.
//!
//! Provides an in-memory node, a scripted snapshot store, and tracked
//! resources so each test file doesn't have to re-define the same
//! boilerplate.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use uvn_agent::application::ports::{
    ActionStatus, AgentPackager, NodeDriver, ProgressReporter, Resource, ResourceProvider,
    SnapshotStore,
};
use uvn_agent::application::services::convergence::EngineConfig;
use uvn_agent::domain::state::digest;
use uvn_agent::domain::{
    ActionFailure, AgentError, AgentSnapshot, ConvergenceMode, DeltaItem, DesiredState,
    RealizedState, ReloadSignal, RetryPolicy, SnapshotVersion,
};

// ── Snapshots ─────────────────────────────────────────────────────────────────

pub const SNAPSHOT: &str = r"
version:
  generation: 1
  registry_id: 9f2c
uvn:
  name: corp
  owner: { email: root@corp.io }
cell: gw1
cells:
  - name: gw1
    owner: { email: ops@corp.io }
    allowed_lans: [10.1.0.0/24]
  - name: gw2
    owner: { email: ops@corp.io }
    allowed_lans: [10.2.0.0/24, 10.3.0.0/24]
keys:
  - id: { key_type: ROOT, owner: root@corp.io, target: corp }
    public_key: ROOTKEY=
  - id: { key_type: CELL, owner: ops@corp.io, target: gw2 }
    public_key: GW2KEY=
links:
  - interface: uvn-b0
    peer: gw2
    address: 10.255.0.1/31
    endpoint: 203.0.113.7:63450
  - interface: uvn-root
    peer: corp
    address: 10.254.0.2/32
";

/// Snapshot at `generation`; generation 2 and later rotate the gw2 key.
pub fn snapshot(generation: u64) -> AgentSnapshot {
    let mut text = SNAPSHOT.replace("generation: 1", &format!("generation: {generation}"));
    if generation >= 2 {
        text = text.replace("GW2KEY=", &format!("GW2KEY{generation}="));
    }
    AgentSnapshot::from_yaml(&text).unwrap()
}

pub fn version(generation: u64) -> SnapshotVersion {
    snapshot(generation).version
}

/// A node state that already matches `snapshot`.
pub fn realized(snapshot: &AgentSnapshot) -> RealizedState {
    let desired = DesiredState::from_snapshot(snapshot);
    RealizedState {
        keys: desired.keys,
        configs: desired
            .configs
            .iter()
            .map(|(i, c)| (i.clone(), digest(c)))
            .collect(),
        routes: desired.routes,
        interfaces: desired.interfaces,
    }
}

/// Fast engine timings; tests run on a paused clock anyway.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        },
        action_timeout: Duration::from_secs(5),
        spin_interval: Duration::from_secs(5),
        round_budget: Duration::from_secs(30),
    }
}

pub fn fatal_failure(err: &anyhow::Error) -> Option<(String, u32)> {
    match err.downcast_ref::<AgentError>() {
        Some(AgentError::FatalCorrectiveFailure { item, attempts, .. }) => {
            Some((item.clone(), *attempts))
        }
        _ => None,
    }
}

// ── Mock: in-memory node ──────────────────────────────────────────────────────

/// Node whose state lives in memory. Applied actions change that state
/// unless a failure is scripted for the action's label.
#[derive(Default)]
pub struct MemoryNode {
    state: Mutex<RealizedState>,
    applied: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    observations: AtomicU32,
    retryable: Mutex<HashMap<String, u32>>,
    fatal: Mutex<HashSet<String>>,
    reload_on: Mutex<Option<(String, ReloadSignal)>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryNode {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_state(state: RealizedState) -> Self {
        let node = Self::default();
        *node.state.lock().unwrap() = state;
        node
    }

    /// Fail the first `times` attempts of `label` with a retryable error.
    pub fn flaky(self, label: &str, times: u32) -> Self {
        self.retryable.lock().unwrap().insert(label.to_owned(), times);
        self
    }

    /// Fail every attempt of `label` with a retryable error.
    pub fn always_failing(self, label: &str) -> Self {
        self.flaky(label, u32::MAX)
    }

    pub fn fatal_on(self, label: &str) -> Self {
        self.fatal.lock().unwrap().insert(label.to_owned());
        self
    }

    /// Answer the first attempt of `label` with a reload request.
    pub fn reload_on(self, label: &str, signal: ReloadSignal) -> Self {
        *self.reload_on.lock().unwrap() = Some((label.to_owned(), signal));
        self
    }

    /// Make every corrective action take `delay`.
    pub fn slow(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn attempts(&self, label: &str) -> u32 {
        self.attempts.lock().unwrap().get(label).copied().unwrap_or(0)
    }

    pub fn observations(&self) -> u32 {
        self.observations.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RealizedState {
        self.state.lock().unwrap().clone()
    }
}

impl NodeDriver for MemoryNode {
    async fn observe(
        &self,
        _snapshot: &AgentSnapshot,
        mode: ConvergenceMode,
    ) -> Result<RealizedState, ActionFailure> {
        self.observations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if mode == ConvergenceMode::ConfigOnly {
            state.routes.clear();
            state.interfaces.clear();
        }
        Ok(state)
    }

    async fn apply(
        &self,
        _snapshot: &AgentSnapshot,
        item: &DeltaItem,
    ) -> Result<ActionStatus, ActionFailure> {
        let label = item.to_string();
        *self.attempts.lock().unwrap().entry(label.clone()).or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fatal.lock().unwrap().contains(&label) {
            return Err(ActionFailure::Fatal(format!("{label}: permission denied")));
        }
        {
            let mut retryable = self.retryable.lock().unwrap();
            if let Some(left) = retryable.get_mut(&label) {
                if *left > 0 {
                    *left = left.saturating_sub(1);
                    return Err(ActionFailure::Retryable(format!("{label}: busy")));
                }
            }
        }
        {
            let mut reload_on = self.reload_on.lock().unwrap();
            if reload_on.as_ref().is_some_and(|(l, _)| *l == label) {
                let (_, signal) = reload_on.take().unwrap();
                return Ok(ActionStatus::Reload(signal));
            }
        }

        let mut state = self.state.lock().unwrap();
        match item {
            DeltaItem::InstallKey { id, public_key } => {
                state.keys.insert(id.clone(), public_key.clone());
            }
            DeltaItem::RemoveKey { id } => {
                state.keys.remove(id);
            }
            DeltaItem::WriteConfig { interface, contents } => {
                state.configs.insert(interface.clone(), digest(contents));
            }
            DeltaItem::RemoveConfig { interface } => {
                state.configs.remove(interface);
            }
            DeltaItem::AddRoute(route) => {
                state.routes.insert(route.clone());
            }
            DeltaItem::DelRoute(route) => {
                state.routes.remove(route);
            }
            DeltaItem::LinkUp { interface } => {
                state.interfaces.insert(interface.clone());
            }
            DeltaItem::LinkDown { interface } => {
                state.interfaces.remove(interface);
            }
        }
        self.applied.lock().unwrap().push(label);
        Ok(ActionStatus::Applied)
    }
}

// ── Mock: snapshot store ──────────────────────────────────────────────────────

/// Store with an active snapshot and an optional staged one that becomes
/// visible after a number of update checks.
pub struct MockStore {
    active: Mutex<AgentSnapshot>,
    staged: Mutex<Option<AgentSnapshot>>,
    visible_after: u32,
    checks: AtomicU32,
    promotions: AtomicU32,
}

impl MockStore {
    pub fn new(active: AgentSnapshot) -> Self {
        Self {
            active: Mutex::new(active),
            staged: Mutex::new(None),
            visible_after: 0,
            checks: AtomicU32::new(0),
            promotions: AtomicU32::new(0),
        }
    }

    /// Stage `next`, hidden from the first `checks` update checks.
    pub fn staged(self, next: AgentSnapshot, checks: u32) -> Self {
        *self.staged.lock().unwrap() = Some(next);
        Self {
            visible_after: checks,
            ..self
        }
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn promotions(&self) -> u32 {
        self.promotions.load(Ordering::SeqCst)
    }

    pub fn active_version(&self) -> SnapshotVersion {
        self.active.lock().unwrap().version.clone()
    }
}

impl SnapshotStore for MockStore {
    async fn load(&self) -> Result<AgentSnapshot> {
        Ok(self.active.lock().unwrap().clone())
    }

    async fn check_for_update(&self, current: &SnapshotVersion) -> Result<Option<AgentSnapshot>> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.visible_after {
            return Ok(None);
        }
        let staged = self.staged.lock().unwrap().clone();
        let active = self.active.lock().unwrap().clone();
        Ok([staged, Some(active)]
            .into_iter()
            .flatten()
            .filter(|s| s.version > *current)
            .max_by(|a, b| a.version.cmp(&b.version)))
    }

    async fn promote_staged(&self) -> Result<bool> {
        let Some(next) = self.staged.lock().unwrap().take() else {
            return Ok(false);
        };
        let mut active = self.active.lock().unwrap();
        if next.version <= active.version {
            return Ok(false);
        }
        *active = next;
        self.promotions.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

// ── Mock: tracked resources ───────────────────────────────────────────────────

/// Resource provider that records every acquire and release and refuses to
/// hand out a second set while one is live.
#[derive(Clone)]
pub struct TrackedResources {
    per_instance: usize,
    live: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
    failing: Option<String>,
}

impl TrackedResources {
    pub fn new(per_instance: usize) -> Self {
        Self {
            per_instance,
            live: Arc::new(AtomicUsize::new(0)),
            events: Arc::new(Mutex::new(Vec::new())),
            failing: None,
        }
    }

    /// Make the release of resource `name` fail.
    pub fn failing_release(mut self, name: &str) -> Self {
        self.failing = Some(name.to_owned());
        self
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ResourceProvider for TrackedResources {
    fn acquire(&self, snapshot: &AgentSnapshot) -> Result<Vec<Box<dyn Resource>>> {
        if self.live() > 0 {
            return Err(AgentError::AlreadyRunning {
                lock: "memory".into(),
            }
            .into());
        }
        let generation = snapshot.version.generation;
        let mut resources: Vec<Box<dyn Resource>> = Vec::new();
        for i in 0..self.per_instance {
            let name = format!("r{i}@{generation}");
            self.events.lock().unwrap().push(format!("acquire {name}"));
            self.live.fetch_add(1, Ordering::SeqCst);
            resources.push(Box::new(TrackedResource {
                fail: self.failing.as_deref() == Some(name.as_str()),
                name,
                live: Arc::clone(&self.live),
                events: Arc::clone(&self.events),
            }));
        }
        Ok(resources)
    }
}

pub struct TrackedResource {
    name: String,
    fail: bool,
    live: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Resource for TrackedResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(format!("release {}", self.name));
        if self.fail {
            anyhow::bail!("device busy");
        }
        Ok(())
    }
}

// ── Mock: packager and reporter ───────────────────────────────────────────────

/// Packager that writes a fixed snapshot, or fails.
pub struct WritingPackager {
    pub contents: Option<String>,
}

impl AgentPackager for WritingPackager {
    async fn extract_agent_package(&self, _package: &Path, root: &Path) -> Result<()> {
        let Some(contents) = &self.contents else {
            anyhow::bail!("tar failed: unexpected end of input");
        };
        std::fs::create_dir_all(root)?;
        std::fs::write(root.join("agent.yaml"), contents)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("step: {message}"));
    }
    fn success(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("ok: {message}"));
    }
    fn warn(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("warn: {message}"));
    }
}
