//! Tests for agent instances and the runtime reload loop.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uvn_agent::application::ports::SnapshotStore;
use uvn_agent::application::services::agent::Agent;
use uvn_agent::application::services::convergence::Convergence;
use uvn_agent::application::services::runtime::{ActionResult, AgentAction, Runtime};
use uvn_agent::domain::{AgentError, ReloadSignal};
use uvn_agent::infra::fs::AgentRoot;
use uvn_agent::infra::resources::LocalResources;

use crate::mocks::{
    MemoryNode, MockStore, TrackedResources, engine_config, fatal_failure, realized, snapshot,
    version,
};

fn sync() -> AgentAction {
    AgentAction::Sync {
        max_spin_time: Duration::from_secs(30),
        config_only: false,
    }
}

fn position(events: &[String], event: &str) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("missing event {event}: {events:?}"))
}

#[tokio::test(start_paused = true)]
async fn reload_mid_round_restarts_on_new_snapshot() {
    let node = MemoryNode::empty();
    let store = MockStore::new(snapshot(1)).staged(snapshot(2), 2);
    let resources = TrackedResources::new(3);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    let outcome = runtime.run(&sync()).await.unwrap();

    assert_eq!(outcome.reloads, 1);
    assert_eq!(outcome.version, version(2));
    assert!(matches!(
        outcome.result,
        ActionResult::Converged(Convergence::Consistent { .. })
    ));
    assert_eq!(node.state(), realized(&snapshot(2)));
    assert_eq!(store.promotions(), 1);
    assert_eq!(store.active_version(), version(2));

    assert_eq!(resources.live(), 0);
    let events = resources.events();
    assert_eq!(events.len(), 12);
    let last_old_release = ["release r0@1", "release r1@1", "release r2@1"]
        .iter()
        .map(|e| position(&events, e))
        .max()
        .unwrap();
    assert!(last_old_release < position(&events, "acquire r0@2"));
}

#[tokio::test(start_paused = true)]
async fn resources_are_released_in_reverse_order() {
    let node = MemoryNode::with_state(realized(&snapshot(1)));
    let store = MockStore::new(snapshot(1));
    let resources = TrackedResources::new(3);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    runtime.run(&sync()).await.unwrap();

    assert_eq!(
        resources.events(),
        [
            "acquire r0@1",
            "acquire r1@1",
            "acquire r2@1",
            "release r2@1",
            "release r1@1",
            "release r0@1",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reload_without_change_is_reported() {
    let node = MemoryNode::empty()
        .reload_on("write config uvn-b0", ReloadSignal::reread("peer topology changed"));
    let store = MockStore::new(snapshot(1));
    let resources = TrackedResources::new(2);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    let err = runtime.run(&sync()).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<AgentError>(),
        Some(AgentError::ReloadLoop { version }) if version == "9f2c#1"
    ));
    assert_eq!(resources.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn reload_with_identical_carried_snapshot_is_reported() {
    let node = MemoryNode::with_state(realized(&snapshot(1)));
    let store = MockStore::new(snapshot(1));
    let resources = TrackedResources::new(1);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    let agent = runtime.open().await.unwrap();
    let signal = ReloadSignal::with_snapshot("same again", snapshot(1));
    let err = runtime.reload(agent, signal).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<AgentError>(),
        Some(AgentError::ReloadLoop { .. })
    ));
    assert_eq!(resources.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_tears_down_and_propagates() {
    let node = MemoryNode::empty().always_failing("write config uvn-root");
    let store = MockStore::new(snapshot(1));
    let resources = TrackedResources::new(2);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    let err = runtime.run(&sync()).await.unwrap_err();

    assert_eq!(
        fatal_failure(&err),
        Some(("write config uvn-root".to_owned(), 4))
    );
    assert_eq!(resources.live(), 0);
    assert_eq!(store.promotions(), 0);
}

#[tokio::test(start_paused = true)]
async fn teardown_failures_are_aggregated() {
    let node = MemoryNode::with_state(realized(&snapshot(1)));
    let store = MockStore::new(snapshot(1));
    let resources = TrackedResources::new(3).failing_release("r1@1");
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    let err = runtime.run(&sync()).await.unwrap_err();

    let Some(AgentError::Teardown { errors }) = err.downcast_ref::<AgentError>() else {
        panic!("expected a teardown error, got {err:#}");
    };
    assert_eq!(errors, &["r1@1: device busy".to_owned()]);
    assert_eq!(resources.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_picks_up_staged_snapshot() {
    let node = MemoryNode::with_state(realized(&snapshot(1)));
    let store = MockStore::new(snapshot(1)).staged(snapshot(2), 0);
    let resources = TrackedResources::new(1);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    let outcome = runtime.run(&AgentAction::Update).await.unwrap();

    assert_eq!(outcome.reloads, 1);
    assert_eq!(outcome.version, version(2));
    assert!(matches!(
        outcome.result,
        ActionResult::Updated(Convergence::Consistent { .. })
    ));
    // Config-only: the new key and both rewritten configs.
    assert_eq!(node.applied().len(), 3);
    assert_eq!(node.state().keys, realized(&snapshot(2)).keys);
    assert_eq!(store.promotions(), 1);
}

#[tokio::test(start_paused = true)]
async fn update_without_newer_snapshot_converges_config() {
    let node = MemoryNode::empty();
    let store = MockStore::new(snapshot(1));
    let resources = TrackedResources::new(1);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    let outcome = runtime.run(&AgentAction::Update).await.unwrap();

    assert_eq!(outcome.reloads, 0);
    assert_eq!(
        outcome.result,
        ActionResult::Updated(Convergence::Consistent {
            rounds: 3,
            actions: 4
        })
    );
}

#[tokio::test(start_paused = true)]
async fn older_staged_snapshot_never_triggers_reload() {
    let node = MemoryNode::with_state(realized(&snapshot(6)));
    let store = MockStore::new(snapshot(6)).staged(snapshot(4), 0);
    let resources = TrackedResources::new(1);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());

    assert!(store.check_for_update(&version(6)).await.unwrap().is_none());
    let outcome = runtime.run(&sync()).await.unwrap();

    assert_eq!(outcome.reloads, 0);
    assert_eq!(outcome.version, version(6));
    assert_eq!(store.promotions(), 0);
    assert_eq!(store.active_version(), version(6));
    assert_eq!(resources.events(), ["acquire r0@6", "release r0@6"]);
}

#[tokio::test(start_paused = true)]
async fn run_returns_when_stopped() {
    let node = MemoryNode::with_state(realized(&snapshot(1)));
    let store = MockStore::new(snapshot(1));
    let resources = TrackedResources::new(1);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        let _ = tx.send(true);
    });

    let outcome = runtime.run(&AgentAction::Run { stop: rx }).await.unwrap();

    assert_eq!(outcome.result, ActionResult::Stopped);
    assert_eq!(node.observations(), 2);
    assert_eq!(resources.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_survives_reload_and_keeps_spinning() {
    let node = MemoryNode::with_state(realized(&snapshot(1)));
    let store = MockStore::new(snapshot(1)).staged(snapshot(2), 1);
    let resources = TrackedResources::new(1);
    let runtime = Runtime::new(&node, &store, &resources, engine_config());
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let _ = tx.send(true);
    });

    let outcome = runtime.run(&AgentAction::Run { stop: rx }).await.unwrap();

    assert_eq!(outcome.result, ActionResult::Stopped);
    assert_eq!(outcome.reloads, 1);
    assert_eq!(outcome.version, version(2));
    assert_eq!(node.state(), realized(&snapshot(2)));
}

#[test]
fn second_instance_on_same_root_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalResources::new(AgentRoot::new(dir.path()));

    let first = Agent::open(&provider, Arc::new(snapshot(1))).unwrap();
    assert_eq!(first.resource_count(), 2);
    let err = Agent::open(&provider, Arc::new(snapshot(1))).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AgentError>(),
        Some(AgentError::AlreadyRunning { .. })
    ));

    first.close().unwrap();
    let second = Agent::open(&provider, Arc::new(snapshot(2))).unwrap();
    assert_eq!(second.version(), &version(2));
}

#[test]
fn dropped_instance_releases_its_lock() {
    let dir = tempfile::tempdir().unwrap();
    let root = AgentRoot::new(dir.path());
    let provider = LocalResources::new(root.clone());

    let agent = Agent::open(&provider, Arc::new(snapshot(1))).unwrap();
    assert!(root.lock_file().exists());
    drop(agent);

    assert!(!root.lock_file().exists());
    assert!(!root.status_file().exists());
}
