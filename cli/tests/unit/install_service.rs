//! Tests for the package installation service.

#![allow(clippy::unwrap_used)]

use std::path::Path;

use uvn_agent::application::services::install::install_agent;
use uvn_agent::infra::fs::AgentRoot;
use uvn_agent::infra::snapshot_store::FsSnapshotStore;

use crate::mocks::{RecordingReporter, SNAPSHOT, WritingPackager};

#[tokio::test]
async fn install_extracts_and_validates_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("agent");
    let packager = WritingPackager {
        contents: Some(SNAPSHOT.to_owned()),
    };
    let store = FsSnapshotStore::new(AgentRoot::new(&root));
    let reporter = RecordingReporter::default();

    let snapshot = install_agent(&packager, &store, &reporter, Path::new("gw1.tar.xz"), &root)
        .await
        .unwrap();

    assert_eq!(snapshot.cell, "gw1");
    assert_eq!(snapshot.version.generation, 1);
    let messages = reporter.messages.lock().unwrap().clone();
    assert_eq!(
        messages,
        [
            "step: extracting gw1.tar.xz",
            "ok: installed cell gw1 of uvn corp (9f2c#1)",
        ]
    );
}

#[tokio::test]
async fn install_reports_extraction_failure() {
    let dir = tempfile::tempdir().unwrap();
    let packager = WritingPackager { contents: None };
    let store = FsSnapshotStore::new(AgentRoot::new(dir.path()));
    let reporter = RecordingReporter::default();

    let err = install_agent(&packager, &store, &reporter, Path::new("gw1.tar.xz"), dir.path())
        .await
        .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("extracting agent package gw1.tar.xz"));
    assert!(message.contains("unexpected end of input"));
    assert_eq!(reporter.messages.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn install_rejects_invalid_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let packager = WritingPackager {
        contents: Some(SNAPSHOT.replace("cell: gw1", "cell: gw9")),
    };
    let store = FsSnapshotStore::new(AgentRoot::new(dir.path()));
    let reporter = RecordingReporter::default();

    let err = install_agent(&packager, &store, &reporter, Path::new("gw1.tar.xz"), dir.path())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("valid agent snapshot"));
}
