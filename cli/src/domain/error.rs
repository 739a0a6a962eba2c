//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::path::PathBuf;

use thiserror::Error;

// ── Snapshot errors ───────────────────────────────────────────────────────────

/// A declared snapshot that cannot be realized on this cell.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("local cell '{0}' is not declared in the uvn")]
    UnknownLocalCell(String),

    #[error("interface '{0}' is declared more than once")]
    DuplicateInterface(String),

    #[error("interface '{interface}' links to unknown peer '{peer}'")]
    UnknownPeer { interface: String, peer: String },

    #[error("no key material declared for link peer '{0}'")]
    MissingPeerKey(String),
}

// ── Corrective action failures ────────────────────────────────────────────────

/// Failure reported by a node driver for a single corrective action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionFailure {
    /// Transient; the engine retries with backoff.
    #[error("{0}")]
    Retryable(String),

    /// Permanent; the engine gives up immediately.
    #[error("{0}")]
    Fatal(String),
}

// ── Agent errors ──────────────────────────────────────────────────────────────

/// Errors that end an agent action.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("cannot correct '{item}' after {attempts} attempt(s): {reason}")]
    FatalCorrectiveFailure {
        item: String,
        attempts: u32,
        reason: String,
    },

    #[error("reload requested without a configuration change (still at {version})")]
    ReloadLoop { version: String },

    #[error("another agent instance owns this node (lock file {})", lock.display())]
    AlreadyRunning { lock: PathBuf },

    #[error("failed to release agent resources:\n{}", errors.join("\n"))]
    Teardown { errors: Vec<String> },
}
