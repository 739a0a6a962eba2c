//! Reload control flow.
//!
//! A reload is not an error: every layer between a corrective action and
//! the runtime loop returns an [`Outcome`] and forwards `Reload` unchanged.

use std::sync::Arc;

use crate::domain::snapshot::AgentSnapshot;

/// Result of an action that may be interrupted by a reload.
#[derive(Debug)]
#[must_use]
pub enum Outcome<T> {
    Done(T),
    Reload(ReloadSignal),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Done(value) => Outcome::Done(f(value)),
            Self::Reload(signal) => Outcome::Reload(signal),
        }
    }

    #[must_use]
    pub fn is_reload(&self) -> bool {
        matches!(self, Self::Reload(_))
    }
}

/// Request to replace the running agent instance.
///
/// Consumed exactly once by the runtime loop.
#[derive(Debug, Clone)]
pub struct ReloadSignal {
    pub reason: String,
    /// Replacement snapshot; `None` re-reads the agent root.
    pub snapshot: Option<Arc<AgentSnapshot>>,
}

impl ReloadSignal {
    pub fn reread(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            snapshot: None,
        }
    }

    pub fn with_snapshot(reason: impl Into<String>, snapshot: AgentSnapshot) -> Self {
        Self {
            reason: reason.into(),
            snapshot: Some(Arc::new(snapshot)),
        }
    }
}
