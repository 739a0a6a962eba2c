//! Domain layer — pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod delta;
pub mod error;
pub mod reload;
pub mod retry;
pub mod snapshot;
pub mod state;

pub use delta::{ConvergenceMode, DeltaCategory, DeltaItem, compute_delta, next_batch};
pub use error::{ActionFailure, AgentError, SnapshotError};
pub use reload::{Outcome, ReloadSignal};
pub use retry::RetryPolicy;
pub use snapshot::{AgentSnapshot, KeyMaterial, SnapshotVersion, VpnLink};
pub use state::{DesiredState, RealizedState, Route};
