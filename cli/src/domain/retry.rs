//! Bounded exponential backoff for corrective actions.

use std::time::Duration;

use uvn_common::AgentSettings;

/// Retry budget for a single corrective action.
///
/// Delays are deterministic (no jitter) so that repeated runs against the
/// same node apply and retry actions on the same schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never zero.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_backoff_ms),
            max_delay: Duration::from_millis(settings.max_backoff_ms),
        }
    }

    /// Whether attempt number `attempt` (1-based) may run.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay)
    }
}
