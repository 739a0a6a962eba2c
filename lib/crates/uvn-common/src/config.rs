use std::time::Duration;

use serde::Deserialize;

/// Environment prefix for agent settings (`UVN_AGENT_MAX_ATTEMPTS`, ...).
pub const ENV_PREFIX: &str = "UVN_AGENT_";

/// Tunables of the convergence engine.
///
/// Loaded from `UVN_AGENT_*` environment variables; every field has a
/// default so an empty environment yields a working agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentSettings {
    /// Attempts per corrective action before it is declared fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound for a single observation or corrective action.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    /// Idle time between convergence rounds while spinning.
    #[serde(default = "default_spin_interval_secs")]
    pub spin_interval_secs: u64,

    /// Time budget of one convergence round while spinning.
    #[serde(default = "default_round_budget_secs")]
    pub round_budget_secs: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_action_timeout_secs() -> u64 {
    30
}

fn default_spin_interval_secs() -> u64 {
    5
}

fn default_round_budget_secs() -> u64 {
    60
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            action_timeout_secs: default_action_timeout_secs(),
            spin_interval_secs: default_spin_interval_secs(),
            round_budget_secs: default_round_budget_secs(),
        }
    }
}

impl AgentSettings {
    /// Load settings from `UVN_AGENT_*` environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env()
    }

    /// Load settings from an explicit list of variables (without prefix).
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs)
    }

    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    #[must_use]
    pub fn spin_interval(&self) -> Duration {
        Duration::from_secs(self.spin_interval_secs)
    }

    #[must_use]
    pub fn round_budget(&self) -> Duration {
        Duration::from_secs(self.round_budget_secs)
    }
}
