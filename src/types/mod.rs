pub mod agent;
pub mod event;
pub mod signal;

pub use agent::AgentIdentity;
pub use event::{CanonicalEvent, EventKind};
pub use signal::SignalKind;

use serde::{Deserialize, Serialize};

pub type AgentId = String;

/// Activity state derived from session recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Active,  // Activity within the last 5 minutes
    Idle,    // 5 to 30 minutes
    Offline, // Older, or no session at all
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Active => "active",
            AgentState::Idle => "idle",
            AgentState::Offline => "offline",
        }
    }
}

/// Status recorded in the datastore and reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Idle,
    Degraded,
    Offline,
    Paused,
    Killed,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Online => "online",
            HealthStatus::Idle => "idle",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Offline => "offline",
            HealthStatus::Paused => "paused",
            HealthStatus::Killed => "killed",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Parses a stored status. Anything unrecognised maps to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => HealthStatus::Online,
            "idle" => HealthStatus::Idle,
            "degraded" => HealthStatus::Degraded,
            "offline" => HealthStatus::Offline,
            "paused" => HealthStatus::Paused,
            "killed" => HealthStatus::Killed,
            _ => HealthStatus::Unknown,
        }
    }

    /// Statuses the health policy may downgrade automatically.
    pub fn is_downgrade_eligible(&self) -> bool {
        matches!(
            self,
            HealthStatus::Online | HealthStatus::Degraded | HealthStatus::Idle
        )
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, HealthStatus::Killed | HealthStatus::Paused)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
