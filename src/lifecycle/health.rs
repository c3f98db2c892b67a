use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::state_machine::{StatusCorrection, StatusPolicy, ACTIVITY_HORIZON_HOURS};
use crate::types::{AgentId, HealthStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl HealthCheck {
    fn new(name: &str, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: AgentId,
    pub status: HealthStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub healthy: bool,
    pub checks: Vec<HealthCheck>,
    pub auto_restart: bool,
}

impl AgentHealth {
    /// Verdict for an id the datastore has no row for.
    pub fn missing(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: HealthStatus::Unknown,
            last_seen: None,
            healthy: false,
            checks: vec![HealthCheck::new(
                "agent_exists",
                false,
                "Agent not found in database",
            )],
            auto_restart: false,
        }
    }

    pub fn check(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Everything a health evaluation looks at, gathered up front.
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub recorded: HealthStatus,
    /// Newer of datastore activity and latest session mtime.
    pub last_activity: Option<DateTime<Utc>>,
    pub workspace: Option<PathBuf>,
    /// Reported when no workspace resolves.
    pub expected_workspace: PathBuf,
    pub kill_present: bool,
    pub auto_restart: bool,
    pub is_orchestrator: bool,
}

#[derive(Debug, Clone)]
pub struct Assessment {
    pub health: AgentHealth,
    pub correction: Option<StatusCorrection>,
}

pub fn activity_check(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> HealthCheck {
    let Some(last) = last else {
        return HealthCheck::new("recent_activity", true, "No activity recorded");
    };
    let age = (now - last).max(Duration::zero());

    let (passed, message) = if age < Duration::minutes(1) {
        (true, format!("Active {} seconds ago", age.num_seconds()))
    } else if age < Duration::minutes(15) {
        (true, format!("Active {} minutes ago", age.num_minutes()))
    } else if age < Duration::hours(1) {
        (true, format!("Last active {} minutes ago", age.num_minutes()))
    } else if age < Duration::hours(ACTIVITY_HORIZON_HOURS) {
        (true, format!("Last active {} hours ago", age.num_hours()))
    } else {
        (false, format!("Last active {} days ago", age.num_days()))
    };
    HealthCheck::new("recent_activity", passed, message)
}

pub fn status_check(recorded: HealthStatus) -> HealthCheck {
    if recorded.is_stopped() {
        HealthCheck::new("status", false, format!("Agent is {} (not running)", recorded))
    } else {
        HealthCheck::new("status", true, format!("Agent status: {}", recorded))
    }
}

pub fn workspace_check(found: Option<&PathBuf>, expected: &PathBuf) -> HealthCheck {
    match found {
        Some(path) => HealthCheck::new(
            "workspace",
            true,
            format!("Workspace found: {}", path.display()),
        ),
        None => HealthCheck::new(
            "workspace",
            false,
            format!("Workspace directory not found: {}", expected.display()),
        ),
    }
}

pub fn kill_signal_check(present: bool) -> HealthCheck {
    if present {
        HealthCheck::new("kill_signal", false, "KILL signal file is present")
    } else {
        HealthCheck::new("kill_signal", true, "No kill signal present")
    }
}

/// Runs the four checks and derives the verdict.
///
/// `healthy` depends only on recent activity and the recorded status. The
/// workspace and kill-signal checks are diagnostic.
pub fn assess(agent_id: &str, inputs: &HealthInputs, now: DateTime<Utc>) -> Assessment {
    let activity = activity_check(inputs.last_activity, now);
    let status = status_check(inputs.recorded);
    let mut healthy = activity.passed && status.passed;

    let checks = vec![
        activity,
        status,
        workspace_check(inputs.workspace.as_ref(), &inputs.expected_workspace),
        kill_signal_check(inputs.kill_present),
    ];

    let (display, correction) = StatusPolicy::display(
        inputs.recorded,
        inputs.last_activity,
        inputs.is_orchestrator,
        now,
    );
    if inputs.is_orchestrator {
        healthy = true;
    }

    Assessment {
        health: AgentHealth {
            agent_id: agent_id.to_string(),
            status: display,
            last_seen: inputs.last_activity,
            healthy,
            checks,
            auto_restart: inputs.auto_restart,
        },
        correction,
    }
}
