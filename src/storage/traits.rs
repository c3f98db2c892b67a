use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, HealthStatus};

/// Last-known verdict for an agent as cached in the datastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub display_name: String,
    pub status: HealthStatus,
    pub last_active: Option<DateTime<Utc>>,
    pub auto_restart: bool,
}

impl AgentRecord {
    pub fn new(id: impl Into<AgentId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            status: HealthStatus::Idle,
            last_active: None,
            auto_restart: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub agent_id: AgentId,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(agent_id: impl Into<AgentId>, action: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Actions this crate writes to the activity log itself. They are audit
/// records, not agent activity, and never count towards "last seen".
pub const AUDIT_ACTIONS: &[&str] = &[
    "health_status_changed",
    "auto_restart_triggered",
    "auto_restart_enabled",
    "auto_restart_disabled",
    "killed",
    "paused",
    "resumed",
];

pub fn is_audit_action(action: &str) -> bool {
    AUDIT_ACTIONS.contains(&action)
}

/// The relational store the reconciliation loops write their verdicts to.
///
/// Every method is one independent statement. Status setters return whether a
/// row was touched.
#[async_trait]
pub trait AgentStore: Send + Sync {
    // Agent records
    /// Inserts the agent if absent. Existing rows keep their status.
    async fn upsert_agent(&self, id: &str, display_name: &str) -> Result<()>;
    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>>;
    async fn list_agents(&self) -> Result<Vec<AgentRecord>>;
    async fn list_agents_by_status(&self, statuses: &[HealthStatus]) -> Result<Vec<AgentRecord>>;
    async fn update_status(&self, id: &str, status: HealthStatus) -> Result<bool>;
    /// Compare-and-set on the status column.
    async fn update_status_if(
        &self,
        id: &str,
        expected: HealthStatus,
        status: HealthStatus,
    ) -> Result<bool>;
    async fn touch_last_active(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;
    async fn set_auto_restart(&self, id: &str, enabled: bool) -> Result<bool>;

    // Activity log
    async fn log_activity(&self, entry: &ActivityEntry) -> Result<()>;
    /// Newest non-audit activity for the agent.
    async fn last_activity(&self, id: &str) -> Result<Option<DateTime<Utc>>>;
    async fn recent_activity(&self, id: &str, limit: usize) -> Result<Vec<ActivityEntry>>;
}
