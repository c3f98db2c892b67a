use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::traits::{is_audit_action, ActivityEntry, AgentRecord, AgentStore};
use crate::types::{AgentId, HealthStatus};

/// Process-local store used when no database is configured, and in tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    agents: Arc<RwLock<HashMap<AgentId, AgentRecord>>>,
    activity: Arc<RwLock<Vec<ActivityEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a full record.
    pub fn insert(&self, record: AgentRecord) -> Result<()> {
        self.agents_mut()?.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn activity_log(&self) -> Result<Vec<ActivityEntry>> {
        Ok(read(&self.activity)?.clone())
    }

    fn agents_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<AgentId, AgentRecord>>> {
        self.agents
            .write()
            .map_err(|_| anyhow!("agent table lock poisoned"))
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut AgentRecord) -> bool,
    {
        let mut agents = self.agents_mut()?;
        Ok(agents.get_mut(id).map(f).unwrap_or(false))
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("store lock poisoned"))
}

#[async_trait]
impl AgentStore for InMemoryStore {
    async fn upsert_agent(&self, id: &str, display_name: &str) -> Result<()> {
        let mut agents = self.agents_mut()?;
        agents
            .entry(id.to_string())
            .and_modify(|r| r.display_name = display_name.to_string())
            .or_insert_with(|| AgentRecord::new(id, display_name));
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        Ok(read(&self.agents)?.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let mut out: Vec<_> = read(&self.agents)?.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn list_agents_by_status(&self, statuses: &[HealthStatus]) -> Result<Vec<AgentRecord>> {
        let mut out: Vec<_> = read(&self.agents)?
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn update_status(&self, id: &str, status: HealthStatus) -> Result<bool> {
        self.modify(id, |r| {
            r.status = status;
            true
        })
    }

    async fn update_status_if(
        &self,
        id: &str,
        expected: HealthStatus,
        status: HealthStatus,
    ) -> Result<bool> {
        self.modify(id, |r| {
            if r.status != expected {
                return false;
            }
            r.status = status;
            true
        })
    }

    async fn touch_last_active(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.modify(id, |r| {
            r.last_active = Some(at);
            true
        })
    }

    async fn set_auto_restart(&self, id: &str, enabled: bool) -> Result<bool> {
        self.modify(id, |r| {
            r.auto_restart = enabled;
            true
        })
    }

    async fn log_activity(&self, entry: &ActivityEntry) -> Result<()> {
        self.activity
            .write()
            .map_err(|_| anyhow!("activity log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }

    async fn last_activity(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(read(&self.activity)?
            .iter()
            .filter(|e| e.agent_id == id && !is_audit_action(&e.action))
            .map(|e| e.created_at)
            .max())
    }

    async fn recent_activity(&self, id: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        let mut out: Vec<_> = read(&self.activity)?
            .iter()
            .filter(|e| e.agent_id == id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}
