use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::status::{AgentStatus, StatusDeriver};
use super::stream::{clamp_hours, clamp_limit, StreamAggregator, StreamEntry, TimelineEvent, TranscriptSummary};
use crate::blocking;
use crate::error::{Result, TelemetryError};
use crate::registry::AgentRegistry;
use crate::transcript::TranscriptParser;
use crate::types::{AgentIdentity, AgentState};
use crate::usage::{
    by_agent, by_day, by_model, cost_summary, AgentUsage, CostSummary, DailyUsage, ModelUsage,
    PriceTable, UsageAccountant, UsageRecord,
};
use crate::workspace::Locator;

pub const DEFAULT_USAGE_DAYS: u32 = 30;
pub const MAX_USAGE_DAYS: u32 = 365;

pub fn clamp_days(days: Option<u32>) -> u32 {
    match days {
        Some(d) if d > 0 && d <= MAX_USAGE_DAYS => d,
        _ => DEFAULT_USAGE_DAYS,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDetail {
    #[serde(flatten)]
    pub status: AgentStatus,
    #[serde(flatten)]
    pub transcript: TranscriptSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStats {
    pub name: String,
    pub color: String,
    pub total_agents: usize,
    pub active_agents: usize,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStats {
    pub fleet_name: String,
    pub total_agents: usize,
    pub active_agents: usize,
    pub idle_agents: usize,
    pub offline_agents: usize,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub teams: Vec<TeamStats>,
}

impl FleetStats {
    /// Teams come out sorted by name.
    pub fn from_statuses(statuses: &[AgentStatus]) -> Self {
        let mut stats = FleetStats {
            total_agents: statuses.len(),
            ..FleetStats::default()
        };
        let mut teams: BTreeMap<&str, TeamStats> = BTreeMap::new();

        for s in statuses {
            match s.state {
                AgentState::Active => stats.active_agents += 1,
                AgentState::Idle => stats.idle_agents += 1,
                AgentState::Offline => stats.offline_agents += 1,
            }
            stats.total_tokens = stats.total_tokens.saturating_add(s.total_tokens);
            stats.estimated_cost += s.estimated_cost;

            let team = teams.entry(s.team.as_str()).or_insert_with(|| TeamStats {
                name: s.team.clone(),
                color: s.team_color.clone(),
                ..TeamStats::default()
            });
            team.total_agents += 1;
            if s.state == AgentState::Active {
                team.active_agents += 1;
            }
            team.total_tokens = team.total_tokens.saturating_add(s.total_tokens);
            team.estimated_cost += s.estimated_cost;
        }

        stats.teams = teams.into_values().collect();
        stats
    }
}

/// Read-side query surface over the fleet's session logs.
///
/// Reads go to the session files; parsed usage is cached per file until its
/// length or mtime changes.
/// File work runs on the blocking pool.
#[derive(Clone)]
pub struct TelemetryService {
    registry: Arc<AgentRegistry>,
    deriver: StatusDeriver,
    aggregator: StreamAggregator,
}

impl TelemetryService {
    pub fn new(registry: Arc<AgentRegistry>, locator: Locator) -> Self {
        let prices = PriceTable::builtin().with_overrides(registry.pricing());
        let accountant = Arc::new(UsageAccountant::new(prices));
        let parser = TranscriptParser::canonical();
        Self {
            deriver: StatusDeriver::new(locator.clone(), accountant, parser.clone()),
            aggregator: StreamAggregator::new(locator, parser),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    fn lookup(&self, key: &str) -> Result<AgentIdentity> {
        self.registry
            .get(key)
            .ok_or_else(|| TelemetryError::AgentNotFound(key.to_string()))
    }

    pub async fn list_agent_statuses(&self) -> Result<Vec<AgentStatus>> {
        let deriver = self.deriver.clone();
        let agents = self.registry.agents();
        blocking(move || {
            let now = Utc::now();
            agents.iter().map(|a| deriver.derive(a, now)).collect()
        })
        .await
    }

    pub async fn get_agent_status(&self, key: &str) -> Result<AgentStatus> {
        let identity = self.lookup(key)?;
        let deriver = self.deriver.clone();
        blocking(move || deriver.derive(&identity, Utc::now())).await
    }

    pub async fn get_agent_detail(&self, key: &str) -> Result<AgentDetail> {
        let identity = self.lookup(key)?;
        let deriver = self.deriver.clone();
        let aggregator = self.aggregator.clone();
        blocking(move || {
            let now = Utc::now();
            AgentDetail {
                status: deriver.derive(&identity, now),
                transcript: aggregator.transcript(&identity, now),
            }
        })
        .await
    }

    pub async fn get_global_stream(
        &self,
        limit: Option<usize>,
        agent_filter: Option<String>,
    ) -> Result<Vec<StreamEntry>> {
        let limit = clamp_limit(limit);
        let aggregator = self.aggregator.clone();
        let agents = self.registry.agents();
        blocking(move || aggregator.global_stream(&agents, limit, agent_filter.as_deref(), Utc::now()))
            .await
    }

    pub async fn get_agent_timeline(&self, key: &str, hours: Option<i64>) -> Result<Vec<TimelineEvent>> {
        let identity = self.lookup(key)?;
        let hours = clamp_hours(hours);
        let aggregator = self.aggregator.clone();
        blocking(move || aggregator.timeline(&identity, hours, Utc::now())).await
    }

    pub async fn fleet_stats(&self) -> Result<FleetStats> {
        let statuses = self.list_agent_statuses().await?;
        Ok(FleetStats {
            fleet_name: self.registry.team_name(),
            ..FleetStats::from_statuses(&statuses)
        })
    }

    /// Forgets cached usage for session files that are gone. Returns how many
    /// files stay cached.
    pub async fn prune_usage_cache(&self) -> Result<usize> {
        let deriver = self.deriver.clone();
        let agents = self.registry.agents();
        blocking(move || {
            let live = deriver.live_files(&agents);
            deriver.cache().retain(&live);
            deriver.cache().len()
        })
        .await
    }

    /// Every usage record of every known agent.
    pub async fn usage_records(&self) -> Result<Vec<UsageRecord>> {
        let deriver = self.deriver.clone();
        let agents = self.registry.agents();
        blocking(move || {
            let now = Utc::now();
            agents
                .iter()
                .flat_map(|a| deriver.usage_records(a, now))
                .collect()
        })
        .await
    }

    /// Per-agent totals, all time or over the last `days`.
    pub async fn tokens_by_agent(&self, days: Option<u32>) -> Result<Vec<AgentUsage>> {
        let records = self.usage_records().await?;
        let since = days.map(|d| Utc::now() - Duration::days(i64::from(clamp_days(Some(d)))));
        let mut rows = by_agent(&records, since);
        for row in &mut rows {
            if let Some(agent) = self.registry.get(&row.agent_id) {
                row.name = agent.display_name;
            }
        }
        Ok(rows)
    }

    pub async fn tokens_timeline(
        &self,
        days: Option<u32>,
        agent: Option<String>,
    ) -> Result<Vec<DailyUsage>> {
        let records = self.usage_records().await?;
        // Accept a display name as well as an id.
        let agent_id = agent.map(|a| self.registry.get(&a).map(|i| i.id).unwrap_or(a));
        Ok(by_day(
            &records,
            Utc::now().date_naive(),
            clamp_days(days),
            agent_id.as_deref(),
        ))
    }

    /// The most expensive agent is reported by display name.
    pub async fn cost_summary(&self) -> Result<CostSummary> {
        let records = self.usage_records().await?;
        let mut summary = cost_summary(&records, Utc::now());
        if let Some(id) = &summary.most_expensive_agent {
            if let Some(agent) = self.registry.get(id) {
                summary.most_expensive_agent = Some(agent.display_name);
            }
        }
        Ok(summary)
    }

    pub async fn by_model(&self) -> Result<Vec<ModelUsage>> {
        let records = self.usage_records().await?;
        Ok(by_model(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: &str, team: &str, state: AgentState, tokens: u64, cost: f64) -> AgentStatus {
        AgentStatus {
            agent_id: id.to_string(),
            name: id.to_string(),
            emoji: String::new(),
            team: team.to_string(),
            team_color: format!("#{}", team),
            is_orchestrator: false,
            state,
            last_active: None,
            last_active_str: "Never".to_string(),
            session_count: 0,
            tokens_in: tokens,
            tokens_out: 0,
            total_tokens: tokens,
            estimated_cost: cost,
            current_model: None,
            current_task: None,
        }
    }

    #[test]
    fn test_fleet_stats_by_team() {
        let stats = FleetStats::from_statuses(&[
            status("a", "ops", AgentState::Active, 10, 1.0),
            status("b", "dev", AgentState::Idle, 20, 2.0),
            status("c", "ops", AgentState::Offline, 30, 3.0),
        ]);

        assert_eq!(stats.total_agents, 3);
        assert_eq!((stats.active_agents, stats.idle_agents, stats.offline_agents), (1, 1, 1));
        assert_eq!(stats.total_tokens, 60);
        assert!((stats.estimated_cost - 6.0).abs() < 1e-9);

        let names: Vec<_> = stats.teams.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["dev", "ops"]);
        assert_eq!(stats.teams[1].total_agents, 2);
        assert_eq!(stats.teams[1].active_agents, 1);
        assert_eq!(stats.teams[1].color, "#ops");
    }

    #[tokio::test]
    async fn test_fleet_stats_carry_fleet_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = dir.path().join("agents.yaml");
        std::fs::write(&config, "name: Night Shift\nagents:\n  - id: forge\n").unwrap();
        let registry = Arc::new(AgentRegistry::load(&config, vec![]).unwrap());
        let service = TelemetryService::new(registry, Locator::new(dir.path(), vec![]));

        let stats = service.fleet_stats().await.unwrap();
        assert_eq!(stats.fleet_name, "Night Shift");
        assert_eq!(stats.total_agents, 1);
        assert_eq!(service.prune_usage_cache().await.unwrap(), 0);
    }

    #[test]
    fn test_clamp_days() {
        assert_eq!(clamp_days(None), 30);
        assert_eq!(clamp_days(Some(0)), 30);
        assert_eq!(clamp_days(Some(366)), 30);
        assert_eq!(clamp_days(Some(7)), 7);
    }

    #[test]
    fn test_detail_serializes_flat() {
        let detail = AgentDetail {
            status: status("a", "ops", AgentState::Idle, 1, 0.0),
            transcript: TranscriptSummary::default(),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["agentId"], "a");
        assert_eq!(json["state"], "idle");
        assert!(json["toolsUsed"].as_array().unwrap().is_empty());
    }
}
