use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::broadcast::Broadcaster;
use super::telemetry::TelemetryService;
use crate::error::Result;
use crate::lifecycle::{HealthMonitor, HealthSweep};
use crate::storage::AgentStore;
use crate::types::{AgentId, AgentState};

pub const STATUS_UPDATE_EVENT: &str = "agent_status_update";
pub const HEALTH_UPDATE_EVENT: &str = "agent_health_update";

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Re-derives every agent's status on a fixed period and broadcasts the full
/// list whenever any agent's state moved.
pub struct StatusBroadcastLoop {
    telemetry: TelemetryService,
    store: Arc<dyn AgentStore>,
    broadcaster: Arc<dyn Broadcaster>,
    previous: HashMap<AgentId, AgentState>,
    persisted: HashMap<AgentId, DateTime<Utc>>,
}

impl StatusBroadcastLoop {
    pub fn new(
        telemetry: TelemetryService,
        store: Arc<dyn AgentStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            telemetry,
            store,
            broadcaster,
            previous: HashMap::new(),
            persisted: HashMap::new(),
        }
    }

    /// One pass. Returns whether a broadcast went out.
    pub async fn run_once(&mut self) -> Result<bool> {
        self.refresh_registry().await;
        let statuses = self.telemetry.list_agent_statuses().await?;

        let mut changed = false;
        for status in &statuses {
            if self.previous.insert(status.agent_id.clone(), status.state) != Some(status.state) {
                changed = true;
            }

            let Some(at) = status.last_active else {
                continue;
            };
            if self.persisted.get(&status.agent_id) == Some(&at) {
                continue;
            }
            match self.store.touch_last_active(&status.agent_id, at).await {
                Ok(_) => {
                    self.persisted.insert(status.agent_id.clone(), at);
                }
                Err(e) => log::warn!("Failed to persist last_active for {}: {}", status.agent_id, e),
            }
        }

        if let Err(e) = self.telemetry.prune_usage_cache().await {
            log::warn!("Failed to prune usage cache: {}", e);
        }

        if changed {
            match serde_json::to_value(&statuses) {
                Ok(payload) => self.broadcaster.broadcast(STATUS_UPDATE_EVENT, payload),
                Err(e) => log::error!("Failed to encode status update: {}", e),
            }
        }
        Ok(changed)
    }

    /// Picks up edits to the agents file and seeds rows for new agents.
    async fn refresh_registry(&self) {
        let registry = self.telemetry.registry();
        match registry.reload_if_changed() {
            Ok(false) => {}
            Ok(true) => {
                for agent in registry.agents() {
                    if let Err(e) = self.store.upsert_agent(&agent.id, &agent.display_name).await {
                        log::warn!("Failed to seed agent {}: {}", agent.id, e);
                    }
                }
            }
            Err(e) => log::warn!("Agent registry reload failed: {:#}", e),
        }
    }

    pub async fn run(mut self, period: Duration) {
        let mut ticker = ticker(period);
        log::info!("Status loop started ({}s period)", period.as_secs());
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                log::error!("Status pass failed: {}", e);
            }
        }
    }

    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(self.run(period))
    }
}

/// Runs the health sweep on a fixed period and broadcasts any transitions.
pub struct HealthCheckLoop {
    monitor: Arc<HealthMonitor>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl HealthCheckLoop {
    pub fn new(monitor: Arc<HealthMonitor>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            monitor,
            broadcaster,
        }
    }

    pub async fn run_once(&self) -> Result<HealthSweep> {
        let sweep = self.monitor.run_all_health_checks().await?;
        if !sweep.transitions.is_empty() || !sweep.restarts.is_empty() {
            match serde_json::to_value(&sweep) {
                Ok(payload) => self.broadcaster.broadcast(HEALTH_UPDATE_EVENT, payload),
                Err(e) => log::error!("Failed to encode health update: {}", e),
            }
        }
        Ok(sweep)
    }

    pub async fn run(self, period: Duration) {
        let mut ticker = ticker(period);
        log::info!("Health loop started ({}s period)", period.as_secs());
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                log::error!("Health sweep failed: {}", e);
            }
        }
    }

    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(self.run(period))
    }
}
