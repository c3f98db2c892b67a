use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use super::health::{assess, AgentHealth, HealthInputs};
use super::state_machine::{StatusCorrection, StatusPolicy};
use crate::blocking;
use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::storage::{ActivityEntry, AgentRecord, AgentStore};
use crate::types::{AgentId, AgentIdentity, HealthStatus, SignalKind};
use crate::workspace::{Locator, SignalChannel};

/// Statuses the background sweep looks at.
pub const SWEEP_STATUSES: [HealthStatus; 3] =
    [HealthStatus::Online, HealthStatus::Degraded, HealthStatus::Idle];

pub const DEFAULT_ACTIVITY_ENTRIES: usize = 20;
pub const MAX_ACTIVITY_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub agent_id: AgentId,
    pub from: HealthStatus,
    pub to: HealthStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSweep {
    pub checked: usize,
    pub transitions: Vec<StatusTransition>,
    pub restarts: Vec<AgentId>,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlOutcome {
    pub agent_id: AgentId,
    pub status: HealthStatus,
    pub message: String,
}

struct FileObservation {
    session_mtime: Option<DateTime<Utc>>,
    workspace: Option<PathBuf>,
    expected_workspace: PathBuf,
    kill_present: bool,
}

struct Reconciled {
    health: AgentHealth,
    transition: Option<StatusTransition>,
    restarted: bool,
}

/// Health checks, status reconciliation and control signals for the fleet.
pub struct HealthMonitor {
    store: Arc<dyn AgentStore>,
    registry: Arc<AgentRegistry>,
    locator: Locator,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn AgentStore>, registry: Arc<AgentRegistry>, locator: Locator) -> Self {
        Self {
            store,
            registry,
            locator,
        }
    }

    /// Evaluates one agent and applies any datastore correction the
    /// evaluation calls for.
    pub async fn get_agent_health(&self, key: &str) -> Result<AgentHealth> {
        let identity = self.registry.identity_for(key);
        let record = self.store.get_agent(&identity.id).await?;
        self.evaluate(&identity, record.as_ref()).await
    }

    /// Evaluates one agent, then applies the status policy and auto-restart.
    pub async fn force_health_check(&self, key: &str) -> Result<AgentHealth> {
        let identity = self.registry.identity_for(key);
        let record = self.store.get_agent(&identity.id).await?;
        let reconciled = self
            .reconcile(&identity, record.as_ref(), "health_check_failed")
            .await?;
        Ok(reconciled.health)
    }

    /// Returns false when the agent has no datastore row.
    pub async fn set_auto_restart(&self, key: &str, enabled: bool) -> Result<bool> {
        let identity = self.registry.identity_for(key);
        if !self.store.set_auto_restart(&identity.id, enabled).await? {
            return Ok(false);
        }
        let action = if enabled {
            "auto_restart_enabled"
        } else {
            "auto_restart_disabled"
        };
        self.audit(ActivityEntry::new(identity.id.as_str(), action)).await;
        Ok(true)
    }

    /// One pass over every agent whose recorded status is eligible for
    /// automatic transitions. A failure on one agent is logged and skipped.
    pub async fn run_all_health_checks(&self) -> Result<HealthSweep> {
        let records = self.store.list_agents_by_status(&SWEEP_STATUSES).await?;
        let mut sweep = HealthSweep::default();

        for record in records {
            let identity = self.registry.identity_for(&record.id);
            match self
                .reconcile(&identity, Some(&record), "background_health_check")
                .await
            {
                Ok(done) => {
                    sweep.checked += 1;
                    if let Some(t) = done.transition {
                        sweep.transitions.push(t);
                    }
                    if done.restarted {
                        sweep.restarts.push(record.id.clone());
                    }
                }
                Err(e) => {
                    log::warn!("Health check for {} skipped: {}", record.id, e);
                    sweep.failures += 1;
                }
            }
        }

        log::debug!(
            "Health sweep: {} checked, {} transitions, {} restarts, {} failures",
            sweep.checked,
            sweep.transitions.len(),
            sweep.restarts.len(),
            sweep.failures
        );
        Ok(sweep)
    }

    /// Newest activity log entries for the agent, audit records included.
    pub async fn recent_activity(&self, key: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        let identity = self.registry.identity_for(key);
        let limit = match limit {
            1..=MAX_ACTIVITY_ENTRIES => limit,
            _ => DEFAULT_ACTIVITY_ENTRIES,
        };
        Ok(self.store.recent_activity(&identity.id, limit).await?)
    }

    pub async fn kill(&self, key: &str) -> Result<ControlOutcome> {
        let identity = self.registry.identity_for(key);
        self.signal(&identity, SignalKind::Kill, true).await?;
        self.record_control(&identity, HealthStatus::Killed, "killed").await;
        Ok(ControlOutcome {
            agent_id: identity.id,
            status: HealthStatus::Killed,
            message: "Kill signal sent".to_string(),
        })
    }

    pub async fn pause(&self, key: &str) -> Result<ControlOutcome> {
        let identity = self.registry.identity_for(key);
        self.signal(&identity, SignalKind::Pause, true).await?;
        self.record_control(&identity, HealthStatus::Paused, "paused").await;
        Ok(ControlOutcome {
            agent_id: identity.id,
            status: HealthStatus::Paused,
            message: "Pause signal sent".to_string(),
        })
    }

    /// Clears both PAUSE and KILL.
    pub async fn resume(&self, key: &str) -> Result<ControlOutcome> {
        let identity = self.registry.identity_for(key);
        self.signal(&identity, SignalKind::Pause, false).await?;
        self.signal(&identity, SignalKind::Kill, false).await?;
        self.record_control(&identity, HealthStatus::Idle, "resumed").await;
        Ok(ControlOutcome {
            agent_id: identity.id,
            status: HealthStatus::Idle,
            message: "Agent resumed".to_string(),
        })
    }

    async fn evaluate(
        &self,
        identity: &AgentIdentity,
        record: Option<&AgentRecord>,
    ) -> Result<AgentHealth> {
        let (recorded, auto_restart) = match record {
            Some(r) => (r.status, r.auto_restart),
            None if identity.is_orchestrator => (HealthStatus::Online, false),
            None => return Ok(AgentHealth::missing(identity.id.as_str())),
        };

        let db_activity = self.store.last_activity(&identity.id).await?;
        let seen = self.observe_files(identity).await?;
        let last_activity = match (db_activity, seen.session_mtime) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let inputs = HealthInputs {
            recorded,
            last_activity,
            workspace: seen.workspace,
            expected_workspace: seen.expected_workspace,
            kill_present: seen.kill_present,
            auto_restart,
            is_orchestrator: identity.is_orchestrator,
        };
        let assessment = assess(&identity.id, &inputs, Utc::now());

        if record.is_some() {
            if let Some(correction) = assessment.correction {
                self.apply_correction(&identity.id, correction).await;
            }
        }
        Ok(assessment.health)
    }

    async fn reconcile(
        &self,
        identity: &AgentIdentity,
        record: Option<&AgentRecord>,
        restart_reason: &str,
    ) -> Result<Reconciled> {
        let mut health = self.evaluate(identity, record).await?;
        let mut transition = None;

        let next = StatusPolicy::next(
            health.status,
            health.last_seen,
            identity.is_orchestrator,
            Utc::now(),
        );
        if let (Some(next), Some(record)) = (next, record) {
            if next != record.status {
                self.store.update_status(&identity.id, next).await?;
                self.audit(
                    ActivityEntry::new(identity.id.as_str(), "health_status_changed").with_details(
                        json!({
                            "from": record.status.as_str(),
                            "to": next.as_str(),
                            "reason": "health_check",
                        }),
                    ),
                )
                .await;
                log::info!("health: {}: {} -> {}", identity.id, record.status, next);
                transition = Some(StatusTransition {
                    agent_id: identity.id.clone(),
                    from: record.status,
                    to: next,
                });
            }
            health.status = next;
        }

        let mut restarted = false;
        if !health.healthy && health.auto_restart {
            restarted = self.signal(identity, SignalKind::Restart, true).await?;
            if restarted {
                self.audit(
                    ActivityEntry::new(identity.id.as_str(), "auto_restart_triggered")
                        .with_details(json!({ "reason": restart_reason })),
                )
                .await;
                log::info!("health: wrote RESTART signal for {}", identity.id);
            }
        }

        Ok(Reconciled {
            health,
            transition,
            restarted,
        })
    }

    async fn observe_files(&self, identity: &AgentIdentity) -> Result<FileObservation> {
        let locator = self.locator.clone();
        let identity = identity.clone();
        blocking(move || {
            let workspace = locator.resolve_workspace(&identity);
            let kill_present = workspace
                .as_ref()
                .is_some_and(|ws| SignalChannel::new(ws).is_present(SignalKind::Kill));
            let expected_workspace = locator
                .workspace_candidates(&identity)
                .into_iter()
                .next()
                .unwrap_or_else(|| locator.root().to_path_buf());
            FileObservation {
                session_mtime: locator.latest_session(&identity).map(|s| s.modified),
                workspace,
                expected_workspace,
                kill_present,
            }
        })
        .await
    }

    /// Creates (`send`) or removes the signal file. Returns whether anything changed.
    async fn signal(&self, identity: &AgentIdentity, kind: SignalKind, send: bool) -> Result<bool> {
        let locator = self.locator.clone();
        let identity = identity.clone();
        blocking(move || -> Result<bool> {
            if !send {
                let Some(ws) = locator.resolve_workspace(&identity) else {
                    return Ok(false);
                };
                return Ok(SignalChannel::new(ws).retract(kind)?);
            }
            let ws = locator.signal_workspace(&identity)?;
            Ok(SignalChannel::new(ws).send(kind)?)
        })
        .await?
    }

    async fn record_control(&self, identity: &AgentIdentity, status: HealthStatus, action: &str) {
        let id = identity.id.as_str();
        if let Err(e) = self.store.update_status(id, status).await {
            log::warn!("Failed to record {} status for {}: {}", status, id, e);
        }
        if let Err(e) = self.store.touch_last_active(id, Utc::now()).await {
            log::warn!("Failed to touch last_active for {}: {}", id, e);
        }
        self.audit(ActivityEntry::new(id, action)).await;
    }

    async fn apply_correction(&self, id: &str, correction: StatusCorrection) {
        let target = correction.target();
        let result = match correction {
            StatusCorrection::ForceOnline => self.store.update_status(id, target).await,
            StatusCorrection::IdleFromOffline => {
                self.store
                    .update_status_if(id, HealthStatus::Offline, target)
                    .await
            }
        };
        if let Err(e) = result {
            log::warn!("Failed to correct status of {} to {}: {}", id, target, e);
        }
    }

    async fn audit(&self, entry: ActivityEntry) {
        if let Err(e) = self.store.log_activity(&entry).await {
            log::warn!(
                "Failed to log {} for {}: {}",
                entry.action,
                entry.agent_id,
                e
            );
        }
    }
}
