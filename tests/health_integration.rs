//! Health reconciliation against a scratch tree and the in-memory datastore.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use fleetlens::lifecycle::HealthMonitor;
use fleetlens::registry::AgentRegistry;
use fleetlens::storage::{ActivityEntry, AgentRecord, AgentStore, InMemoryStore};
use fleetlens::workspace::Locator;
use fleetlens::{AgentIdentity, HealthStatus, TelemetryError};

/// Delegates to an in-memory store but fails every activity lookup for one agent.
struct FlakyStore {
    inner: InMemoryStore,
    broken: String,
}

#[async_trait]
impl AgentStore for FlakyStore {
    async fn upsert_agent(&self, id: &str, display_name: &str) -> Result<()> {
        self.inner.upsert_agent(id, display_name).await
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        self.inner.get_agent(id).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.inner.list_agents().await
    }

    async fn list_agents_by_status(&self, statuses: &[HealthStatus]) -> Result<Vec<AgentRecord>> {
        self.inner.list_agents_by_status(statuses).await
    }

    async fn update_status(&self, id: &str, status: HealthStatus) -> Result<bool> {
        self.inner.update_status(id, status).await
    }

    async fn update_status_if(
        &self,
        id: &str,
        expected: HealthStatus,
        status: HealthStatus,
    ) -> Result<bool> {
        self.inner.update_status_if(id, expected, status).await
    }

    async fn touch_last_active(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.inner.touch_last_active(id, at).await
    }

    async fn set_auto_restart(&self, id: &str, enabled: bool) -> Result<bool> {
        self.inner.set_auto_restart(id, enabled).await
    }

    async fn log_activity(&self, entry: &ActivityEntry) -> Result<()> {
        self.inner.log_activity(entry).await
    }

    async fn last_activity(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        if id == self.broken {
            return Err(anyhow!("connection reset"));
        }
        self.inner.last_activity(id).await
    }

    async fn recent_activity(&self, id: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        self.inner.recent_activity(id, limit).await
    }
}

fn registry() -> Arc<AgentRegistry> {
    Arc::new(AgentRegistry::new(
        vec![
            AgentIdentity::new("thunder", "Thunder"),
            AgentIdentity::new("forge", "Forge"),
            AgentIdentity::new("scout", "Scout"),
        ],
        vec!["thunder".to_string()],
    ))
}

fn locator(root: &Path) -> Locator {
    Locator::new(root, vec!["main".to_string()])
}

fn session(root: &Path, agent: &str, age: Duration) {
    let path = root.join("agents").join(agent).join("sessions/s.jsonl");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{}\n").unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn record(id: &str, status: HealthStatus) -> AgentRecord {
    AgentRecord {
        status,
        ..AgentRecord::new(id, id)
    }
}

#[tokio::test]
async fn test_offline_orchestrator_reported_and_stored_online() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.insert(record("thunder", HealthStatus::Offline)).unwrap();
    let monitor = HealthMonitor::new(store.clone(), registry(), locator(dir.path()));

    let health = monitor.get_agent_health("thunder").await.unwrap();

    assert_eq!(health.status, HealthStatus::Online);
    assert!(health.healthy);
    let stored = store.get_agent("thunder").await.unwrap().unwrap();
    assert_eq!(stored.status, HealthStatus::Online);
}

#[tokio::test]
async fn test_recent_session_lifts_offline_agent_to_idle() {
    let dir = TempDir::new().unwrap();
    session(dir.path(), "forge", Duration::from_secs(600));
    let store = Arc::new(InMemoryStore::new());
    store.insert(record("forge", HealthStatus::Offline)).unwrap();
    let monitor = HealthMonitor::new(store.clone(), registry(), locator(dir.path()));

    let health = monitor.get_agent_health("Forge").await.unwrap();

    assert_eq!(health.status, HealthStatus::Idle);
    assert!(health.last_seen.is_some());
    let stored = store.get_agent("forge").await.unwrap().unwrap();
    assert_eq!(stored.status, HealthStatus::Idle);
}

#[tokio::test]
async fn test_unknown_agent_reports_unknown() {
    let dir = TempDir::new().unwrap();
    let monitor = HealthMonitor::new(
        Arc::new(InMemoryStore::new()),
        registry(),
        locator(dir.path()),
    );

    let health = monitor.get_agent_health("ghost").await.unwrap();
    assert_eq!(health.status, HealthStatus::Unknown);
    assert!(!health.healthy);
}

#[tokio::test]
async fn test_traversal_id_rejected_without_touching_disk() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("openclaw");
    fs::create_dir_all(&root).unwrap();
    let monitor = HealthMonitor::new(Arc::new(InMemoryStore::new()), registry(), locator(&root));

    let err = monitor.kill("../escape").await.unwrap_err();

    assert!(matches!(err, TelemetryError::PathTraversal(_)));
    assert!(!dir.path().join("escape").exists());
    assert!(!dir.path().join("workspace-..").exists());
}

#[tokio::test]
async fn test_pause_then_resume_round_trips_signal_files() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.insert(record("forge", HealthStatus::Online)).unwrap();
    let monitor = HealthMonitor::new(store.clone(), registry(), locator(dir.path()));

    let paused = monitor.pause("forge").await.unwrap();
    assert_eq!(paused.status, HealthStatus::Paused);
    let pause_file = dir.path().join("workspace-forge/PAUSE");
    assert!(pause_file.is_file());

    let resumed = monitor.resume("forge").await.unwrap();
    assert_eq!(resumed.status, HealthStatus::Idle);
    assert!(!pause_file.exists());

    let actions: Vec<_> = store
        .activity_log()
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec!["paused", "resumed"]);
    // Control actions are audit records, not agent activity.
    assert!(store.last_activity("forge").await.unwrap().is_none());
}

#[tokio::test]
async fn test_sweep_downgrades_and_restarts_stale_agent() {
    let dir = TempDir::new().unwrap();
    session(dir.path(), "forge", Duration::from_secs(3 * 86400));
    let store = Arc::new(InMemoryStore::new());
    store
        .insert(AgentRecord {
            auto_restart: true,
            ..record("forge", HealthStatus::Online)
        })
        .unwrap();
    let monitor = HealthMonitor::new(store.clone(), registry(), locator(dir.path()));

    let sweep = monitor.run_all_health_checks().await.unwrap();

    assert_eq!(sweep.checked, 1);
    assert_eq!(sweep.transitions.len(), 1);
    assert_eq!(sweep.transitions[0].from, HealthStatus::Online);
    assert_ne!(sweep.transitions[0].to, HealthStatus::Online);
    assert_eq!(sweep.restarts, vec!["forge".to_string()]);
    assert!(dir.path().join("workspace-forge/RESTART").is_file());
}

#[tokio::test]
async fn test_sweep_isolates_store_failure() {
    let dir = TempDir::new().unwrap();
    session(dir.path(), "scout", Duration::from_secs(60));
    let inner = InMemoryStore::new();
    inner.insert(record("forge", HealthStatus::Online)).unwrap();
    inner.insert(record("scout", HealthStatus::Online)).unwrap();
    let store = Arc::new(FlakyStore {
        inner,
        broken: "forge".to_string(),
    });
    let monitor = HealthMonitor::new(store.clone(), registry(), locator(dir.path()));

    let sweep = monitor.run_all_health_checks().await.unwrap();

    assert_eq!(sweep.failures, 1);
    assert_eq!(sweep.checked, 1);
    let scout = store.get_agent("scout").await.unwrap().unwrap();
    assert_eq!(scout.status, HealthStatus::Online);
}

#[tokio::test]
async fn test_auto_restart_toggle_needs_row() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let monitor = HealthMonitor::new(store.clone(), registry(), locator(dir.path()));

    assert!(!monitor.set_auto_restart("forge", true).await.unwrap());

    store.upsert_agent("forge", "Forge").await.unwrap();
    assert!(monitor.set_auto_restart("forge", true).await.unwrap());
    let health = monitor.get_agent_health("forge").await.unwrap();
    assert!(health.auto_restart);
}
