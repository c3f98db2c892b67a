//! End-to-end telemetry over a scratch OpenClaw tree: status derivation,
//! the live stream, timelines and cost accounting.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use fleetlens::engine::{StatusDeriver, TelemetryService, TimelineKind};
use fleetlens::registry::AgentRegistry;
use fleetlens::transcript::TranscriptParser;
use fleetlens::usage::{PriceTable, UsageAccountant};
use fleetlens::workspace::Locator;
use fleetlens::{AgentIdentity, AgentState, EventKind, TelemetryError};

struct Fleet {
    dir: TempDir,
    registry: Arc<AgentRegistry>,
}

impl Fleet {
    fn new() -> Self {
        let registry = Arc::new(AgentRegistry::new(
            vec![
                AgentIdentity::new("thunder", "Thunder"),
                AgentIdentity::new("forge", "Forge").with_team("Build", "#22c55e"),
                AgentIdentity::new("scout", "Scout"),
            ],
            vec!["thunder".to_string()],
        ));
        Self {
            dir: TempDir::new().unwrap(),
            registry,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn locator(&self) -> Locator {
        Locator::new(self.root(), vec!["main".to_string()])
    }

    fn service(&self) -> TelemetryService {
        TelemetryService::new(self.registry.clone(), self.locator())
    }

    fn session(&self, agent: &str, file: &str, lines: &[String]) -> PathBuf {
        let dir = self.root().join("agents").join(agent).join("sessions");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file);
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }
}

fn age(path: &Path, by: Duration) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - by).unwrap();
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn user(at: &str, text: &str) -> String {
    format!(
        r#"{{"type":"message","timestamp":"{at}","message":{{"role":"user","content":"{text}"}}}}"#
    )
}

fn exec(at: &str, command: &str) -> String {
    format!(
        r#"{{"type":"message","timestamp":"{at}","message":{{"role":"assistant","content":[{{"type":"tool_use","name":"exec","input":{{"command":"{command}"}}}}]}}}}"#
    )
}

fn assistant_usage(at: &str, model: &str, input: u64, output: u64) -> String {
    format!(
        r#"{{"type":"message","timestamp":"{at}","message":{{"role":"assistant","model":"{model}","content":[{{"type":"text","text":"ok"}}],"usage":{{"input":{input},"output":{output}}}}}}}"#
    )
}

#[tokio::test]
async fn test_exec_tool_call_reaches_stream() {
    let fleet = Fleet::new();
    let now = stamp(Utc::now());
    fleet.session("forge", "a.jsonl", &[user(&now, "List files"), exec(&now, "ls -la")]);

    let stream = fleet
        .service()
        .get_global_stream(None, Some("Forge".to_string()))
        .await
        .unwrap();

    let command = stream
        .iter()
        .find(|e| e.kind == EventKind::Command)
        .expect("command entry");
    assert_eq!(command.content, "exec: ls -la");
    assert_eq!(command.agent_id, "forge");
    assert_eq!(command.tool_name.as_deref(), Some("exec"));
    assert!(stream.iter().all(|e| e.agent_id == "forge"));
}

#[tokio::test]
async fn test_session_ten_minutes_old_is_idle() {
    let fleet = Fleet::new();
    let path = fleet.session("forge", "a.jsonl", &[user(&stamp(Utc::now()), "hi")]);
    age(&path, Duration::from_secs(10 * 60));

    let status = fleet.service().get_agent_status("forge").await.unwrap();
    assert_eq!(status.state, AgentState::Idle);
    assert_eq!(status.last_active_str, "10 mins ago");
    assert_eq!(status.session_count, 1);
}

#[tokio::test]
async fn test_orchestrator_reads_alias_sessions_and_stays_active() {
    let fleet = Fleet::new();
    let path = fleet.session("main", "a.jsonl", &[user(&stamp(Utc::now()), "plan")]);
    age(&path, Duration::from_secs(3 * 86400));

    let status = fleet.service().get_agent_status("thunder").await.unwrap();
    assert!(status.is_orchestrator);
    assert_eq!(status.state, AgentState::Active);
    assert_eq!(status.session_count, 1);
}

#[tokio::test]
async fn test_agent_without_sessions_is_offline() {
    let fleet = Fleet::new();

    let status = fleet.service().get_agent_status("scout").await.unwrap();
    assert_eq!(status.state, AgentState::Offline);
    assert_eq!(status.total_tokens, 0);
    assert_eq!(status.estimated_cost, 0.0);
    assert_eq!(status.last_active_str, "Never");
    assert!(status.current_task.is_none());
}

#[tokio::test]
async fn test_unknown_agent_not_found() {
    let fleet = Fleet::new();
    let err = fleet.service().get_agent_detail("ghost").await.unwrap_err();
    assert!(matches!(err, TelemetryError::AgentNotFound(ref id) if id == "ghost"));
}

#[tokio::test]
async fn test_timeline_dedups_across_session_files() {
    let fleet = Fleet::new();
    let at = stamp(Utc::now() - chrono::Duration::minutes(20));
    let shared = [
        user(&at, "Refactor the parser"),
        exec(&at, "cargo fmt"),
        user(&at, "[HEARTBEAT] ping"),
        format!(
            r#"{{"type":"message","timestamp":"{at}","message":{{"role":"assistant","content":[{{"type":"text","text":"HEARTBEAT_OK"}}]}}}}"#
        ),
    ];
    fleet.session("forge", "a.jsonl", &shared);
    fleet.session("forge", "b.jsonl", &shared);

    let timeline = fleet.service().get_agent_timeline("forge", None).await.unwrap();

    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].kind, TimelineKind::Task);
    assert_eq!(timeline[0].title, "Refactor the parser");
    assert_eq!(timeline[1].kind, TimelineKind::ToolCall);
    assert_eq!(timeline[1].title, "exec: cargo fmt");
    assert_eq!(timeline[1].detail, r#"{"command":"cargo fmt"}"#);
    assert!(timeline
        .iter()
        .all(|e| !e.title.contains("HEARTBEAT") && !e.detail.contains("HEARTBEAT")));
}

#[tokio::test]
async fn test_unknown_model_falls_back_to_default_price() {
    let fleet = Fleet::new();
    let now = stamp(Utc::now());
    fleet.session(
        "forge",
        "a.jsonl",
        &[assistant_usage(&now, "acme/unheard-of", 1_000_000, 0)],
    );

    let service = fleet.service();
    let status = service.get_agent_status("forge").await.unwrap();
    assert!((status.estimated_cost - 3.0).abs() < 1e-9);
    assert_eq!(status.current_model.as_deref(), Some("acme/unheard-of"));

    let summary = service.cost_summary().await.unwrap();
    assert!((summary.cost_all_time - 3.0).abs() < 1e-9);
    assert_eq!(summary.most_expensive_agent.as_deref(), Some("Forge"));

    let models = service.by_model().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].model, "acme/unheard-of");
}

#[tokio::test]
async fn test_oversized_usage_does_not_break_fleet_listing() {
    let fleet = Fleet::new();
    let now = stamp(Utc::now());
    fleet.session(
        "forge",
        "a.jsonl",
        &[format!(
            r#"{{"type":"message","timestamp":"{now}","message":{{"role":"assistant","content":[],"usage":{{"input":18446744073709551615,"cacheRead":5,"output":1}}}}}}"#
        )],
    );
    fleet.session("scout", "a.jsonl", &[assistant_usage(&now, "openai/gpt-4o", 10, 5)]);

    let service = fleet.service();
    let statuses = service.list_agent_statuses().await.unwrap();
    assert_eq!(statuses.len(), 3);
    let forge = statuses.iter().find(|s| s.agent_id == "forge").unwrap();
    assert_eq!(forge.tokens_in, u64::MAX);
    assert_eq!(forge.total_tokens, u64::MAX);

    let stats = service.fleet_stats().await.unwrap();
    assert_eq!(stats.total_tokens, u64::MAX);
}

#[tokio::test]
async fn test_fleet_stats_groups_teams() {
    let fleet = Fleet::new();
    fleet.session("forge", "a.jsonl", &[user(&stamp(Utc::now()), "go")]);

    let stats = fleet.service().fleet_stats().await.unwrap();
    assert_eq!(stats.total_agents, 3);
    // thunder is always active, forge just wrote.
    assert_eq!(stats.active_agents, 2);
    assert_eq!(stats.offline_agents, 1);
    assert!(stats.teams.iter().any(|t| t.name == "Build" && t.color == "#22c55e"));
}

#[test]
fn test_derivation_is_deterministic_for_fixed_now() {
    let fleet = Fleet::new();
    let now = Utc::now();
    let at = stamp(now - chrono::Duration::minutes(2));
    fleet.session(
        "forge",
        "a.jsonl",
        &[
            user(&at, "Write the changelog"),
            assistant_usage(&at, "anthropic/claude-sonnet-4-6", 1200, 300),
        ],
    );

    let deriver = StatusDeriver::new(
        fleet.locator(),
        Arc::new(UsageAccountant::new(PriceTable::builtin())),
        TranscriptParser::canonical(),
    );
    let forge = fleet.registry.get("forge").unwrap();

    let first = deriver.derive(&forge, now);
    let second = deriver.derive(&forge, now);
    assert_eq!(first, second);
    assert_eq!(first.current_task.as_deref(), Some("Write the changelog"));
    assert_eq!(first.tokens_in, 1200);
    assert_eq!(first.tokens_out, 300);
}
