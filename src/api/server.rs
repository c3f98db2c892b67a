use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::engine::{ChannelBroadcaster, TelemetryService};
use crate::lifecycle::HealthMonitor;

#[derive(Clone)]
pub struct AppState {
    pub telemetry: TelemetryService,
    pub monitor: Arc<HealthMonitor>,
    pub broadcaster: ChannelBroadcaster,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/agents", get(handlers::list_agents))
        .route("/api/agents/:id", get(handlers::get_agent))
        .route("/api/agents/:id/timeline", get(handlers::get_agent_timeline))
        .route("/api/agents/:id/health", get(handlers::get_agent_health))
        .route("/api/agents/:id/health/check", post(handlers::force_health_check))
        .route("/api/agents/:id/health/auto-restart", post(handlers::set_auto_restart))
        .route("/api/agents/:id/activity", get(handlers::get_agent_activity))
        .route("/api/agents/:id/kill", post(handlers::kill_agent))
        .route("/api/agents/:id/pause", post(handlers::pause_agent))
        .route("/api/agents/:id/resume", post(handlers::resume_agent))
        .route("/api/stream", get(handlers::get_stream))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/analytics/tokens", get(handlers::get_tokens))
        .route("/api/analytics/tokens/by-agent", get(handlers::get_tokens_by_agent))
        .route("/api/analytics/tokens/timeline", get(handlers::get_tokens_timeline))
        .route("/api/analytics/cost/summary", get(handlers::get_cost_summary))
        .route("/api/analytics/models", get(handlers::get_models))
        .route("/api/events", get(handlers::stream_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("fleetlens API listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::registry::AgentRegistry;
    use crate::storage::{AgentRecord, AgentStore, InMemoryStore};
    use crate::types::{AgentIdentity, HealthStatus};
    use crate::workspace::Locator;

    struct TestApp {
        dir: TempDir,
        store: Arc<InMemoryStore>,
        router: Router,
    }

    fn create_test_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let sessions = dir.path().join("agents/forge/sessions");
        fs::create_dir_all(&sessions).unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        fs::write(
            sessions.join("s.jsonl"),
            [
                format!(r#"{{"type":"message","timestamp":"{now}","message":{{"role":"user","content":"Ship the release"}}}}"#),
                format!(r#"{{"type":"message","timestamp":"{now}","message":{{"role":"assistant","model":"anthropic/claude-sonnet-4-6","content":[{{"type":"tool_use","name":"exec","input":{{"command":"ls -la"}}}}],"usage":{{"input":1000000,"output":0}}}}}}"#),
            ]
            .join("\n"),
        )
        .unwrap();

        let registry = Arc::new(AgentRegistry::new(
            vec![
                AgentIdentity::new("forge", "Forge"),
                AgentIdentity::new("thunder", "Thunder"),
            ],
            vec!["thunder".to_string()],
        ));
        let locator = Locator::new(dir.path(), vec!["main".to_string()]);
        let store = Arc::new(InMemoryStore::new());
        let state = AppState {
            telemetry: TelemetryService::new(registry.clone(), locator.clone()),
            monitor: Arc::new(HealthMonitor::new(store.clone(), registry, locator)),
            broadcaster: ChannelBroadcaster::default(),
        };
        TestApp {
            dir,
            store,
            router: create_router(state),
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(router, request).await
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app();
        let (status, json) = get_json(app.router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_list_agents() {
        let app = create_test_app();
        let (status, json) = get_json(app.router, "/api/agents").await;

        assert_eq!(status, StatusCode::OK);
        let agents = json.as_array().unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0]["agentId"], "forge");
        assert_eq!(agents[0]["state"], "active");
        assert_eq!(agents[0]["currentTask"], "Ship the release");
        assert_eq!(agents[1]["state"], "active");
    }

    #[tokio::test]
    async fn test_get_agent_detail() {
        let app = create_test_app();
        let (status, json) = get_json(app.router, "/api/agents/Forge").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["agentId"], "forge");
        assert_eq!(json["toolsUsed"][0], "exec");
        assert_eq!(json["recentTranscript"][1]["content"], "exec: ls -la");
    }

    #[tokio::test]
    async fn test_get_agent_not_found() {
        let app = create_test_app();
        let (status, json) = get_json(app.router, "/api/agents/ghost").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_timeline_and_stream() {
        let app = create_test_app();
        let (status, timeline) =
            get_json(app.router.clone(), "/api/agents/forge/timeline?hours=500").await;
        assert_eq!(status, StatusCode::OK);
        let kinds: Vec<_> = timeline
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["task", "tool_call"]);

        let (status, stream) = get_json(app.router, "/api/stream?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stream.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_orchestrator_health_forced_online() {
        let app = create_test_app();
        app.store
            .insert(AgentRecord {
                status: HealthStatus::Offline,
                ..AgentRecord::new("thunder", "Thunder")
            })
            .unwrap();

        let (status, json) = get_json(app.router, "/api/agents/thunder/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "online");
        assert_eq!(json["healthy"], true);
    }

    #[tokio::test]
    async fn test_kill_writes_signal() {
        let app = create_test_app();
        app.store.upsert_agent("forge", "Forge").await.unwrap();

        let (status, json) = post_json(app.router, "/api/agents/forge/kill", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "killed");
        assert_eq!(json["message"], "Kill signal sent");
        assert!(app.dir.path().join("workspace-forge/KILL").is_file());
    }

    #[tokio::test]
    async fn test_activity_feed_after_kill() {
        let app = create_test_app();
        app.store.upsert_agent("forge", "Forge").await.unwrap();

        let (status, _) = post_json(app.router.clone(), "/api/agents/forge/kill", "").await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = get_json(app.router, "/api/agents/Forge/activity?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["action"], "killed");
        assert_eq!(entries[0]["agent_id"], "forge");
    }

    #[tokio::test]
    async fn test_auto_restart_unknown_agent() {
        let app = create_test_app();
        let (status, _) = post_json(
            app.router,
            "/api/agents/forge/health/auto-restart",
            r#"{"enabled":true}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cost_summary() {
        let app = create_test_app();
        let (status, json) = get_json(app.router, "/api/analytics/cost/summary").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cost_all_time"], 3.0);
        assert_eq!(json["most_expensive_agent"], "Forge");
    }
}
