use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::engine::{AgentDetail, AgentStatus, FleetStats, StreamEntry, TimelineEvent};
use crate::lifecycle::{AgentHealth, ControlOutcome, DEFAULT_ACTIVITY_ENTRIES};
use crate::storage::ActivityEntry;
use crate::usage::{AgentUsage, CostSummary, DailyUsage, ModelUsage};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub limit: Option<usize>,
    pub agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<u32>,
    pub agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AutoRestartRequest {
    pub enabled: bool,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<AgentStatus>>, ApiError> {
    Ok(Json(state.telemetry.list_agent_statuses().await?))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentDetail>, ApiError> {
    Ok(Json(state.telemetry.get_agent_detail(&id).await?))
}

pub async fn get_agent_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<Vec<TimelineEvent>>, ApiError> {
    Ok(Json(state.telemetry.get_agent_timeline(&id, query.hours).await?))
}

pub async fn get_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Json<Vec<StreamEntry>>, ApiError> {
    Ok(Json(
        state
            .telemetry
            .get_global_stream(query.limit, query.agent)
            .await?,
    ))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<FleetStats>, ApiError> {
    Ok(Json(state.telemetry.fleet_stats().await?))
}

pub async fn get_agent_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentHealth>, ApiError> {
    Ok(Json(state.monitor.get_agent_health(&id).await?))
}

pub async fn force_health_check(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentHealth>, ApiError> {
    Ok(Json(state.monitor.force_health_check(&id).await?))
}

pub async fn set_auto_restart(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AutoRestartRequest>,
) -> Result<Json<Value>, ApiError> {
    if !state.monitor.set_auto_restart(&id, request.enabled).await? {
        return Err(ApiError::NotFound(format!("Agent not found: {}", id)));
    }
    Ok(Json(json!({ "auto_restart": request.enabled })))
}

/// Activity log feed, newest first (default 20, max 100).
pub async fn get_agent_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_ENTRIES);
    Ok(Json(state.monitor.recent_activity(&id, limit).await?))
}

pub async fn kill_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ControlOutcome>, ApiError> {
    Ok(Json(state.monitor.kill(&id).await?))
}

pub async fn pause_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ControlOutcome>, ApiError> {
    Ok(Json(state.monitor.pause(&id).await?))
}

pub async fn resume_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ControlOutcome>, ApiError> {
    Ok(Json(state.monitor.resume(&id).await?))
}

/// All-time token totals per agent.
pub async fn get_tokens(State(state): State<AppState>) -> Result<Json<Vec<AgentUsage>>, ApiError> {
    Ok(Json(state.telemetry.tokens_by_agent(None).await?))
}

pub async fn get_tokens_by_agent(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<Vec<AgentUsage>>, ApiError> {
    let days = Some(query.days.unwrap_or(crate::engine::telemetry::DEFAULT_USAGE_DAYS));
    Ok(Json(state.telemetry.tokens_by_agent(days).await?))
}

pub async fn get_tokens_timeline(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<Vec<DailyUsage>>, ApiError> {
    Ok(Json(
        state
            .telemetry
            .tokens_timeline(query.days, query.agent)
            .await?,
    ))
}

pub async fn get_cost_summary(State(state): State<AppState>) -> Result<Json<CostSummary>, ApiError> {
    Ok(Json(state.telemetry.cost_summary().await?))
}

pub async fn get_models(State(state): State<AppState>) -> Result<Json<Vec<ModelUsage>>, ApiError> {
    Ok(Json(state.telemetry.by_model().await?))
}

/// Server-sent events fed by the broadcaster. Lagged messages are dropped.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.broadcaster.subscribe()).filter_map(|item| {
        let msg = item.ok()?;
        let data = serde_json::to_string(&msg.payload).ok()?;
        Some(Ok(Event::default().event(msg.event).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
