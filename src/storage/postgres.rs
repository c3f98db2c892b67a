use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::storage::traits::{ActivityEntry, AgentRecord, AgentStore, AUDIT_ACTIONS};
use crate::types::HealthStatus;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/V001__agent_telemetry.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn agent_from_row(r: &PgRow) -> AgentRecord {
    let status: String = r.get("status");
    AgentRecord {
        id: r.get("id"),
        display_name: r.get("display_name"),
        status: HealthStatus::parse(&status),
        last_active: r.get("last_active"),
        auto_restart: r.get("auto_restart"),
    }
}

fn activity_from_row(r: &PgRow) -> ActivityEntry {
    ActivityEntry {
        agent_id: r.get("agent_id"),
        action: r.get("action"),
        details: r.get("details"),
        created_at: r.get("created_at"),
    }
}

#[async_trait]
impl AgentStore for PostgresStore {
    async fn upsert_agent(&self, id: &str, display_name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, display_name, status, auto_restart, created_at, updated_at)
            VALUES ($1, $2, 'idle', FALSE, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name, updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, status, last_active, COALESCE(auto_restart, FALSE) AS auto_restart
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(agent_from_row))
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, status, last_active, COALESCE(auto_restart, FALSE) AS auto_restart
            FROM agents
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn list_agents_by_status(&self, statuses: &[HealthStatus]) -> Result<Vec<AgentRecord>> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, status, last_active, COALESCE(auto_restart, FALSE) AS auto_restart
            FROM agents
            WHERE status = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn update_status(&self, id: &str, status: HealthStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agents SET status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_status_if(
        &self,
        id: &str,
        expected: HealthStatus,
        status: HealthStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agents SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(status.as_str())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_active(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE agents SET last_active = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_auto_restart(&self, id: &str, enabled: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agents SET auto_restart = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(enabled)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn log_activity(&self, entry: &ActivityEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (agent_id, action, details, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&entry.agent_id)
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_activity(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let audit: Vec<String> = AUDIT_ACTIONS.iter().map(|a| a.to_string()).collect();
        let row = sqlx::query(
            r#"
            SELECT MAX(created_at) AS last
            FROM activity_log
            WHERE agent_id = $1 AND action <> ALL($2)
            "#,
        )
        .bind(id)
        .bind(&audit)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("last"))
    }

    async fn recent_activity(&self, id: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, action, details, created_at
            FROM activity_log
            WHERE agent_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(activity_from_row).collect())
    }
}
