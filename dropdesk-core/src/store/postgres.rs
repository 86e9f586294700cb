use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::SessionStore;
use crate::error::StoreError;
use crate::models::{
    AgentMetrics, AgentSession, AgentSessionRow, AgentType, MetricDelta, SessionStatus,
};

const SESSION_COLUMNS: &str =
    "id, agent_type, name, department, status, capabilities, last_active, created_at";

/// Postgres-backed store over the `agent_sessions` / `agent_metrics` tables
/// created by [`crate::db::ensure_schema`].
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_session(row: Option<AgentSessionRow>) -> Result<Option<AgentSession>, StoreError> {
    row.map(AgentSession::try_from).transpose()
}

fn to_sessions(rows: Vec<AgentSessionRow>) -> Result<Vec<AgentSession>, StoreError> {
    rows.into_iter().map(AgentSession::try_from).collect()
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_agent_by_type(
        &self,
        agent_type: AgentType,
    ) -> Result<Option<AgentSession>, StoreError> {
        let row: Option<AgentSessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM agent_sessions WHERE agent_type = $1"
        ))
        .bind(agent_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        to_session(row)
    }

    async fn find_agent_by_id(&self, id: Uuid) -> Result<Option<AgentSession>, StoreError> {
        let row: Option<AgentSessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM agent_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        to_session(row)
    }

    async fn list_agents(&self) -> Result<Vec<AgentSession>, StoreError> {
        let rows: Vec<AgentSessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM agent_sessions ORDER BY agent_type"
        ))
        .fetch_all(&self.pool)
        .await?;
        to_sessions(rows)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<Option<AgentSession>, StoreError> {
        // Single conditional UPDATE: Postgres row locking serializes
        // concurrent callers and only one sees `status = expected`.
        let row: Option<AgentSessionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_sessions
            SET status = $3, last_active = now()
            WHERE id = $1 AND status = $2
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .fetch_optional(&self.pool)
        .await?;
        to_session(row)
    }

    async fn set_status(
        &self,
        id: Uuid,
        next: SessionStatus,
    ) -> Result<Option<AgentSession>, StoreError> {
        let row: Option<AgentSessionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_sessions
            SET status = $2, last_active = now()
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(next.as_str())
        .fetch_optional(&self.pool)
        .await?;
        to_session(row)
    }

    async fn touch(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE agent_sessions SET last_active = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_metric(&self, agent_id: Uuid, delta: MetricDelta) -> Result<(), StoreError> {
        let error_inc: i64 = if delta.success { 0 } else { 1 };
        sqlx::query(
            r#"
            INSERT INTO agent_metrics
                (agent_id, interaction_count, error_count, total_latency_ms, updated_at)
            VALUES ($1, 1, $2, $3, now())
            ON CONFLICT (agent_id) DO UPDATE SET
                interaction_count = agent_metrics.interaction_count + 1,
                error_count = agent_metrics.error_count + EXCLUDED.error_count,
                total_latency_ms = agent_metrics.total_latency_ms + EXCLUDED.total_latency_ms,
                updated_at = now()
            "#,
        )
        .bind(agent_id)
        .bind(error_inc)
        .bind(delta.latency_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn metrics(&self, agent_id: Uuid) -> Result<AgentMetrics, StoreError> {
        let row: Option<AgentMetrics> = sqlx::query_as(
            r#"
            SELECT agent_id, interaction_count, error_count, total_latency_ms, updated_at
            FROM agent_metrics
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_else(|| AgentMetrics::empty(agent_id)))
    }

    async fn upsert_agent(
        &self,
        agent_type: AgentType,
        name: &str,
        capabilities: &[String],
    ) -> Result<AgentSession, StoreError> {
        // ON CONFLICT leaves status and last_active alone so reseeding never
        // releases an agent somebody holds.
        let row: AgentSessionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO agent_sessions (id, agent_type, name, department, status, capabilities)
            VALUES ($1, $2, $3, $4, 'AVAILABLE', $5)
            ON CONFLICT (agent_type) DO UPDATE SET
                name = EXCLUDED.name,
                department = EXCLUDED.department,
                capabilities = EXCLUDED.capabilities
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(agent_type.as_str())
        .bind(name)
        .bind(agent_type.department().as_str())
        .bind(capabilities)
        .fetch_one(&self.pool)
        .await?;
        AgentSession::try_from(row)
    }

    async fn find_stale(
        &self,
        status: SessionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AgentSession>, StoreError> {
        let rows: Vec<AgentSessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM agent_sessions
            WHERE status = $1 AND last_active < $2
            ORDER BY last_active ASC
            "#
        ))
        .bind(status.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        to_sessions(rows)
    }

    async fn release_if_idle(
        &self,
        id: Uuid,
        older_than: DateTime<Utc>,
    ) -> Result<Option<AgentSession>, StoreError> {
        let row: Option<AgentSessionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_sessions
            SET status = 'AVAILABLE', last_active = now()
            WHERE id = $1 AND status = 'BUSY' AND last_active < $2
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(older_than)
        .fetch_optional(&self.pool)
        .await?;
        to_session(row)
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn backend_name(&self) -> &str {
        "postgres"
    }
}
