use crate::config::DatabaseConfig;
use crate::error::DropdeskError;
use crate::store::PgSessionStore;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS agent_sessions (
        id UUID PRIMARY KEY,
        agent_type TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        department TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'AVAILABLE',
        capabilities TEXT[] NOT NULL DEFAULT '{}',
        last_active TIMESTAMPTZ NOT NULL DEFAULT now(),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_metrics (
        agent_id UUID PRIMARY KEY REFERENCES agent_sessions(id),
        interaction_count BIGINT NOT NULL DEFAULT 0,
        error_count BIGINT NOT NULL DEFAULT 0,
        total_latency_ms BIGINT NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS agent_sessions_status_idx ON agent_sessions (status, last_active)",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the agent tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Connect, create the schema and wrap the pool in a session store.
pub async fn open_store(config: &DatabaseConfig) -> Result<PgSessionStore, DropdeskError> {
    let pool = create_pool(config).await?;
    ensure_schema(&pool).await?;
    tracing::info!(max_connections = config.max_connections, "Session store ready");
    Ok(PgSessionStore::new(pool))
}
