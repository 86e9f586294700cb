//! Persistence collaborator for agent sessions.
//!
//! The AVAILABLE → BUSY transition must go through
//! [`SessionStore::compare_and_set_status`]; a find followed by a separate
//! `set_status` lets two callers both take the same agent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AgentMetrics, AgentSession, AgentType, MetricDelta, SessionStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_agent_by_type(
        &self,
        agent_type: AgentType,
    ) -> Result<Option<AgentSession>, StoreError>;

    async fn find_agent_by_id(&self, id: Uuid) -> Result<Option<AgentSession>, StoreError>;

    async fn list_agents(&self) -> Result<Vec<AgentSession>, StoreError>;

    /// Set `status = next` only if it is currently `expected`, bumping
    /// `last_active`. Returns the updated row, or `None` when the row is
    /// missing or held a different status.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<Option<AgentSession>, StoreError>;

    /// Unconditional status write. Returns `None` when the row is missing.
    async fn set_status(
        &self,
        id: Uuid,
        next: SessionStatus,
    ) -> Result<Option<AgentSession>, StoreError>;

    /// Bump `last_active` without touching status.
    async fn touch(&self, id: Uuid) -> Result<(), StoreError>;

    async fn record_metric(&self, agent_id: Uuid, delta: MetricDelta) -> Result<(), StoreError>;

    async fn metrics(&self, agent_id: Uuid) -> Result<AgentMetrics, StoreError>;

    /// Find-or-create the row for `agent_type`. Never resets status on an
    /// existing row.
    async fn upsert_agent(
        &self,
        agent_type: AgentType,
        name: &str,
        capabilities: &[String],
    ) -> Result<AgentSession, StoreError>;

    /// Sessions in `status` whose `last_active` is before `older_than`.
    async fn find_stale(
        &self,
        status: SessionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AgentSession>, StoreError>;

    /// BUSY → AVAILABLE, but only while `last_active` is still before
    /// `older_than`. A session re-taken or touched since the scan is kept.
    async fn release_if_idle(
        &self,
        id: Uuid,
        older_than: DateTime<Utc>,
    ) -> Result<Option<AgentSession>, StoreError>;

    /// Backend version string for health checks.
    async fn health(&self) -> Result<String, StoreError>;

    /// Name of this backend (for logging/debug)
    fn backend_name(&self) -> &str;
}
