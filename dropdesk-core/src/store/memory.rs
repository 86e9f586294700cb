//! In-memory session store.
//! Used by tests and `--memory` dev mode; not persistent across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::SessionStore;
use crate::error::StoreError;
use crate::models::{AgentMetrics, AgentSession, AgentType, MetricDelta, SessionStatus};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, AgentSession>>,
    metrics: RwLock<HashMap<Uuid, AgentMetrics>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row verbatim.
    pub async fn insert(&self, session: AgentSession) {
        self.sessions.write().await.insert(session.id, session);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_agent_by_type(
        &self,
        agent_type: AgentType,
    ) -> Result<Option<AgentSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.agent_type == agent_type)
            .cloned())
    }

    async fn find_agent_by_id(&self, id: Uuid) -> Result<Option<AgentSession>, StoreError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentSession>, StoreError> {
        let mut all: Vec<AgentSession> = self.sessions.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.agent_type);
        Ok(all)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<Option<AgentSession>, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) if session.status == expected => {
                session.status = next;
                session.last_active = Utc::now();
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_status(
        &self,
        id: Uuid,
        next: SessionStatus,
    ) -> Result<Option<AgentSession>, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(&id).map(|session| {
            session.status = next;
            session.last_active = Utc::now();
            session.clone()
        }))
    }

    async fn touch(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.last_active = Utc::now();
        }
        Ok(())
    }

    async fn record_metric(&self, agent_id: Uuid, delta: MetricDelta) -> Result<(), StoreError> {
        self.metrics
            .write()
            .await
            .entry(agent_id)
            .or_insert_with(|| AgentMetrics::empty(agent_id))
            .apply(&delta);
        Ok(())
    }

    async fn metrics(&self, agent_id: Uuid) -> Result<AgentMetrics, StoreError> {
        Ok(self
            .metrics
            .read()
            .await
            .get(&agent_id)
            .cloned()
            .unwrap_or_else(|| AgentMetrics::empty(agent_id)))
    }

    async fn upsert_agent(
        &self,
        agent_type: AgentType,
        name: &str,
        capabilities: &[String],
    ) -> Result<AgentSession, StoreError> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.values_mut().find(|s| s.agent_type == agent_type) {
            existing.name = name.to_string();
            existing.department = agent_type.department();
            existing.capabilities = capabilities.to_vec();
            return Ok(existing.clone());
        }
        let session = AgentSession::new(agent_type, name.to_string(), capabilities.to_vec());
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_stale(
        &self,
        status: SessionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AgentSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == status && s.last_active < older_than)
            .cloned()
            .collect())
    }

    async fn release_if_idle(
        &self,
        id: Uuid,
        older_than: DateTime<Utc>,
    ) -> Result<Option<AgentSession>, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session)
                if session.status == SessionStatus::Busy && session.last_active < older_than =>
            {
                session.status = SessionStatus::Available;
                session.last_active = Utc::now();
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(format!("memory ({} sessions)", self.sessions.read().await.len()))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
