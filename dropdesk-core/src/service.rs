//! Backend agent service: the server side of connect / disconnect / message.
//!
//! - connect: AVAILABLE → BUSY via compare-and-swap; NotFound or Conflict otherwise
//! - disconnect: unconditional → AVAILABLE; idempotent
//! - message: requires BUSY, never changes status, records metrics
//!
//! Collaborators are injected; nothing here reaches for globals.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::api::{AgentDetail, AgentTarget, MessageMetadata, MessageRequest, MessageResponse};
use crate::error::AgentError;
use crate::llm::{ChatOptions, CompletionClient};
use crate::models::{AgentSession, AgentType, MetricDelta, SessionStatus};
use crate::registry::AgentRegistry;
use crate::store::SessionStore;

pub struct AgentService {
    store: Arc<dyn SessionStore>,
    llm: Arc<dyn CompletionClient>,
    registry: AgentRegistry,
    chat_defaults: ChatOptions,
}

impl AgentService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        llm: Arc<dyn CompletionClient>,
        registry: AgentRegistry,
        chat_defaults: ChatOptions,
    ) -> Self {
        Self {
            store,
            llm,
            registry,
            chat_defaults,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    async fn require(&self, agent_type: AgentType) -> Result<AgentSession, AgentError> {
        self.store
            .find_agent_by_type(agent_type)
            .await?
            .ok_or_else(|| AgentError::not_found(agent_type))
    }

    pub async fn connect(&self, agent_type: AgentType) -> Result<AgentSession, AgentError> {
        let session = self.require(agent_type).await?;

        match self
            .store
            .compare_and_set_status(session.id, SessionStatus::Available, SessionStatus::Busy)
            .await?
        {
            Some(locked) => {
                tracing::info!(agent_type = %agent_type, id = %locked.id, "Agent connected");
                Ok(locked)
            }
            None => {
                let current = self
                    .store
                    .find_agent_by_id(session.id)
                    .await?
                    .map(|s| s.status)
                    .unwrap_or(session.status);
                tracing::debug!(agent_type = %agent_type, status = %current, "Connect refused");
                Err(AgentError::conflict(agent_type, current, SessionStatus::Available))
            }
        }
    }

    pub async fn disconnect(&self, target: AgentTarget) -> Result<AgentSession, AgentError> {
        let session = match target {
            AgentTarget::ByType(agent_type) => self.require(agent_type).await?,
            AgentTarget::ById(id) => self
                .store
                .find_agent_by_id(id)
                .await?
                .ok_or_else(|| AgentError::not_found(id))?,
        };

        let released = self
            .store
            .set_status(session.id, SessionStatus::Available)
            .await?
            .ok_or_else(|| AgentError::not_found(session.agent_type))?;

        tracing::info!(
            agent_type = %released.agent_type,
            previous = %session.status,
            "Agent disconnected"
        );
        Ok(released)
    }

    pub async fn send_message(&self, req: &MessageRequest) -> Result<MessageResponse, AgentError> {
        if req.message.trim().is_empty() {
            return Err(AgentError::BadRequest("message must not be empty".to_string()));
        }

        let session = self.require(req.agent_type).await?;
        if session.status != SessionStatus::Busy {
            return Err(AgentError::conflict(
                req.agent_type,
                session.status,
                SessionStatus::Busy,
            ));
        }

        let toolkit = self.registry.get(req.agent_type).ok_or_else(|| {
            AgentError::InvalidState(format!("no toolkit registered for {}", req.agent_type))
        })?;
        let messages = toolkit.build_messages(&req.message, req.context.as_ref());
        let options = toolkit.chat_options(&self.chat_defaults);

        let start = Instant::now();
        let result = self.llm.chat(&messages, &options).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let delta = MetricDelta {
            latency_ms,
            success: result.is_ok(),
        };
        if let Err(e) = self.store.record_metric(session.id, delta).await {
            tracing::warn!(agent_type = %req.agent_type, error = %e, "Failed to record agent metric");
        }

        match result {
            Ok(completion) => {
                if let Err(e) = self.store.touch(session.id).await {
                    tracing::warn!(agent_type = %req.agent_type, error = %e, "Failed to bump last_active");
                }
                tracing::debug!(
                    agent_type = %req.agent_type,
                    latency_ms = latency_ms,
                    llm = self.llm.name(),
                    "Agent message answered"
                );
                Ok(MessageResponse {
                    response: completion.content,
                    metadata: MessageMetadata {
                        agent_type: req.agent_type,
                        model: completion.model,
                        finish_reason: completion.finish_reason,
                        latency_ms,
                    },
                })
            }
            Err(e) => {
                tracing::error!(
                    agent_type = %req.agent_type,
                    llm = self.llm.name(),
                    error = %e,
                    "Completion failed"
                );
                Err(AgentError::Upstream("completion request failed".to_string()))
            }
        }
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentSession>, AgentError> {
        Ok(self.store.list_agents().await?)
    }

    pub async fn agent_detail(&self, agent_type: AgentType) -> Result<AgentDetail, AgentError> {
        let agent = self.require(agent_type).await?;
        let metrics = self.store.metrics(agent.id).await?;
        Ok(AgentDetail::new(agent, metrics))
    }

    /// Release BUSY sessions idle for longer than `idle_timeout`.
    ///
    /// The release re-checks both BUSY and the idle cutoff in one store call,
    /// so a session released and re-taken (or touched) after the scan keeps
    /// its new holder.
    pub async fn release_stale(
        &self,
        idle_timeout: Duration,
    ) -> Result<Vec<AgentSession>, AgentError> {
        let idle = chrono::Duration::from_std(idle_timeout)
            .map_err(|e| AgentError::InvalidState(format!("idle timeout out of range: {}", e)))?;
        let cutoff = Utc::now() - idle;

        let stale = self.store.find_stale(SessionStatus::Busy, cutoff).await?;
        let mut released = Vec::with_capacity(stale.len());

        for session in stale {
            if let Some(freed) = self.store.release_if_idle(session.id, cutoff).await?
            {
                tracing::info!(
                    agent_type = %freed.agent_type,
                    idle_since = %session.last_active,
                    "Released stale agent session"
                );
                released.push(freed);
            }
        }

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::llm::{ChatMessage, Completion, LlmError};
    use crate::models::AgentMetrics;
    use crate::seed::seed_agents;
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Echoes the last user message; fails when `fail` is set.
    #[derive(Default)]
    struct FakeLlm {
        fail: bool,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl CompletionClient for FakeLlm {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<Completion, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.fail {
                return Err(LlmError::Api {
                    code: 503,
                    message: "overloaded".to_string(),
                });
            }
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Completion {
                content: format!("echo: {}", last),
                finish_reason: Some("stop".to_string()),
                model: "fake-1".to_string(),
            })
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    async fn service_with(llm: FakeLlm) -> (AgentService, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let registry = AgentRegistry::with_defaults();
        seed_agents(store.as_ref(), &registry).await.unwrap();
        let service = AgentService::new(
            store.clone(),
            Arc::new(llm),
            registry,
            ChatOptions::default(),
        );
        (service, store)
    }

    fn hello(agent_type: AgentType) -> MessageRequest {
        MessageRequest {
            agent_type,
            message: "hello".to_string(),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_connect_locks_available_agent() {
        let (service, _store) = service_with(FakeLlm::default()).await;
        let before = service.agent_detail(AgentType::CustomerService).await.unwrap().agent;

        let locked = service.connect(AgentType::CustomerService).await.unwrap();
        assert_eq!(locked.status, SessionStatus::Busy);
        assert!(locked.last_active >= before.last_active);
    }

    #[tokio::test]
    async fn test_connect_busy_agent_is_conflict() {
        let (service, _store) = service_with(FakeLlm::default()).await;
        service.connect(AgentType::Marketing).await.unwrap();

        let err = service.connect(AgentType::Marketing).await.unwrap_err();
        assert_eq!(
            err,
            AgentError::conflict(AgentType::Marketing, SessionStatus::Busy, SessionStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_connect_unknown_agent_is_not_found_and_creates_nothing() {
        let store = Arc::new(MemorySessionStore::new());
        let service = AgentService::new(
            store.clone(),
            Arc::new(FakeLlm::default()),
            AgentRegistry::with_defaults(),
            ChatOptions::default(),
        );

        let err = service.connect(AgentType::ProductResearch).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
        assert!(store.list_agents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_connects_have_one_winner() {
        let (service, _store) = service_with(FakeLlm::default()).await;

        let (a, b) = tokio::join!(
            service.connect(AgentType::CustomerService),
            service.connect(AgentType::CustomerService)
        );

        let outcomes = [a, b];
        let wins = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|r| matches!(r, Err(AgentError::Conflict { .. })))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (service, _store) = service_with(FakeLlm::default()).await;
        service.connect(AgentType::OrderProcessing).await.unwrap();

        let target = AgentTarget::ByType(AgentType::OrderProcessing);
        let first = service.disconnect(target).await.unwrap();
        let second = service.disconnect(target).await.unwrap();
        assert_eq!(first.status, SessionStatus::Available);
        assert_eq!(second.status, SessionStatus::Available);
    }

    #[tokio::test]
    async fn test_disconnect_by_unknown_id_is_not_found() {
        let (service, _store) = service_with(FakeLlm::default()).await;
        let err = service
            .disconnect(AgentTarget::ById(uuid::Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_message_requires_busy() {
        let (service, _store) = service_with(FakeLlm::default()).await;
        let err = service.send_message(&hello(AgentType::CustomerService)).await.unwrap_err();
        assert_eq!(
            err,
            AgentError::conflict(
                AgentType::CustomerService,
                SessionStatus::Available,
                SessionStatus::Busy
            )
        );
    }

    #[tokio::test]
    async fn test_message_keeps_status_and_records_metrics() {
        let (service, store) = service_with(FakeLlm::default()).await;
        let locked = service.connect(AgentType::CustomerService).await.unwrap();

        let reply = service.send_message(&hello(AgentType::CustomerService)).await.unwrap();
        assert_eq!(reply.response, "echo: hello");
        assert_eq!(reply.metadata.model, "fake-1");
        assert_eq!(reply.metadata.agent_type, AgentType::CustomerService);

        let after = store.find_agent_by_id(locked.id).await.unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Busy);

        let detail = service.agent_detail(AgentType::CustomerService).await.unwrap();
        assert_eq!(detail.metrics.interaction_count, 1);
        assert_eq!(detail.metrics.error_count, 0);
    }

    #[tokio::test]
    async fn test_llm_failure_is_upstream_and_counts_as_error() {
        let (service, store) = service_with(FakeLlm { fail: true, ..FakeLlm::default() }).await;
        let locked = service.connect(AgentType::MarketAnalysis).await.unwrap();

        let err = service.send_message(&hello(AgentType::MarketAnalysis)).await.unwrap_err();
        assert!(matches!(err, AgentError::Upstream(_)));
        assert!(!err.to_string().contains("overloaded"), "provider details stay server-side");

        let after = store.find_agent_by_id(locked.id).await.unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Busy, "upstream failure must not change status");

        let metrics = store.metrics(locked.id).await.unwrap();
        assert_eq!(metrics.error_count, 1);
        assert!((metrics.error_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_message_uses_toolkit_prompt_and_context() {
        let llm = Arc::new(FakeLlm::default());
        let store = Arc::new(MemorySessionStore::new());
        let registry = AgentRegistry::with_defaults();
        seed_agents(store.as_ref(), &registry).await.unwrap();
        let service = AgentService::new(store, llm.clone(), registry, ChatOptions::default());

        service.connect(AgentType::InventoryManagement).await.unwrap();
        let req = MessageRequest {
            agent_type: AgentType::InventoryManagement,
            message: "anything low?".to_string(),
            context: Some(serde_json::json!({ "warehouse": "EU-1" })),
        };
        service.send_message(&req).await.unwrap();

        let seen = llm.seen.lock().unwrap();
        let sent = &seen[0];
        assert_eq!(sent.len(), 3);
        assert!(sent[0].content.contains("Inventory Management"));
        assert!(sent[1].content.contains("EU-1"));
        assert_eq!(sent[2].content, "anything low?");
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let (service, _store) = service_with(FakeLlm::default()).await;
        service.connect(AgentType::Marketing).await.unwrap();
        let req = MessageRequest {
            agent_type: AgentType::Marketing,
            message: "   ".to_string(),
            context: None,
        };
        assert!(matches!(
            service.send_message(&req).await,
            Err(AgentError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_release_stale_frees_only_idle_busy_sessions() {
        let (service, store) = service_with(FakeLlm::default()).await;
        let mut idle = service.connect(AgentType::SupplierRelations).await.unwrap();
        idle.last_active = Utc::now() - chrono::Duration::hours(3);
        store.insert(idle.clone()).await;
        service.connect(AgentType::Marketing).await.unwrap();

        let released = service.release_stale(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].agent_type, AgentType::SupplierRelations);
        assert_eq!(released[0].status, SessionStatus::Available);

        let marketing = service.agent_detail(AgentType::Marketing).await.unwrap().agent;
        assert_eq!(marketing.status, SessionStatus::Busy);
    }

    /// Hands out the stale scan, then lets a new client release and re-take
    /// every scanned row before the caller acts on it.
    struct RelockingStore {
        inner: MemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for RelockingStore {
        async fn find_agent_by_type(
            &self,
            agent_type: AgentType,
        ) -> Result<Option<AgentSession>, StoreError> {
            self.inner.find_agent_by_type(agent_type).await
        }

        async fn find_agent_by_id(&self, id: Uuid) -> Result<Option<AgentSession>, StoreError> {
            self.inner.find_agent_by_id(id).await
        }

        async fn list_agents(&self) -> Result<Vec<AgentSession>, StoreError> {
            self.inner.list_agents().await
        }

        async fn compare_and_set_status(
            &self,
            id: Uuid,
            expected: SessionStatus,
            next: SessionStatus,
        ) -> Result<Option<AgentSession>, StoreError> {
            self.inner.compare_and_set_status(id, expected, next).await
        }

        async fn set_status(
            &self,
            id: Uuid,
            next: SessionStatus,
        ) -> Result<Option<AgentSession>, StoreError> {
            self.inner.set_status(id, next).await
        }

        async fn touch(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.touch(id).await
        }

        async fn record_metric(&self, agent_id: Uuid, delta: MetricDelta) -> Result<(), StoreError> {
            self.inner.record_metric(agent_id, delta).await
        }

        async fn metrics(&self, agent_id: Uuid) -> Result<AgentMetrics, StoreError> {
            self.inner.metrics(agent_id).await
        }

        async fn upsert_agent(
            &self,
            agent_type: AgentType,
            name: &str,
            capabilities: &[String],
        ) -> Result<AgentSession, StoreError> {
            self.inner.upsert_agent(agent_type, name, capabilities).await
        }

        async fn find_stale(
            &self,
            status: SessionStatus,
            older_than: DateTime<Utc>,
        ) -> Result<Vec<AgentSession>, StoreError> {
            let stale = self.inner.find_stale(status, older_than).await?;
            for session in &stale {
                self.inner.set_status(session.id, SessionStatus::Available).await?;
                self.inner
                    .compare_and_set_status(session.id, SessionStatus::Available, SessionStatus::Busy)
                    .await?;
            }
            Ok(stale)
        }

        async fn release_if_idle(
            &self,
            id: Uuid,
            older_than: DateTime<Utc>,
        ) -> Result<Option<AgentSession>, StoreError> {
            self.inner.release_if_idle(id, older_than).await
        }

        async fn health(&self) -> Result<String, StoreError> {
            self.inner.health().await
        }

        fn backend_name(&self) -> &str {
            "relocking"
        }
    }

    #[tokio::test]
    async fn test_release_stale_spares_session_retaken_after_scan() {
        let inner = MemorySessionStore::new();
        let registry = AgentRegistry::with_defaults();
        seed_agents(&inner, &registry).await.unwrap();
        let mut idle = inner
            .find_agent_by_type(AgentType::CustomerService)
            .await
            .unwrap()
            .unwrap();
        idle.status = SessionStatus::Busy;
        idle.last_active = Utc::now() - chrono::Duration::hours(3);
        inner.insert(idle.clone()).await;

        let store = Arc::new(RelockingStore { inner });
        let service = AgentService::new(
            store.clone(),
            Arc::new(FakeLlm::default()),
            registry,
            ChatOptions::default(),
        );

        let released = service.release_stale(Duration::from_secs(3600)).await.unwrap();
        assert!(released.is_empty());

        let row = store.find_agent_by_id(idle.id).await.unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Busy, "fresh holder keeps the lock");
    }
}
