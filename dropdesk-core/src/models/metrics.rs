use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Running interaction counters for one agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub agent_id: Uuid,
    pub interaction_count: i64,
    pub error_count: i64,
    pub total_latency_ms: i64,
    pub updated_at: DateTime<Utc>,
}

impl AgentMetrics {
    pub fn empty(agent_id: Uuid) -> Self {
        Self {
            agent_id,
            interaction_count: 0,
            error_count: 0,
            total_latency_ms: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, delta: &MetricDelta) {
        self.interaction_count += 1;
        self.total_latency_ms += delta.latency_ms as i64;
        if !delta.success {
            self.error_count += 1;
        }
        self.updated_at = Utc::now();
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.interaction_count == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.interaction_count as f64
    }

    pub fn error_rate(&self) -> f64 {
        if self.interaction_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.interaction_count as f64
    }
}

/// A single interaction's contribution to [`AgentMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDelta {
    pub latency_ms: u64,
    pub success: bool,
}
