//! JSON bodies of the agent HTTP API, shared by the server and the client
//! transport. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AgentError;
use crate::models::{AgentMetrics, AgentSession, AgentType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub agent_type: AgentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub agent: AgentSession,
}

/// Either key identifies the session; `agent_id` wins when both are sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentTarget {
    ByType(AgentType),
    ById(Uuid),
}

impl TryFrom<&DisconnectRequest> for AgentTarget {
    type Error = AgentError;

    fn try_from(req: &DisconnectRequest) -> Result<Self, Self::Error> {
        match (req.agent_id, req.agent_type) {
            (Some(id), _) => Ok(AgentTarget::ById(id)),
            (None, Some(t)) => Ok(AgentTarget::ByType(t)),
            (None, None) => Err(AgentError::BadRequest(
                "agentType or agentId is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub agent_type: AgentType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub agent_type: AgentType,
    pub model: String,
    pub finish_reason: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub response: String,
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDetail {
    pub agent: AgentSession,
    pub metrics: AgentMetrics,
    pub average_latency_ms: f64,
    pub error_rate: f64,
}

impl AgentDetail {
    pub fn new(agent: AgentSession, metrics: AgentMetrics) -> Self {
        Self {
            average_latency_ms: metrics.average_latency_ms(),
            error_rate: metrics.error_rate(),
            agent,
            metrics,
        }
    }
}

/// Standard error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub status: String,
    pub kind: String,
    /// Session status at the time of a conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
}

impl From<&AgentError> for ErrorBody {
    fn from(e: &AgentError) -> Self {
        let current_status = match e {
            AgentError::Conflict { status, .. } => Some(status.clone()),
            _ => None,
        };
        Self {
            error: e.to_string(),
            status: "error".to_string(),
            kind: e.kind().to_string(),
            current_status,
        }
    }
}
