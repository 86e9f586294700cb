use std::time::Duration;

use thiserror::Error;

use crate::models::{AgentType, SessionStatus};

/// Startup failures: loading config, opening the database.
#[derive(Error, Debug)]
pub enum DropdeskError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Errors raised by a [`SessionStore`](crate::store::SessionStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Failure taxonomy for agent session operations, shared by the backend
/// service, the HTTP transport and the connection controller.
///
/// `Clone` so the controller can keep the last error in its snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("No agent session for {agent_type}")]
    NotFound { agent_type: String },

    #[error("Agent {agent_type} is {status}, expected {expected}")]
    Conflict {
        agent_type: String,
        status: String,
        expected: String,
    },

    #[error("Network error: {0}")]
    Transient(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Agent message failed: {0}")]
    Upstream(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Store error: {0}")]
    Store(String),
}

impl AgentError {
    pub fn not_found(agent_type: impl ToString) -> Self {
        AgentError::NotFound {
            agent_type: agent_type.to_string(),
        }
    }

    pub fn conflict(agent_type: AgentType, status: SessionStatus, expected: SessionStatus) -> Self {
        AgentError::Conflict {
            agent_type: agent_type.to_string(),
            status: status.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Only network-level failures are worth another connect attempt.
    /// A legitimate conflict or a missing row will not fix itself.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AgentError::Transient(_) | AgentError::Timeout(_))
    }

    /// Short machine-readable tag used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::NotFound { .. } => "not_found",
            AgentError::Conflict { .. } => "conflict",
            AgentError::Transient(_) => "transient",
            AgentError::Timeout(_) => "timeout",
            AgentError::Cancelled => "cancelled",
            AgentError::Upstream(_) => "upstream",
            AgentError::InvalidState(_) => "invalid_state",
            AgentError::BadRequest(_) => "bad_request",
            AgentError::Rejected { .. } => "rejected",
            AgentError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        AgentError::Store(e.to_string())
    }
}
