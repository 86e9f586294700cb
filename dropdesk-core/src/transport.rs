//! Client-side transport to the agent backend.
//!
//! `AgentTransport` is the seam the connection controller talks through:
//! - **HttpTransport**: JSON over HTTP against `dropdesk-server`
//! - tests substitute scripted fakes
//!
//! Every failure is folded into [`AgentError`] so the controller can decide
//! what is worth retrying.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use crate::api::{
    ConnectRequest, ConnectResponse, DisconnectRequest, ErrorBody, MessageRequest,
    MessageResponse,
};
use crate::error::AgentError;
use crate::models::{AgentSession, AgentType, SessionStatus};

#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Lock the agent's session (AVAILABLE → BUSY) and return it.
    async fn connect(&self, agent_type: AgentType) -> Result<AgentSession, AgentError>;

    /// Release the agent's session. Succeeds when it is already released.
    async fn disconnect(&self, agent_type: AgentType) -> Result<(), AgentError>;

    async fn message(&self, req: MessageRequest) -> Result<MessageResponse, AgentError>;
}

// ============================================================================
// HttpTransport
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::InvalidState(format!("http client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, AgentError> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(network_error)
    }
}

fn network_error(e: reqwest::Error) -> AgentError {
    AgentError::Transient(e.to_string())
}

/// Turn a non-2xx response into the matching `AgentError`.
///
/// `expected` is the status the server required for the call, used when
/// rebuilding a conflict.
async fn error_from_response(
    resp: Response,
    agent_type: AgentType,
    expected: SessionStatus,
) -> AgentError {
    let code = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| text.clone());

    match code {
        StatusCode::NOT_FOUND => AgentError::not_found(agent_type),
        StatusCode::CONFLICT => AgentError::Conflict {
            agent_type: agent_type.to_string(),
            status: body
                .and_then(|b| b.current_status)
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            expected: expected.to_string(),
        },
        StatusCode::BAD_GATEWAY => AgentError::Upstream(message),
        c if c.is_client_error() => AgentError::Rejected {
            code: c.as_u16(),
            message,
        },
        c => AgentError::Transient(format!("HTTP {}: {}", c.as_u16(), message)),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, AgentError> {
    resp.json::<T>()
        .await
        .map_err(|e| AgentError::Transient(format!("invalid response body: {}", e)))
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn connect(&self, agent_type: AgentType) -> Result<AgentSession, AgentError> {
        let resp = self
            .post("/agent/connect", &ConnectRequest { agent_type })
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp, agent_type, SessionStatus::Available).await);
        }
        let body: ConnectResponse = decode(resp).await?;
        Ok(body.agent)
    }

    async fn disconnect(&self, agent_type: AgentType) -> Result<(), AgentError> {
        let req = DisconnectRequest {
            agent_type: Some(agent_type),
            agent_id: None,
        };
        let resp = self.post("/agent/disconnect", &req).await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp, agent_type, SessionStatus::Busy).await);
        }
        Ok(())
    }

    async fn message(&self, req: MessageRequest) -> Result<MessageResponse, AgentError> {
        let agent_type = req.agent_type;
        let resp = self.post("/agent/message", &req).await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp, agent_type, SessionStatus::Busy).await);
        }
        decode(resp).await
    }
}
