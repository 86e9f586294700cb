//! Dropdesk agent HTTP API
//!
//! Axum server exposing the agent service to connection controllers.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, Value)`; the inner functions are tested directly
//! without axum dispatch.
//!
//! Endpoints:
//! - POST /agent/connect          — lock an AVAILABLE agent (409 if not)
//! - POST /agent/disconnect       — release an agent (idempotent)
//! - POST /agent/message          — send a message to a BUSY agent
//! - GET  /agents                 — list all agent sessions
//! - GET  /agents/:agent_type     — one session plus its metrics
//! - GET  /health                 — store health
//! - GET  /version                — server version info

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dropdesk_core::api::{
    AgentTarget, ConnectRequest, ConnectResponse, DisconnectRequest, DisconnectResponse,
    ErrorBody, MessageRequest,
};
use dropdesk_core::{AgentError, AgentService, AgentType, DropdeskConfig};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub service: Arc<AgentService>,
    pub config: DropdeskConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/agent/connect", post(connect_handler))
        .route("/agent/disconnect", post(disconnect_handler))
        .route("/agent/message", post(message_handler))
        .route("/agents", get(list_agents_handler))
        .route("/agents/:agent_type", get(agent_detail_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .with_state(state)
}

/// Serve on an already bound listener until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;
    Ok(())
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Dropdesk HTTP API listening on http://{}", addr);
    serve(listener, state, shutdown).await
}

// ============================================================================
// Error mapping
// ============================================================================

pub fn status_for(e: &AgentError) -> StatusCode {
    match e {
        AgentError::NotFound { .. } => StatusCode::NOT_FOUND,
        AgentError::Conflict { .. } => StatusCode::CONFLICT,
        AgentError::BadRequest(_) => StatusCode::BAD_REQUEST,
        AgentError::Upstream(_) => StatusCode::BAD_GATEWAY,
        AgentError::Rejected { code, .. } => {
            StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_REQUEST)
        }
        AgentError::Transient(_) | AgentError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::Cancelled | AgentError::InvalidState(_) | AgentError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_response(e: &AgentError) -> (StatusCode, Value) {
    let body = serde_json::to_value(ErrorBody::from(e)).unwrap_or_else(|_| {
        json!({
            "error": e.to_string(),
            "status": "error",
        })
    });
    (status_for(e), body)
}

/// Raw request body to JSON. Bodies are read as bytes so a missing
/// content-type or malformed JSON still gets the standard error body.
fn read_payload(body: &[u8]) -> Result<Value, AgentError> {
    serde_json::from_slice(body).map_err(|e| AgentError::BadRequest(format!("invalid JSON body: {}", e)))
}

fn parse_body<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, AgentError> {
    serde_json::from_value(payload).map_err(|e| AgentError::BadRequest(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> (StatusCode, Value) {
    match serde_json::to_value(value) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => error_response(&AgentError::InvalidState(e.to_string())),
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner connect: AVAILABLE → BUSY via compare-and-swap.
pub async fn connect_inner(service: &AgentService, payload: Value) -> (StatusCode, Value) {
    let req: ConnectRequest = match parse_body(payload) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    match service.connect(req.agent_type).await {
        Ok(agent) => to_json(&ConnectResponse { agent }),
        Err(e) => error_response(&e),
    }
}

/// Inner disconnect: unconditional release, idempotent.
pub async fn disconnect_inner(service: &AgentService, payload: Value) -> (StatusCode, Value) {
    let target = parse_body::<DisconnectRequest>(payload)
        .and_then(|req| AgentTarget::try_from(&req));
    let target = match target {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    match service.disconnect(target).await {
        Ok(_) => to_json(&DisconnectResponse { success: true }),
        Err(e) => error_response(&e),
    }
}

/// Inner message: requires BUSY, never changes status.
pub async fn message_inner(service: &AgentService, payload: Value) -> (StatusCode, Value) {
    let req: MessageRequest = match parse_body(payload) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    match service.send_message(&req).await {
        Ok(reply) => to_json(&reply),
        Err(e) => error_response(&e),
    }
}

pub async fn list_agents_inner(service: &AgentService) -> (StatusCode, Value) {
    match service.list_agents().await {
        Ok(agents) => {
            let count = agents.len();
            match serde_json::to_value(&agents) {
                Ok(list) => (StatusCode::OK, json!({ "agents": list, "count": count })),
                Err(e) => error_response(&AgentError::InvalidState(e.to_string())),
            }
        }
        Err(e) => error_response(&e),
    }
}

pub async fn agent_detail_inner(service: &AgentService, agent_type: &str) -> (StatusCode, Value) {
    let agent_type: AgentType = match agent_type.parse() {
        Ok(t) => t,
        Err(e) => return error_response(&AgentError::BadRequest(format!("{}", e))),
    };

    match service.agent_detail(agent_type).await {
        Ok(detail) => to_json(&detail),
        Err(e) => error_response(&e),
    }
}

/// Inner health check: probes the session store.
pub async fn health_inner(service: &AgentService) -> (StatusCode, Value) {
    let store = service.store();
    match store.health().await {
        Ok(detail) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store.backend_name(),
                "detail": detail,
                "agents": service.registry().len(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "store": store.backend_name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "dropdesk/1",
    })
}

// ============================================================================
// Axum handler wrappers, thin wrappers over the inner functions
// ============================================================================

pub async fn connect_handler(
    State(state): State<Arc<HttpState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = match read_payload(&body) {
        Ok(payload) => connect_inner(&state.service, payload).await,
        Err(e) => error_response(&e),
    };
    (status, Json(body))
}

pub async fn disconnect_handler(
    State(state): State<Arc<HttpState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = match read_payload(&body) {
        Ok(payload) => disconnect_inner(&state.service, payload).await,
        Err(e) => error_response(&e),
    };
    (status, Json(body))
}

pub async fn message_handler(
    State(state): State<Arc<HttpState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = match read_payload(&body) {
        Ok(payload) => message_inner(&state.service, payload).await,
        Err(e) => error_response(&e),
    };
    (status, Json(body))
}

pub async fn list_agents_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = list_agents_inner(&state.service).await;
    (status, Json(body))
}

pub async fn agent_detail_handler(
    State(state): State<Arc<HttpState>>,
    Path(agent_type): Path<String>,
) -> impl IntoResponse {
    let (status, body) = agent_detail_inner(&state.service, &agent_type).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.service).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
