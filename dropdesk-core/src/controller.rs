//! Client-side connection controller, one per agent type.
//!
//! ```text
//! Idle ──connect──► Connecting{attempt} ──ok──► Connected(Ready) ◄──► Connected(Processing)
//!   ▲                  │  ▲   retriable failure,          │
//!   │                  │  └── sleep min(base*2^n, cap) ──┘ │
//!   │                  ▼                                   ▼
//!   └──── ok ──── Disconnecting ◄────── disconnect ────────┘
//!                      │
//!          Error(AgentError) ◄── exhausted / non-retriable / failed call
//! ```
//!
//! Every operation starts by bumping a generation counter and replacing the
//! cancellation token, so the latest call wins: a superseded call is
//! cancelled at its next await point, and a result that races past the
//! cancellation is discarded because its generation no longer matches.
//!
//! A connect request that was sent but never answered (superseded or timed
//! out) may still have locked the agent on the backend. The controller
//! remembers that it may hold the lock and releases it before the next
//! connect attempt, and `disconnect()` from Error releases it too.
//!
//! The durable session status (AVAILABLE/BUSY/ERROR) stays in
//! [`AgentSession`]; the transient client states live in [`ConnectionState`].
//! [`ControllerSnapshot`] composes the two.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;

use crate::api::{MessageRequest, MessageResponse};
use crate::error::AgentError;
use crate::models::{AgentSession, AgentType, InteractionRecord};
use crate::retry::RetryPolicy;
use crate::transport::AgentTransport;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Ready,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// `attempt` is 0-indexed; it stays here across backoff sleeps.
    Connecting { attempt: u32 },
    Connected(Activity),
    Disconnecting,
    Error(AgentError),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting { .. } => "CONNECTING",
            ConnectionState::Connected(Activity::Ready) => "CONNECTED",
            ConnectionState::Connected(Activity::Processing) => "PROCESSING",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::Error(_) => "ERROR",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Transient states during which callers should not issue new actions.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting { .. }
                | ConnectionState::Connected(Activity::Processing)
                | ConnectionState::Disconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting { attempt } if *attempt > 0 => {
                write!(f, "CONNECTING (retry {})", attempt)
            }
            ConnectionState::Error(e) => write!(f, "ERROR: {}", e),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub agent_type: AgentType,
    pub state: ConnectionState,
    /// Last session returned by the backend while connected.
    pub session: Option<AgentSession>,
    pub retry_count: u32,
    pub last_error: Option<AgentError>,
    pub last_active: Option<DateTime<Utc>>,
}

impl ControllerSnapshot {
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<AgentSession>,
    retry_count: u32,
    last_error: Option<AgentError>,
    last_active: Option<DateTime<Utc>>,
    history: Vec<InteractionRecord>,
    /// The backend row may be BUSY on our behalf.
    held: bool,
    generation: u64,
    token: CancellationToken,
    closed: bool,
}

// ============================================================================
// ConnectionController
// ============================================================================

pub struct ConnectionController {
    agent_type: AgentType,
    transport: Arc<dyn AgentTransport>,
    policy: RetryPolicy,
    inner: Mutex<Inner>,
    tx: watch::Sender<ControllerSnapshot>,
}

impl ConnectionController {
    pub fn new(
        agent_type: AgentType,
        transport: Arc<dyn AgentTransport>,
        policy: RetryPolicy,
    ) -> Self {
        let inner = Inner {
            state: ConnectionState::Idle,
            session: None,
            retry_count: 0,
            last_error: None,
            last_active: None,
            history: Vec::new(),
            held: false,
            generation: 0,
            token: CancellationToken::new(),
            closed: false,
        };
        let (tx, _rx) = watch::channel(Self::snapshot_of(agent_type, &inner));
        Self {
            agent_type,
            transport,
            policy,
            inner: Mutex::new(inner),
            tx,
        }
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        Self::snapshot_of(self.agent_type, &self.lock())
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    pub fn history(&self) -> Vec<InteractionRecord> {
        self.lock().history.clone()
    }

    /// Whether the backend lock may still be held by this controller.
    pub fn holds_lock(&self) -> bool {
        self.lock().held
    }

    /// Receives a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(agent_type: AgentType, inner: &Inner) -> ControllerSnapshot {
        ControllerSnapshot {
            agent_type,
            state: inner.state.clone(),
            session: inner.session.clone(),
            retry_count: inner.retry_count,
            last_error: inner.last_error.clone(),
            last_active: inner.last_active,
        }
    }

    fn publish(&self, inner: &Inner) {
        self.tx.send_replace(Self::snapshot_of(self.agent_type, inner));
    }

    /// Start a new operation if `allowed` holds: cancel whatever is in
    /// flight, bump the generation and run `enter` under the lock.
    fn begin(
        &self,
        allowed: impl FnOnce(&Inner) -> bool,
        enter: impl FnOnce(&mut Inner),
    ) -> Option<(u64, CancellationToken)> {
        let mut inner = self.lock();
        if inner.closed || !allowed(&inner) {
            return None;
        }
        inner.token.cancel();
        inner.token = CancellationToken::new();
        inner.generation += 1;
        enter(&mut *inner);
        self.publish(&inner);
        Some((inner.generation, inner.token.clone()))
    }

    /// Apply `f` only if `generation` is still current. Returns whether it ran.
    fn apply(&self, generation: u64, f: impl FnOnce(&mut Inner)) -> bool {
        let mut inner = self.lock();
        if inner.closed || inner.generation != generation {
            return false;
        }
        f(&mut *inner);
        self.publish(&inner);
        true
    }

    // ========================================================================
    // connect
    // ========================================================================

    /// Connect, retrying retriable failures per the policy.
    ///
    /// Never fails: the outcome is the returned state, with the last error
    /// kept in the snapshot. A no-op while already connected.
    pub async fn connect(&self) -> ConnectionState {
        let started = self.begin(
            |inner| !inner.state.is_connected(),
            |inner| {
                inner.state = ConnectionState::Connecting { attempt: 0 };
                inner.retry_count = 0;
                inner.last_error = None;
                inner.session = None;
            },
        );
        let Some((generation, token)) = started else {
            return self.state();
        };

        tracing::debug!(agent_type = %self.agent_type, "Connecting");

        let mut attempt: u32 = 0;
        let action = || {
            let n = attempt;
            attempt += 1;
            self.attempt_connect(generation, n)
        };
        let retry = RetryIf::spawn(self.policy.schedule(), action, AgentError::is_retriable);

        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            result = retry => Some(result),
        };

        match outcome {
            None => {
                tracing::debug!(agent_type = %self.agent_type, "Connect superseded");
            }
            Some(Ok(session)) => {
                let applied = self.apply(generation, |inner| {
                    inner.state = ConnectionState::Connected(Activity::Ready);
                    inner.retry_count = 0;
                    inner.last_error = None;
                    inner.last_active = Some(session.last_active);
                    inner.session = Some(session);
                });
                if applied {
                    tracing::info!(agent_type = %self.agent_type, "Agent connected");
                }
            }
            Some(Err(e)) => {
                let applied = self.apply(generation, |inner| {
                    inner.state = ConnectionState::Error(e.clone());
                    inner.last_error = Some(e.clone());
                });
                if applied {
                    tracing::warn!(agent_type = %self.agent_type, error = %e, "Connect failed");
                }
            }
        }

        self.state()
    }

    async fn attempt_connect(&self, generation: u64, attempt: u32) -> Result<AgentSession, AgentError> {
        if attempt > 0 {
            self.apply(generation, |inner| {
                inner.state = ConnectionState::Connecting { attempt };
                inner.retry_count = attempt;
            });
        }

        let still_held = self.release_stray_lock(generation).await;

        // Dropping this future mid-request leaves `held` set.
        self.lock().held = true;
        let limit = self.policy.attempt_timeout();
        let result = match tokio::time::timeout(limit, self.transport.connect(self.agent_type)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(limit)),
        };

        match &result {
            Ok(_) | Err(AgentError::Timeout(_)) => {}
            Err(_) => {
                self.apply(generation, |inner| inner.held = still_held);
            }
        }

        if let Err(e) = &result {
            tracing::debug!(
                agent_type = %self.agent_type,
                attempt = attempt,
                retriable = e.is_retriable(),
                error = %e,
                "Connect attempt failed"
            );
            self.apply(generation, |inner| inner.last_error = Some(e.clone()));
        }
        result
    }

    /// Release a lock left behind by an earlier attempt. Returns whether the
    /// lock may still be held afterwards.
    async fn release_stray_lock(&self, generation: u64) -> bool {
        if !self.lock().held {
            return false;
        }

        let limit = self.policy.attempt_timeout();
        match tokio::time::timeout(limit, self.transport.disconnect(self.agent_type)).await {
            Ok(Ok(())) => {
                self.apply(generation, |inner| inner.held = false);
                tracing::debug!(agent_type = %self.agent_type, "Released stray lock");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(agent_type = %self.agent_type, error = %e, "Stray lock release failed");
                true
            }
            Err(_) => {
                tracing::warn!(agent_type = %self.agent_type, "Stray lock release timed out");
                true
            }
        }
    }

    /// Manual retry from Error, separate from the automatic backoff.
    ///
    /// A session still held from before the error (a failed message, an
    /// abandoned attempt) is released by the first connect attempt.
    pub async fn retry(&self) -> ConnectionState {
        if !matches!(self.state(), ConnectionState::Error(_)) {
            return self.state();
        }
        self.connect().await
    }

    // ========================================================================
    // disconnect
    // ========================================================================

    /// Release the agent. A no-op from Idle, and from Error unless the
    /// backend lock may still be ours.
    pub async fn disconnect(&self) -> ConnectionState {
        let started = self.begin(
            |inner| match inner.state {
                ConnectionState::Connected(_) | ConnectionState::Connecting { .. } => true,
                ConnectionState::Error(_) => inner.held,
                _ => false,
            },
            |inner| inner.state = ConnectionState::Disconnecting,
        );
        let Some((generation, token)) = started else {
            return self.state();
        };

        let limit = self.policy.attempt_timeout();
        let call = tokio::time::timeout(limit, self.transport.disconnect(self.agent_type));
        let result = tokio::select! {
            _ = token.cancelled() => return self.state(),
            result = call => result.unwrap_or(Err(AgentError::Timeout(limit))),
        };

        match result {
            Ok(()) => {
                self.apply(generation, |inner| {
                    inner.state = ConnectionState::Idle;
                    inner.session = None;
                    inner.held = false;
                    inner.retry_count = 0;
                    inner.last_error = None;
                    inner.last_active = Some(Utc::now());
                });
                tracing::info!(agent_type = %self.agent_type, "Agent disconnected");
            }
            Err(e) => {
                tracing::warn!(agent_type = %self.agent_type, error = %e, "Disconnect failed");
                self.apply(generation, |inner| {
                    inner.state = ConnectionState::Error(e.clone());
                    inner.last_error = Some(e);
                });
            }
        }

        self.state()
    }

    // ========================================================================
    // send_message
    // ========================================================================

    /// Send one message. Requires Connected; failures are returned and leave
    /// the controller in Error. A newer call supersedes this one, which then
    /// resolves to `Err(Cancelled)`.
    pub async fn send_message(
        &self,
        message: impl Into<String>,
        context: Option<serde_json::Value>,
    ) -> Result<MessageResponse, AgentError> {
        let message = message.into();
        let (generation, token) = self
            .begin(
                |inner| inner.state.is_connected(),
                |inner| inner.state = ConnectionState::Connected(Activity::Processing),
            )
            .ok_or_else(|| {
                AgentError::InvalidState(format!(
                    "{} is {}, not connected",
                    self.agent_type,
                    self.state().label()
                ))
            })?;

        let req = MessageRequest {
            agent_type: self.agent_type,
            message: message.clone(),
            context,
        };
        let result = tokio::select! {
            _ = token.cancelled() => return Err(AgentError::Cancelled),
            result = self.transport.message(req) => result,
        };

        match result {
            Ok(reply) => {
                let now = Utc::now();
                let record = InteractionRecord {
                    message,
                    response: reply.response.clone(),
                    metadata: serde_json::to_value(&reply.metadata).unwrap_or_default(),
                    timestamp: now,
                };
                let applied = self.apply(generation, |inner| {
                    inner.history.push(record);
                    inner.state = ConnectionState::Connected(Activity::Ready);
                    inner.last_active = Some(now);
                });
                if !applied {
                    return Err(AgentError::Cancelled);
                }
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(agent_type = %self.agent_type, error = %e, "Message failed");
                let applied = self.apply(generation, |inner| {
                    inner.state = ConnectionState::Error(e.clone());
                    inner.last_error = Some(e.clone());
                });
                if !applied {
                    return Err(AgentError::Cancelled);
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // teardown
    // ========================================================================

    /// Cancel pending timers and requests. Nothing is applied afterwards.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.token.cancel();
        inner.closed = true;
        inner.state = ConnectionState::Idle;
        inner.session = None;
        self.publish(&inner);
        tracing::debug!(agent_type = %self.agent_type, "Controller shut down");
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.token.cancel();
    }
}

// ============================================================================
// ControllerSet
// ============================================================================

/// One lazily created controller per agent type, sharing a transport and
/// retry policy.
pub struct ControllerSet {
    transport: Arc<dyn AgentTransport>,
    policy: RetryPolicy,
    controllers: Mutex<HashMap<AgentType, Arc<ConnectionController>>>,
}

impl ControllerSet {
    pub fn new(transport: Arc<dyn AgentTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, agent_type: AgentType) -> Arc<ConnectionController> {
        let mut controllers = self.controllers.lock().unwrap_or_else(PoisonError::into_inner);
        controllers
            .entry(agent_type)
            .or_insert_with(|| {
                Arc::new(ConnectionController::new(
                    agent_type,
                    self.transport.clone(),
                    self.policy,
                ))
            })
            .clone()
    }

    /// Snapshots of every controller created so far, ordered by agent type.
    pub fn snapshots(&self) -> Vec<ControllerSnapshot> {
        let controllers = self.controllers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<ControllerSnapshot> =
            controllers.values().map(|c| c.snapshot()).collect();
        snapshots.sort_by_key(|s| s.agent_type);
        snapshots
    }

    pub fn shutdown_all(&self) {
        let controllers = self.controllers.lock().unwrap_or_else(PoisonError::into_inner);
        for controller in controllers.values() {
            controller.shutdown();
        }
    }
}
