pub mod api;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod registry;
pub mod retry;
pub mod seed;
pub mod service;
pub mod store;
pub mod transport;

pub use config::DropdeskConfig;
pub use controller::{Activity, ConnectionController, ConnectionState, ControllerSet, ControllerSnapshot};
pub use error::{AgentError, DropdeskError, StoreError};
pub use llm::{create_client, CompletionClient, LlmError, OpenAiClient};
pub use models::{AgentSession, AgentType, Department, SessionStatus};
pub use registry::{AgentRegistry, AgentToolkit, DepartmentToolkit};
pub use retry::{RetryDecision, RetryPolicy};
pub use service::AgentService;
pub use store::{MemorySessionStore, PgSessionStore, SessionStore};
pub use transport::{AgentTransport, HttpTransport};
