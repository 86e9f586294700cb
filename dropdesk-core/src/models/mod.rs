pub mod agent;
pub mod interaction;
pub mod metrics;

pub use agent::{AgentSession, AgentSessionRow, AgentType, Department, ParseEnumError, SessionStatus};
pub use interaction::InteractionRecord;
pub use metrics::{AgentMetrics, MetricDelta};
