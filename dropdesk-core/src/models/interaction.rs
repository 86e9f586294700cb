use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message/response exchange, kept client-side for history display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub message: String,
    pub response: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
