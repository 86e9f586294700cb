use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// The one canonical enumeration of agent types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    CustomerService,
    InventoryManagement,
    MarketAnalysis,
    OrderProcessing,
    PricingOptimization,
    SupplierRelations,
    ProductResearch,
    Marketing,
}

impl AgentType {
    pub const ALL: [AgentType; 8] = [
        AgentType::CustomerService,
        AgentType::InventoryManagement,
        AgentType::MarketAnalysis,
        AgentType::OrderProcessing,
        AgentType::PricingOptimization,
        AgentType::SupplierRelations,
        AgentType::ProductResearch,
        AgentType::Marketing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::CustomerService => "CUSTOMER_SERVICE",
            AgentType::InventoryManagement => "INVENTORY_MANAGEMENT",
            AgentType::MarketAnalysis => "MARKET_ANALYSIS",
            AgentType::OrderProcessing => "ORDER_PROCESSING",
            AgentType::PricingOptimization => "PRICING_OPTIMIZATION",
            AgentType::SupplierRelations => "SUPPLIER_RELATIONS",
            AgentType::ProductResearch => "PRODUCT_RESEARCH",
            AgentType::Marketing => "MARKETING",
        }
    }

    pub fn department(&self) -> Department {
        match self {
            AgentType::CustomerService
            | AgentType::OrderProcessing
            | AgentType::InventoryManagement
            | AgentType::SupplierRelations => Department::Operations,
            AgentType::PricingOptimization => Department::Sales,
            AgentType::MarketAnalysis | AgentType::ProductResearch => Department::Analytics,
            AgentType::Marketing => Department::Marketing,
        }
    }

    /// Human-readable display name, e.g. "Customer Service".
    pub fn display_name(&self) -> String {
        self.as_str()
            .split('_')
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

impl FromStr for AgentType {
    type Err = ParseEnumError;

    /// Accepts `CUSTOMER_SERVICE`, `customer_service` and `customer-service`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                kind: "agent type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Department {
    Operations,
    Sales,
    Analytics,
    Marketing,
}

impl Department {
    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Operations => "OPERATIONS",
            Department::Sales => "SALES",
            Department::Analytics => "ANALYTICS",
            Department::Marketing => "MARKETING",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Department {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPERATIONS" => Ok(Department::Operations),
            "SALES" => Ok(Department::Sales),
            "ANALYTICS" => Ok(Department::Analytics),
            "MARKETING" => Ok(Department::Marketing),
            _ => Err(ParseEnumError {
                kind: "department",
                value: s.to_string(),
            }),
        }
    }
}

/// Durable session status, as stored in the `status` column.
///
/// Client-side transient states (connecting, processing, disconnecting)
/// live in [`ConnectionState`](crate::controller::ConnectionState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Available,
    Busy,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Available => "AVAILABLE",
            SessionStatus::Busy => "BUSY",
            SessionStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SessionStatus::Available),
            "BUSY" => Ok(SessionStatus::Busy),
            "ERROR" => Ok(SessionStatus::Error),
            _ => Err(ParseEnumError {
                kind: "session status",
                value: s.to_string(),
            }),
        }
    }
}

/// One row per agent type; `status` is the source of truth for who holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub id: Uuid,
    pub agent_type: AgentType,
    pub name: String,
    pub department: Department,
    pub status: SessionStatus,
    pub capabilities: Vec<String>,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn new(agent_type: AgentType, name: String, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_type,
            name,
            department: agent_type.department(),
            status: SessionStatus::Available,
            capabilities,
            last_active: now,
            created_at: now,
        }
    }
}

/// Raw `agent_sessions` row; enums are stored as TEXT.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AgentSessionRow {
    pub id: Uuid,
    pub agent_type: String,
    pub name: String,
    pub department: String,
    pub status: String,
    pub capabilities: Vec<String>,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AgentSessionRow> for AgentSession {
    type Error = StoreError;

    fn try_from(row: AgentSessionRow) -> Result<Self, Self::Error> {
        let corrupt = |e: ParseEnumError| StoreError::Corrupt(format!("agent {}: {}", row.id, e));
        Ok(Self {
            id: row.id,
            agent_type: row.agent_type.parse().map_err(corrupt)?,
            department: row.department.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            name: row.name,
            capabilities: row.capabilities,
            last_active: row.last_active,
            created_at: row.created_at,
        })
    }
}
