//! Agent registry: maps each agent type to its toolkit.
//!
//! A toolkit owns the agent's persona (system prompt), its advertised
//! capabilities, and the templating that turns a user message plus an
//! optional JSON context into the chat messages sent to the LLM.

use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{ChatMessage, ChatOptions};
use crate::models::AgentType;

pub trait AgentToolkit: Send + Sync {
    fn agent_type(&self) -> AgentType;

    fn system_prompt(&self) -> &str;

    fn capabilities(&self) -> &[String];

    /// Per-toolkit overrides of the global completion options.
    fn chat_options(&self, defaults: &ChatOptions) -> ChatOptions {
        defaults.clone()
    }

    fn build_messages(&self, message: &str, context: Option<&serde_json::Value>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        if let Some(ctx) = context.filter(|c| !is_empty_context(c)) {
            messages.push(ChatMessage::system(format!(
                "Context for this request (JSON):\n{}",
                ctx
            )));
        }
        messages.push(ChatMessage::user(message));
        messages
    }
}

fn is_empty_context(ctx: &serde_json::Value) -> bool {
    match ctx {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Built-in toolkit for one department agent.
#[derive(Debug, Clone)]
pub struct DepartmentToolkit {
    agent_type: AgentType,
    system_prompt: String,
    capabilities: Vec<String>,
    temperature: Option<f32>,
}

impl DepartmentToolkit {
    pub fn new(agent_type: AgentType) -> Self {
        let (focus, capabilities, temperature): (&str, &[&str], Option<f32>) = match agent_type {
            AgentType::CustomerService => (
                "answer customer questions about orders, shipping times, returns and refunds. \
                 Be courteous and concise, and escalate anything involving chargebacks",
                &["order_status", "returns", "refunds", "shipping_questions"],
                Some(0.4),
            ),
            AgentType::InventoryManagement => (
                "track stock levels across suppliers, flag low inventory and suggest reorder \
                 quantities based on recent sales velocity",
                &["stock_levels", "reorder_suggestions", "low_stock_alerts"],
                Some(0.2),
            ),
            AgentType::MarketAnalysis => (
                "analyse market trends, competitor listings and seasonal demand for the \
                 store's product categories",
                &["trend_analysis", "competitor_tracking", "demand_forecast"],
                None,
            ),
            AgentType::OrderProcessing => (
                "route incoming orders to the right supplier, detect fulfilment problems and \
                 summarise order pipelines",
                &["order_routing", "fulfilment_tracking", "exception_handling"],
                Some(0.2),
            ),
            AgentType::PricingOptimization => (
                "recommend retail prices from supplier cost, shipping, platform fees and \
                 competitor prices while protecting margin",
                &["price_recommendations", "margin_analysis", "discount_planning"],
                Some(0.3),
            ),
            AgentType::SupplierRelations => (
                "draft supplier communications, compare supplier reliability and summarise \
                 supplier performance",
                &["supplier_outreach", "supplier_scoring", "negotiation_drafts"],
                None,
            ),
            AgentType::ProductResearch => (
                "find and evaluate new products to list, weighing demand, competition, \
                 supplier availability and expected margin",
                &["product_discovery", "niche_evaluation", "listing_ideas"],
                Some(0.8),
            ),
            AgentType::Marketing => (
                "write product descriptions, ad copy and campaign ideas for the store's \
                 sales channels",
                &["product_copy", "ad_campaigns", "email_marketing"],
                Some(0.9),
            ),
        };

        Self {
            agent_type,
            system_prompt: format!(
                "You are the {} agent of a dropshipping store's {} department. Your job is to {}.",
                agent_type.display_name(),
                agent_type.department().as_str().to_lowercase(),
                focus
            ),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            temperature,
        }
    }
}

impl AgentToolkit for DepartmentToolkit {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn chat_options(&self, defaults: &ChatOptions) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            ..defaults.clone()
        }
    }
}

/// In-memory table of toolkits keyed by agent type. No persistence.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    toolkits: HashMap<AgentType, Arc<dyn AgentToolkit>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a [`DepartmentToolkit`] for every agent type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for agent_type in AgentType::ALL {
            registry.register(Arc::new(DepartmentToolkit::new(agent_type)));
        }
        registry
    }

    /// Register a toolkit, replacing any previous one for the same type.
    pub fn register(&mut self, toolkit: Arc<dyn AgentToolkit>) {
        self.toolkits.insert(toolkit.agent_type(), toolkit);
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn AgentToolkit>> {
        self.toolkits.get(&agent_type).cloned()
    }

    pub fn agent_types(&self) -> Vec<AgentType> {
        let mut types: Vec<AgentType> = self.toolkits.keys().copied().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.toolkits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toolkits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_defaults_cover_every_agent_type() {
        let registry = AgentRegistry::with_defaults();
        assert_eq!(registry.len(), AgentType::ALL.len());
        for t in AgentType::ALL {
            let toolkit = registry.get(t).expect("toolkit registered");
            assert_eq!(toolkit.agent_type(), t);
            assert!(!toolkit.capabilities().is_empty());
            assert!(toolkit.system_prompt().contains(&t.display_name()));
        }
    }

    #[test]
    fn test_build_messages_without_context() {
        let toolkit = DepartmentToolkit::new(AgentType::CustomerService);
        let messages = toolkit.build_messages("where is my order?", None);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1], ChatMessage::user("where is my order?"));
    }

    #[test]
    fn test_build_messages_includes_non_empty_context() {
        let toolkit = DepartmentToolkit::new(AgentType::PricingOptimization);
        let ctx = serde_json::json!({ "sku": "LAMP-01", "cost": 12.5 });
        let messages = toolkit.build_messages("price this", Some(&ctx));
        assert_eq!(messages.len(), 3);
        assert!(messages[1].content.contains("LAMP-01"));

        let empty = serde_json::json!({});
        assert_eq!(toolkit.build_messages("price this", Some(&empty)).len(), 2);
    }

    #[test]
    fn test_toolkit_temperature_overrides_default() {
        let defaults = ChatOptions { temperature: 0.7, max_tokens: 300 };
        let marketing = DepartmentToolkit::new(AgentType::Marketing).chat_options(&defaults);
        assert!((marketing.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(marketing.max_tokens, 300);

        let analysis = DepartmentToolkit::new(AgentType::MarketAnalysis).chat_options(&defaults);
        assert!((analysis.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_register_replaces_existing() {
        struct Terse;
        impl AgentToolkit for Terse {
            fn agent_type(&self) -> AgentType {
                AgentType::Marketing
            }
            fn system_prompt(&self) -> &str {
                "Reply in five words."
            }
            fn capabilities(&self) -> &[String] {
                &[]
            }
        }

        let mut registry = AgentRegistry::with_defaults();
        registry.register(Arc::new(Terse));
        assert_eq!(registry.len(), AgentType::ALL.len());
        assert_eq!(
            registry.get(AgentType::Marketing).unwrap().system_prompt(),
            "Reply in five words."
        );
    }
}
