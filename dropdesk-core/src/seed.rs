//! Idempotent seeding of one session row per registered agent type.

use crate::error::StoreError;
use crate::registry::AgentRegistry;
use crate::store::SessionStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub updated: usize,
}

/// Find-or-create a session for every toolkit in `registry`.
///
/// Safe to run repeatedly: existing rows keep their id and status, only
/// name, department and capabilities are refreshed.
pub async fn seed_agents(
    store: &dyn SessionStore,
    registry: &AgentRegistry,
) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();

    for agent_type in registry.agent_types() {
        let Some(toolkit) = registry.get(agent_type) else {
            continue;
        };
        let existed = store.find_agent_by_type(agent_type).await?.is_some();
        let session = store
            .upsert_agent(agent_type, &agent_type.display_name(), toolkit.capabilities())
            .await?;

        if existed {
            report.updated += 1;
        } else {
            report.created += 1;
            tracing::info!(agent_type = %agent_type, id = %session.id, "Seeded agent session");
        }
    }

    tracing::info!(
        backend = store.backend_name(),
        created = report.created,
        updated = report.updated,
        "Agent seed complete"
    );
    Ok(report)
}
