//! In-memory agent registry.
//!
//! The registry is the hot-path view of the agent pool. On startup it
//! mirrors the store; after every successful cycle commit the loop feeds it
//! the same delta the store accepted. It is never the source of truth
//! across a restart — the store is.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use syndic_state::{
    AgentId, AgentRecord, AgentStatus, CycleDelta, CycleId, StateStore,
};

use crate::error::{GovernanceError, Result};

/// Immutable per-agent view handed to a cycle's sub-engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub capabilities: BTreeSet<String>,
    pub trust: f64,
    pub status: AgentStatus,
    pub redemption_cycles_used: u32,
    pub suppression_entered_at: Option<CycleId>,
}

impl AgentView {
    fn from_record(record: &AgentRecord) -> Self {
        AgentView {
            capabilities: record.capabilities.clone(),
            trust: record.trust,
            status: record.status,
            redemption_cycles_used: record.redemption_cycles_used,
            suppression_entered_at: record.suppression_entered_at,
        }
    }

    /// Whether this agent carries the given capability tag.
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }
}

/// Consistent, immutable snapshot of the pool. `BTreeMap` keeps iteration
/// deterministic, which the assignment and lifecycle passes rely on.
pub type AgentSnapshot = BTreeMap<AgentId, AgentView>;

/// Aggregate view of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RegistryStatistics {
    pub total_agents: usize,
    pub active_agents: usize,
    pub probation_agents: usize,
    pub suppressed_agents: usize,
    pub excluded_agents: usize,
    pub average_trust: f64,
    pub highest_trust: f64,
    pub lowest_trust: f64,
}

/// Store-synchronized registry, exclusively owned by the governance loop.
pub struct AgentRegistry {
    store: Arc<dyn StateStore>,
    agents: BTreeMap<AgentId, AgentRecord>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents)
            .finish()
    }
}

impl AgentRegistry {
    /// Mirror the store into memory.
    ///
    /// Fails with `RegistryInconsistency` when the stored records cannot
    /// form a coherent registry (duplicate ids, trust outside [0, 1]).
    pub async fn bootstrap(store: Arc<dyn StateStore>) -> Result<Self> {
        let records = store.load_agents().await?;
        let mut agents = BTreeMap::new();

        for record in records {
            if !(0.0..=1.0).contains(&record.trust) || record.trust.is_nan() {
                return Err(GovernanceError::RegistryInconsistency(format!(
                    "agent {} has trust {} outside [0, 1]",
                    record.agent_id, record.trust
                )));
            }
            if agents
                .insert(record.agent_id.clone(), record.clone())
                .is_some()
            {
                return Err(GovernanceError::RegistryInconsistency(format!(
                    "duplicate agent id in store: {}",
                    record.agent_id
                )));
            }
        }

        info!(agents = agents.len(), "registry mirrored from store");
        Ok(AgentRegistry { store, agents })
    }

    /// Register an agent: write through the store, then install the
    /// effective record in memory. Registering an existing id is a no-op
    /// that returns the live record.
    pub async fn register(
        &mut self,
        agent_id: impl Into<String>,
        capabilities: BTreeSet<String>,
        initial_trust: f64,
    ) -> Result<AgentRecord> {
        let record = AgentRecord::new(AgentId::new(agent_id), capabilities, initial_trust);
        let effective = self.store.upsert_agent(&record).await?;
        self.agents
            .insert(effective.agent_id.clone(), effective.clone());
        Ok(effective)
    }

    /// Immutable snapshot fed into one cycle. No concurrent cycle can
    /// observe partial updates: the snapshot is a full clone.
    pub fn snapshot(&self) -> AgentSnapshot {
        self.agents
            .iter()
            .map(|(id, record)| (id.clone(), AgentView::from_record(record)))
            .collect()
    }

    /// Apply a committed cycle delta. Must only be called after
    /// `record_cycle` succeeded for the same delta.
    pub fn apply(&mut self, delta: &CycleDelta) {
        for record in &delta.agents {
            self.agents.insert(record.agent_id.clone(), record.clone());
        }
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Aggregate statistics over the in-memory pool.
    pub fn statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics {
            lowest_trust: 1.0,
            ..Default::default()
        };
        if self.agents.is_empty() {
            stats.lowest_trust = 0.0;
            return stats;
        }

        let mut trust_sum = 0.0;
        for record in self.agents.values() {
            stats.total_agents += 1;
            trust_sum += record.trust;
            stats.highest_trust = stats.highest_trust.max(record.trust);
            stats.lowest_trust = stats.lowest_trust.min(record.trust);
            match record.status {
                AgentStatus::Active => stats.active_agents += 1,
                AgentStatus::Probation => stats.probation_agents += 1,
                AgentStatus::Suppressed => stats.suppressed_agents += 1,
                AgentStatus::Excluded => stats.excluded_agents += 1,
            }
        }
        stats.average_trust = trust_sum / stats.total_agents as f64;
        stats
    }
}
