//! In-memory fake for the `StateStore` trait
//!
//! `MemoryStateStore` satisfies the full trait contract without external
//! dependencies. A single mutex guards all tables, so `record_cycle` is
//! trivially atomic: the lock is held for the whole commit.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Tables {
    agents: HashMap<String, AgentRecord>,
    trust_history: Vec<TrustChange>,
    executions: Vec<ExecutionRecord>,
    drift_events: Vec<DriftRecord>,
    mutations: Vec<MutationRecord>,
    reflections: Vec<ReflectionRecord>,
    last_cycle: Option<CycleId>,
}

/// In-memory state store backed by a single mutex-guarded table set.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    tables: Mutex<Tables>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn validate_trust(agent_id: &AgentId, trust: f64) -> StorageResult<()> {
    if !(0.0..=1.0).contains(&trust) || trust.is_nan() {
        return Err(StorageError::InvalidTrust {
            agent_id: agent_id.0.clone(),
            score: trust,
        });
    }
    Ok(())
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn upsert_agent(&self, agent: &AgentRecord) -> StorageResult<AgentRecord> {
        validate_trust(&agent.agent_id, agent.trust)?;
        let mut tables = self.tables.lock().unwrap();
        let effective = tables
            .agents
            .entry(agent.agent_id.0.clone())
            .or_insert_with(|| agent.clone());
        Ok(effective.clone())
    }

    async fn load_agents(&self) -> StorageResult<Vec<AgentRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.agents.values().cloned().collect())
    }

    async fn last_cycle(&self) -> StorageResult<Option<CycleId>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.last_cycle)
    }

    async fn record_cycle(&self, delta: &CycleDelta) -> StorageResult<()> {
        for agent in &delta.agents {
            validate_trust(&agent.agent_id, agent.trust)?;
        }

        let mut tables = self.tables.lock().unwrap();
        let cycle = delta.cycle;

        // Resubmission of an already-committed cycle replaces its rows,
        // so a retried commit can never duplicate history entries.
        tables.trust_history.retain(|t| t.cycle != cycle);
        tables.executions.retain(|e| e.cycle != cycle);
        tables.drift_events.retain(|d| d.cycle != cycle);
        tables.mutations.retain(|m| m.cycle != cycle);
        tables.reflections.retain(|r| r.cycle != cycle);

        tables.executions.extend(delta.executions.iter().cloned());
        tables
            .trust_history
            .extend(delta.trust_changes.iter().cloned());
        tables
            .drift_events
            .extend(delta.drift_events.iter().cloned());
        for agent in &delta.agents {
            tables
                .agents
                .insert(agent.agent_id.0.clone(), agent.clone());
        }
        if let Some(mutation) = &delta.mutation {
            tables.mutations.push(mutation.clone());
        }
        tables.reflections.push(delta.reflection.clone());

        tables.last_cycle = Some(match tables.last_cycle {
            Some(prev) if prev > cycle => prev,
            _ => cycle,
        });
        Ok(())
    }

    async fn stats(&self, window: Option<u64>) -> StorageResult<StoreStats> {
        let tables = self.tables.lock().unwrap();

        let floor = match (window, tables.last_cycle) {
            (Some(w), Some(last)) => Some(CycleId(last.0.saturating_sub(w.saturating_sub(1)))),
            _ => None,
        };
        let in_window =
            |cycle: CycleId| -> bool { floor.map(|f| cycle >= f).unwrap_or(true) };

        let mut stats = StoreStats::default();
        for exec in tables.executions.iter().filter(|e| in_window(e.cycle)) {
            stats.executions += 1;
            match exec.success {
                Some(true) => stats.successes += 1,
                Some(false) => stats.failures += 1,
                None => stats.unassigned += 1,
            }
        }

        let mut trust_sum = 0.0;
        for agent in tables.agents.values() {
            trust_sum += agent.trust;
            match agent.status {
                AgentStatus::Active => stats.active_agents += 1,
                AgentStatus::Suppressed | AgentStatus::Probation => {
                    stats.suppressed_agents += 1
                }
                AgentStatus::Excluded => {}
            }
        }
        if !tables.agents.is_empty() {
            stats.average_trust = trust_sum / tables.agents.len() as f64;
        }
        Ok(stats)
    }

    async fn trust_history(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> StorageResult<Vec<TrustChange>> {
        let tables = self.tables.lock().unwrap();
        let mut entries: Vec<TrustChange> = tables
            .trust_history
            .iter()
            .filter(|t| &t.agent_id == agent_id)
            .cloned()
            .collect();
        entries.sort_by_key(|t| std::cmp::Reverse(t.cycle));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn execution_history(
        &self,
        cycle: Option<CycleId>,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut entries: Vec<ExecutionRecord> = tables
            .executions
            .iter()
            .filter(|e| cycle.map(|c| e.cycle == c).unwrap_or(true))
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.cycle));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn drift_history(
        &self,
        agent_id: Option<&AgentId>,
    ) -> StorageResult<Vec<DriftRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut entries: Vec<DriftRecord> = tables
            .drift_events
            .iter()
            .filter(|d| agent_id.map(|a| &d.agent_id == a).unwrap_or(true))
            .cloned()
            .collect();
        entries.sort_by_key(|d| std::cmp::Reverse(d.cycle));
        Ok(entries)
    }

    async fn mutation_history(&self, limit: usize) -> StorageResult<Vec<MutationRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut entries = tables.mutations.clone();
        entries.sort_by_key(|m| std::cmp::Reverse(m.cycle));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn reflections(&self, limit: usize) -> StorageResult<Vec<ReflectionRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut entries = tables.reflections.clone();
        entries.sort_by_key(|r| std::cmp::Reverse(r.cycle));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn latest_thresholds(&self) -> StorageResult<Option<Thresholds>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .mutations
            .iter()
            .max_by_key(|m| m.cycle)
            .map(|m| m.new))
    }
}

/// A store wrapper that fails every write after a configurable point.
///
/// Used by the loop tests to prove that a failed `record_cycle` leaves the
/// registry and engines untouched.
#[derive(Debug, Default)]
pub struct FailingStateStore {
    inner: MemoryStateStore,
    fail_commits: std::sync::atomic::AtomicBool,
}

impl FailingStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record_cycle` fail with a backend error.
    pub fn fail_next_commits(&self) {
        self.fail_commits
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Restore normal commit behavior.
    pub fn heal(&self) {
        self.fail_commits
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for FailingStateStore {
    async fn upsert_agent(&self, agent: &AgentRecord) -> StorageResult<AgentRecord> {
        self.inner.upsert_agent(agent).await
    }

    async fn load_agents(&self) -> StorageResult<Vec<AgentRecord>> {
        self.inner.load_agents().await
    }

    async fn last_cycle(&self) -> StorageResult<Option<CycleId>> {
        self.inner.last_cycle().await
    }

    async fn record_cycle(&self, delta: &CycleDelta) -> StorageResult<()> {
        if self.fail_commits.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StorageError::Backend("injected commit failure".into()));
        }
        self.inner.record_cycle(delta).await
    }

    async fn stats(&self, window: Option<u64>) -> StorageResult<StoreStats> {
        self.inner.stats(window).await
    }

    async fn trust_history(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> StorageResult<Vec<TrustChange>> {
        self.inner.trust_history(agent_id, limit).await
    }

    async fn execution_history(
        &self,
        cycle: Option<CycleId>,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionRecord>> {
        self.inner.execution_history(cycle, limit).await
    }

    async fn drift_history(
        &self,
        agent_id: Option<&AgentId>,
    ) -> StorageResult<Vec<DriftRecord>> {
        self.inner.drift_history(agent_id).await
    }

    async fn mutation_history(&self, limit: usize) -> StorageResult<Vec<MutationRecord>> {
        self.inner.mutation_history(limit).await
    }

    async fn reflections(&self, limit: usize) -> StorageResult<Vec<ReflectionRecord>> {
        self.inner.reflections(limit).await
    }

    async fn latest_thresholds(&self) -> StorageResult<Option<Thresholds>> {
        self.inner.latest_thresholds().await
    }
}
