//! The governance loop.
//!
//! Drives exactly one cycle per invocation: prioritize, assign, execute,
//! learn, evaluate lifecycle, mutate, reflect, commit, publish. All
//! learning and lifecycle work happens against shadow values; nothing in
//! the registry or the engines changes until the store accepts the whole
//! cycle. A failed commit discards the shadow and returns a storage fault —
//! trust, status, thresholds, and the cycle counter remain as they were.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use syndic_state::{
    AgentId, AgentRecord, AgentStatus, CycleDelta, CycleId, DriftRecord, ExecutionRecord,
    ReflectionRecord, StateStore, TaskId, Thresholds, TrustChange,
};

use crate::config::GovernanceConfig;
use crate::error::Result;
use crate::events::{
    BreakerScope, EventEnvelope, EventId, EventSink, GovernanceEvent,
};
use crate::executor::{dispatch, ErrorKind, ExecutionOutcome, Executor};
use crate::learning::{apply_outcomes, ObservedOutcome};
use crate::metrics::METRICS;
use crate::mutation::{MutationDecision, MutationEngine, PerformanceTrend};
use crate::obs::{emit_cycle_finished, emit_cycle_rollback, emit_cycle_started, CycleSpan};
use crate::prioritizer::prioritize;
use crate::reflection::{self, CycleFacts};
use crate::registry::{AgentRegistry, RegistryStatistics};
use crate::task::Task;
use crate::trust::{AgentStatusReport, Assignment, LifecycleOutcome, StatusChange, TrustEngine};

/// Overall status of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    /// Every task was unassignable; the cycle committed its execution
    /// records and reflection but ran no learning and no mutation.
    CircuitBreaker,
    /// Cancelled between tasks; nothing was committed.
    Cancelled,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleStatus::Completed => "completed",
            CycleStatus::CircuitBreaker => "circuit_breaker",
            CycleStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-task view of what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    pub success: Option<bool>,
    pub latency_ms: u64,
    pub error_kind: Option<ErrorKind>,
}

/// Summary counters for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CycleStatistics {
    pub assigned: usize,
    pub executed: usize,
    pub successes: usize,
    pub failures: usize,
    pub average_latency_ms: f64,
}

/// Everything the caller learns about one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: CycleId,
    pub status: CycleStatus,
    pub task_outcomes: Vec<TaskOutcome>,
    pub trust_changes: Vec<TrustChange>,
    pub status_changes: Vec<StatusChange>,
    pub drift_events: Vec<DriftRecord>,
    /// Mutation decision, including holds. `None` for breaker and
    /// cancelled cycles, where the mutation engine never ran.
    pub mutation: Option<MutationDecision>,
    /// `None` only for cancelled cycles (nothing was committed).
    pub reflection: Option<ReflectionRecord>,
    pub statistics: CycleStatistics,
}

/// The single orchestrator. Owns the registry and both stateful engines;
/// sub-engines only ever see read-only snapshots and shadow values.
pub struct GovernanceLoop {
    store: Arc<dyn StateStore>,
    registry: AgentRegistry,
    config: GovernanceConfig,
    trust: TrustEngine,
    mutation: MutationEngine,
    sinks: Vec<Arc<dyn EventSink>>,
    next_cycle: CycleId,
    /// Sequence counter for the upcoming cycle's event stream; also covers
    /// registrations announced before the cycle runs. Reset on commit.
    event_seq: std::sync::atomic::AtomicU64,
    cancel: Option<watch::Receiver<bool>>,
}

impl GovernanceLoop {
    /// Validate the configuration, mirror the store into the registry, and
    /// seed both engines from persisted history.
    pub async fn bootstrap(store: Arc<dyn StateStore>, config: GovernanceConfig) -> Result<Self> {
        config.validate()?;

        let registry = AgentRegistry::bootstrap(Arc::clone(&store)).await?;
        let next_cycle = store
            .last_cycle()
            .await?
            .map(CycleId::next)
            .unwrap_or(CycleId(1));

        let mut trust = TrustEngine::new(config.drift_window, config.max_redemption_cycles);
        for agent_id in registry.snapshot().keys() {
            let history = store.trust_history(agent_id, config.drift_window).await?;
            // History reads newest first; windows want oldest first.
            trust.seed_window(agent_id.clone(), history.iter().rev().map(|h| h.new_score));
        }

        let mut mutation = MutationEngine::new(
            config.initial_thresholds(),
            config.mutation_rate,
            config.target_success_rate,
            config.band_low,
            config.band_high,
            config.mutation_window,
            config.mutation_min_window,
        );
        if let Some(thresholds) = store.latest_thresholds().await? {
            mutation.restore_thresholds(thresholds);
        }
        let past = store.mutation_history(config.mutation_window).await?;
        mutation.seed_window(past.iter().rev().map(|m| m.observed_success_rate));

        Ok(GovernanceLoop {
            store,
            registry,
            config,
            trust,
            mutation,
            sinks: Vec::new(),
            next_cycle,
            event_seq: std::sync::atomic::AtomicU64::new(0),
            cancel: None,
        })
    }

    /// Register an event subscriber. Delivery is best-effort.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Install a cancellation channel. Honored between tasks, never
    /// mid-task; a cancelled cycle commits nothing.
    pub fn set_cancellation(&mut self, cancel: watch::Receiver<bool>) {
        self.cancel = Some(cancel);
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Thresholds currently in force (after the last committed mutation).
    pub fn thresholds(&self) -> &Thresholds {
        self.mutation.thresholds()
    }

    pub fn performance_trend(&self) -> PerformanceTrend {
        self.mutation.performance_trend()
    }

    /// Diagnostic report for one agent, if registered.
    pub fn agent_report(&self, agent_id: &AgentId) -> Option<AgentStatusReport> {
        self.registry
            .get(agent_id)
            .map(|record| self.trust.status_report(record))
    }

    pub fn statistics(&self) -> RegistryStatistics {
        self.registry.statistics()
    }

    /// Register an agent and announce it to subscribers.
    pub async fn register_agent(
        &mut self,
        agent_id: impl Into<String>,
        capabilities: std::collections::BTreeSet<String>,
        initial_trust: f64,
    ) -> Result<AgentRecord> {
        let record = self
            .registry
            .register(agent_id, capabilities, initial_trust)
            .await?;
        self.publish(
            self.next_cycle,
            GovernanceEvent::AgentRegistered {
                agent_id: record.agent_id.clone(),
                capabilities: record.capabilities.clone(),
                initial_trust: record.trust,
            },
        );
        Ok(record)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    fn publish(&self, cycle: CycleId, event: GovernanceEvent) {
        let seq = self
            .event_seq
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let envelope = EventEnvelope {
            event_id: EventId::new(),
            cycle,
            seq,
            event,
            timestamp: Utc::now(),
        };
        for sink in &self.sinks {
            sink.deliver(&envelope);
        }
    }

    /// Drive exactly one governance cycle over the given batch.
    pub async fn run_cycle(
        &mut self,
        tasks: Vec<Task>,
        executor: Arc<dyn Executor>,
    ) -> Result<CycleReport> {
        let cycle = self.next_cycle;
        let _span = CycleSpan::enter(cycle);
        let started = Instant::now();

        let snapshot = self.registry.snapshot();
        emit_cycle_started(cycle, tasks.len(), snapshot.len());

        if self.is_cancelled() {
            return Ok(Self::cancelled_report(cycle));
        }

        let ordered = prioritize(tasks, &self.config.priority_weights);
        let thresholds = *self.mutation.thresholds();
        let assignments = self.trust.assign(&ordered, &snapshot, &thresholds);
        let assigned = assignments
            .iter()
            .filter(|a| a.agent_id.is_some())
            .count();

        // Cycle-wide circuit breaker: no task found an agent. The cycle
        // still commits its execution records and reflection, but there is
        // no learning and no mutation.
        if assigned == 0 {
            return self.commit_unassigned_cycle(cycle, assignments, started).await;
        }

        // Fan out to the executor, fan in before learning.
        let jobs: Vec<(usize, Task, crate::registry::AgentView)> = assignments
            .iter()
            .enumerate()
            .filter_map(|(index, a)| {
                let agent_id = a.agent_id.as_ref()?;
                let view = snapshot.get(agent_id)?.clone();
                Some((index, a.task.clone(), view))
            })
            .collect();

        let raw = dispatch(
            Arc::clone(&executor),
            jobs,
            self.config.max_parallel_executions,
            self.config.task_timeout_ms,
            self.cancel.clone(),
        )
        .await;

        if self.is_cancelled() {
            return Ok(Self::cancelled_report(cycle));
        }

        let mut outcome_by_index: BTreeMap<usize, ExecutionOutcome> = raw
            .into_iter()
            .filter_map(|(index, outcome)| outcome.map(|o| (index, o)))
            .collect();
        // A panicked executor task loses its slot at the join boundary;
        // backfill it as an executor fault so learning still sees it.
        for (index, assignment) in assignments.iter().enumerate() {
            if assignment.agent_id.is_some() && !outcome_by_index.contains_key(&index) {
                outcome_by_index.insert(
                    index,
                    ExecutionOutcome::fault(
                        ErrorKind::Executor,
                        0,
                        "executor task panicked".to_string(),
                    ),
                );
            }
        }

        // Learning inputs in task priority order; probation trial verdicts
        // feed the lifecycle evaluation.
        let mut observed = Vec::new();
        let mut trial_success: BTreeMap<AgentId, bool> = BTreeMap::new();
        for (index, assignment) in assignments.iter().enumerate() {
            let (Some(agent_id), Some(outcome)) =
                (&assignment.agent_id, outcome_by_index.get(&index))
            else {
                continue;
            };
            observed.push(ObservedOutcome {
                agent_id: agent_id.clone(),
                success: outcome.success,
            });
            if snapshot[agent_id].status == AgentStatus::Probation {
                trial_success.insert(agent_id.clone(), outcome.success);
            }
        }

        let base: BTreeMap<AgentId, f64> = snapshot
            .iter()
            .map(|(id, view)| (id.clone(), view.trust))
            .collect();
        let (shadow, trust_changes) = apply_outcomes(
            cycle,
            &base,
            &observed,
            self.config.reward_rate,
            self.config.penalty_rate,
        );

        let lifecycle =
            self.trust
                .evaluate_lifecycle(cycle, &snapshot, &shadow, &trial_success, &thresholds);

        let executed = observed.len();
        let successes = observed.iter().filter(|o| o.success).count();
        let success_rate = successes as f64 / executed as f64;
        let decision = self.mutation.evaluate(success_rate);
        let mutation_record = decision.clone().into_record(cycle);

        let breaker_fired = assignments.iter().any(|a| a.agent_id.is_none());
        let facts = CycleFacts {
            breaker_fired,
            assigned,
            executed,
            successes,
            exclusions: lifecycle.excluded().len(),
        };
        let reflection = reflection::evaluate(cycle, &facts, self.config.target_success_rate);

        let now = Utc::now();
        let agents: Vec<AgentRecord> = lifecycle
            .updates
            .iter()
            .filter_map(|update| {
                let mut record = self.registry.get(&update.agent_id)?.clone();
                record.trust = update.trust;
                record.status = update.status;
                record.redemption_cycles_used = update.redemption_cycles_used;
                record.suppression_entered_at = update.suppression_entered_at;
                record.updated_at = now;
                Some(record)
            })
            .collect();

        let task_outcomes = Self::task_outcomes(&assignments, &outcome_by_index);
        let executions = Self::execution_records(cycle, &assignments, &outcome_by_index, now);

        let delta = CycleDelta {
            cycle,
            executions,
            trust_changes: trust_changes.clone(),
            agents,
            drift_events: lifecycle.drift_events.clone(),
            mutation: mutation_record,
            reflection: reflection.clone(),
        };

        // The one suspension point that decides the cycle's fate.
        if let Err(e) = self.store.record_cycle(&delta).await {
            emit_cycle_rollback(cycle, &e);
            return Err(e.into());
        }

        // Commit succeeded: the shadow becomes real.
        self.registry.apply(&delta);
        self.trust.commit_lifecycle(&lifecycle);
        self.mutation.commit(success_rate, &decision);
        self.next_cycle = cycle.next();

        METRICS.inc_cycles_completed();
        METRICS.add_tasks_executed(executed as u64);
        METRICS.add_drift_events(delta.drift_events.len() as u64);
        if delta.mutation.is_some() {
            METRICS.inc_mutations_applied();
        }
        if breaker_fired {
            METRICS.inc_breaker_trips();
        }

        self.publish_cycle_events(cycle, &assignments, &trust_changes, &lifecycle, &decision, &reflection);

        let failures = executed - successes;
        emit_cycle_finished(
            cycle,
            "completed",
            executed,
            successes,
            started.elapsed().as_millis() as u64,
        );

        let total_latency: u64 = task_outcomes.iter().map(|t| t.latency_ms).sum();
        Ok(CycleReport {
            cycle,
            status: CycleStatus::Completed,
            task_outcomes,
            trust_changes,
            status_changes: lifecycle.status_changes.clone(),
            drift_events: lifecycle.drift_events.clone(),
            mutation: Some(decision),
            reflection: Some(reflection),
            statistics: CycleStatistics {
                assigned,
                executed,
                successes,
                failures,
                average_latency_ms: if executed > 0 {
                    total_latency as f64 / executed as f64
                } else {
                    0.0
                },
            },
        })
    }

    /// Commit a cycle in which nothing was assignable (including an empty
    /// batch): execution records with null success plus a reflection, no
    /// learning, no lifecycle evaluation, no mutation.
    async fn commit_unassigned_cycle(
        &mut self,
        cycle: CycleId,
        assignments: Vec<Assignment>,
        started: Instant,
    ) -> Result<CycleReport> {
        let breaker_fired = !assignments.is_empty();
        let facts = CycleFacts {
            breaker_fired,
            assigned: 0,
            executed: 0,
            successes: 0,
            exclusions: 0,
        };
        let reflection = reflection::evaluate(cycle, &facts, self.config.target_success_rate);

        let now = Utc::now();
        let outcome_by_index = BTreeMap::new();
        let task_outcomes = Self::task_outcomes(&assignments, &outcome_by_index);
        let executions = Self::execution_records(cycle, &assignments, &outcome_by_index, now);

        let delta = CycleDelta {
            cycle,
            executions,
            trust_changes: vec![],
            agents: vec![],
            drift_events: vec![],
            mutation: None,
            reflection: reflection.clone(),
        };

        if let Err(e) = self.store.record_cycle(&delta).await {
            emit_cycle_rollback(cycle, &e);
            return Err(e.into());
        }
        self.next_cycle = cycle.next();

        METRICS.inc_cycles_completed();
        if breaker_fired {
            METRICS.inc_breaker_trips();
        }

        for assignment in &assignments {
            self.publish(
                cycle,
                GovernanceEvent::CircuitBreakerTripped {
                    scope: BreakerScope::Task,
                    task_id: Some(assignment.task.task_id.clone()),
                },
            );
        }
        if breaker_fired {
            self.publish(
                cycle,
                GovernanceEvent::CircuitBreakerTripped {
                    scope: BreakerScope::Cycle,
                    task_id: None,
                },
            );
        }
        self.publish(
            cycle,
            GovernanceEvent::ReflectionRecorded {
                constraint_score: reflection.constraint_score,
            },
        );
        self.event_seq
            .store(0, std::sync::atomic::Ordering::SeqCst);

        let status = if breaker_fired {
            CycleStatus::CircuitBreaker
        } else {
            CycleStatus::Completed
        };
        emit_cycle_finished(
            cycle,
            &status.to_string(),
            0,
            0,
            started.elapsed().as_millis() as u64,
        );

        Ok(CycleReport {
            cycle,
            status,
            task_outcomes,
            trust_changes: vec![],
            status_changes: vec![],
            drift_events: vec![],
            mutation: None,
            reflection: Some(reflection),
            statistics: CycleStatistics::default(),
        })
    }

    fn cancelled_report(cycle: CycleId) -> CycleReport {
        CycleReport {
            cycle,
            status: CycleStatus::Cancelled,
            task_outcomes: vec![],
            trust_changes: vec![],
            status_changes: vec![],
            drift_events: vec![],
            mutation: None,
            reflection: None,
            statistics: CycleStatistics::default(),
        }
    }

    /// Publish the committed cycle's events in their canonical order:
    /// task breakers, trust updates, status changes, drift, mutation,
    /// reflection.
    fn publish_cycle_events(
        &self,
        cycle: CycleId,
        assignments: &[Assignment],
        trust_changes: &[TrustChange],
        lifecycle: &LifecycleOutcome,
        decision: &MutationDecision,
        reflection: &ReflectionRecord,
    ) {
        for assignment in assignments.iter().filter(|a| a.agent_id.is_none()) {
            self.publish(
                cycle,
                GovernanceEvent::CircuitBreakerTripped {
                    scope: BreakerScope::Task,
                    task_id: Some(assignment.task.task_id.clone()),
                },
            );
        }
        for change in trust_changes {
            self.publish(
                cycle,
                GovernanceEvent::TrustUpdated {
                    agent_id: change.agent_id.clone(),
                    old: change.old_score,
                    new: change.new_score,
                    outcome: change.outcome,
                },
            );
        }
        for change in &lifecycle.status_changes {
            self.publish(
                cycle,
                GovernanceEvent::StatusChanged {
                    agent_id: change.agent_id.clone(),
                    old: change.old,
                    new: change.new,
                    reason: change.reason,
                },
            );
        }
        for event in &lifecycle.drift_events {
            self.publish(
                cycle,
                GovernanceEvent::DriftDetected {
                    agent_id: event.agent_id.clone(),
                    delta: event.delta,
                },
            );
        }
        if decision.direction != syndic_state::MutationDirection::Hold {
            self.publish(
                cycle,
                GovernanceEvent::ThresholdMutated {
                    old: decision.old,
                    new: decision.new,
                    direction: decision.direction,
                    observed_success_rate: decision.observed_success_rate,
                },
            );
        }
        self.publish(
            cycle,
            GovernanceEvent::ReflectionRecorded {
                constraint_score: reflection.constraint_score,
            },
        );
        self.event_seq
            .store(0, std::sync::atomic::Ordering::SeqCst);
    }

    fn task_outcomes(
        assignments: &[Assignment],
        outcomes: &BTreeMap<usize, ExecutionOutcome>,
    ) -> Vec<TaskOutcome> {
        assignments
            .iter()
            .enumerate()
            .map(|(index, assignment)| {
                let outcome = outcomes.get(&index);
                TaskOutcome {
                    task_id: assignment.task.task_id.clone(),
                    agent_id: assignment.agent_id.clone(),
                    success: outcome.map(|o| o.success),
                    latency_ms: outcome.map(|o| o.latency_ms).unwrap_or(0),
                    error_kind: outcome.and_then(|o| o.error_kind),
                }
            })
            .collect()
    }

    fn execution_records(
        cycle: CycleId,
        assignments: &[Assignment],
        outcomes: &BTreeMap<usize, ExecutionOutcome>,
        now: chrono::DateTime<Utc>,
    ) -> Vec<ExecutionRecord> {
        assignments
            .iter()
            .enumerate()
            .map(|(index, assignment)| {
                let outcome = outcomes.get(&index);
                ExecutionRecord {
                    task_id: assignment.task.task_id.clone(),
                    agent_id: assignment.agent_id.clone(),
                    cycle,
                    success: outcome.map(|o| o.success),
                    latency_ms: outcome.map(|o| o.latency_ms).unwrap_or(0),
                    output: outcome
                        .map(|o| o.output.clone())
                        .unwrap_or(serde_json::Value::Null),
                    error_kind: outcome
                        .and_then(|o| o.error_kind.map(|k| k.as_str().to_string())),
                    timestamp: now,
                }
            })
            .collect()
    }
}
