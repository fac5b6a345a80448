//! Storage trait definitions for the Syndic governance plane
//!
//! The single abstraction here is `StateStore`: the durable, transactional
//! home for agents, trust history, executions, drift events, threshold
//! mutations, and reflections. One governance cycle produces one
//! [`CycleDelta`], and `record_cycle` persists it atomically — either the
//! whole cycle is visible or none of it is.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module; `SurrealStore` is the durable
//! backend.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        AgentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a task within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        TaskId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic cycle counter assigned by the governance loop.
///
/// Status changes and history entries are totally ordered by this value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct CycleId(pub u64);

impl CycleId {
    pub fn next(self) -> CycleId {
        CycleId(self.0 + 1)
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cycle-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Agent records
// ---------------------------------------------------------------------------

/// Lifecycle status of an agent.
///
/// `Excluded` is terminal: once an agent reaches it, no later cycle may
/// transition it anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Probation,
    Suppressed,
    Excluded,
}

impl AgentStatus {
    /// Whether the assignment path may consider this agent at all.
    pub fn is_assignable(&self) -> bool {
        matches!(self, AgentStatus::Active | AgentStatus::Probation)
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Excluded)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Active => "active",
            AgentStatus::Probation => "probation",
            AgentStatus::Suppressed => "suppressed",
            AgentStatus::Excluded => "excluded",
        };
        write!(f, "{s}")
    }
}

/// Full durable record for one agent.
///
/// The registry mirrors these in memory, but across a restart the store is
/// the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    /// Opaque capability tags. `BTreeSet` keeps iteration deterministic.
    pub capabilities: BTreeSet<String>,
    /// Trust score, clamped to [0, 1] after every update.
    pub trust: f64,
    pub status: AgentStatus,
    /// Probation attempts consumed while suppressed.
    pub redemption_cycles_used: u32,
    /// Cycle at which the current suppression began, if any.
    pub suppression_entered_at: Option<CycleId>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Construct a fresh `Active` record for registration.
    pub fn new(agent_id: AgentId, capabilities: BTreeSet<String>, initial_trust: f64) -> Self {
        let now = Utc::now();
        AgentRecord {
            agent_id,
            capabilities,
            trust: initial_trust,
            status: AgentStatus::Active,
            redemption_cycles_used: 0,
            suppression_entered_at: None,
            registered_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// History entries
// ---------------------------------------------------------------------------

/// Net outcome driving a trust change within one cycle.
///
/// When an agent executed several tasks in a cycle the per-task updates
/// compose into a single history entry; `Mixed` marks a cycle that carried
/// both successes and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustOutcome {
    Success,
    Failure,
    Mixed,
}

impl std::fmt::Display for TrustOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrustOutcome::Success => "success",
            TrustOutcome::Failure => "failure",
            TrustOutcome::Mixed => "mixed",
        };
        write!(f, "{s}")
    }
}

/// Append-only trust history entry. `(agent_id, cycle)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustChange {
    pub agent_id: AgentId,
    pub cycle: CycleId,
    pub old_score: f64,
    pub new_score: f64,
    pub outcome: TrustOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of one task's fate within a cycle.
///
/// `agent_id = None` with `success = None` marks a per-task circuit breaker:
/// no eligible agent existed for the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    pub cycle: CycleId,
    pub success: Option<bool>,
    pub latency_ms: u64,
    /// Opaque executor output; the core never introspects it.
    pub output: serde_json::Value,
    pub error_kind: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only drift detection record. `(agent_id, cycle)` is unique;
/// resubmitting a cycle must not duplicate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub agent_id: AgentId,
    pub cycle: CycleId,
    /// Gap between the older and newer half-window means.
    pub delta: f64,
    pub window_mean_before: f64,
    pub window_mean_after: f64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Thresholds and mutations
// ---------------------------------------------------------------------------

/// The mutable subset of governance configuration owned by the mutation
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum trust for assignment.
    pub trust_threshold: f64,
    /// Below this, an agent is suppressed at end of cycle.
    pub suppression_threshold: f64,
    /// Half-window mean gap that flags drift.
    pub drift_delta: f64,
}

impl Thresholds {
    /// The invariant every mutation must preserve.
    pub fn ordering_holds(&self) -> bool {
        self.suppression_threshold < self.trust_threshold
    }
}

/// Direction of a threshold mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationDirection {
    Tighten,
    Loosen,
    Hold,
}

impl std::fmt::Display for MutationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationDirection::Tighten => "tighten",
            MutationDirection::Loosen => "loosen",
            MutationDirection::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

/// Append-only record of an applied threshold mutation.
///
/// Only `Tighten` and `Loosen` decisions are persisted; a `Hold` leaves no
/// record (it changes nothing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub cycle: CycleId,
    pub old: Thresholds,
    pub new: Thresholds,
    pub observed_success_rate: f64,
    pub direction: MutationDirection,
    pub timestamp: DateTime<Utc>,
}

/// Per-cycle constraint self-assessment. `constraint_score` is in 0..=4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    pub cycle: CycleId,
    pub constraint_score: u8,
    /// Which constraints were violated, one note each.
    pub notes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cycle delta and aggregates
// ---------------------------------------------------------------------------

/// Everything one governance cycle commits, in one logical transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDelta {
    pub cycle: CycleId,
    pub executions: Vec<ExecutionRecord>,
    pub trust_changes: Vec<TrustChange>,
    /// Post-cycle records for every agent whose trust or status changed.
    pub agents: Vec<AgentRecord>,
    pub drift_events: Vec<DriftRecord>,
    pub mutation: Option<MutationRecord>,
    pub reflection: ReflectionRecord,
}

/// Aggregate counts over a cycle window (or all time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub unassigned: u64,
    pub active_agents: u64,
    pub suppressed_agents: u64,
    pub average_trust: f64,
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Durable, transactional home for all governance state.
///
/// Guarantees:
/// - `record_cycle` is atomic: a failed commit leaves no trace of the delta.
/// - Resubmitting the same cycle replaces that cycle's rows instead of
///   duplicating them (drift idempotence depends on this).
/// - `upsert_agent` preserves the stored trust and status of an existing
///   agent; registration never resets a live record.
/// - History reads are ordered; `(agent_id, cycle)` is unique in trust and
///   drift history.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Idempotent registration. Returns the effective record — the stored
    /// one when the agent already exists, otherwise the one just written.
    async fn upsert_agent(&self, agent: &AgentRecord) -> StorageResult<AgentRecord>;

    /// Snapshot of all registered agents; ordering unspecified.
    async fn load_agents(&self) -> StorageResult<Vec<AgentRecord>>;

    /// Highest committed cycle, if any. Seeds the loop's counter on startup.
    async fn last_cycle(&self) -> StorageResult<Option<CycleId>>;

    /// Atomically persist one cycle's delta.
    async fn record_cycle(&self, delta: &CycleDelta) -> StorageResult<()>;

    /// Aggregate counts over the last `window` cycles, or all time.
    async fn stats(&self, window: Option<u64>) -> StorageResult<StoreStats>;

    /// Trust history for an agent, newest first.
    async fn trust_history(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> StorageResult<Vec<TrustChange>>;

    /// Execution records, newest first, optionally filtered to one cycle.
    async fn execution_history(
        &self,
        cycle: Option<CycleId>,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionRecord>>;

    /// Drift records, newest first, optionally filtered to one agent.
    async fn drift_history(&self, agent_id: Option<&AgentId>) -> StorageResult<Vec<DriftRecord>>;

    /// Applied mutations, newest first.
    async fn mutation_history(&self, limit: usize) -> StorageResult<Vec<MutationRecord>>;

    /// Reflections, newest first.
    async fn reflections(&self, limit: usize) -> StorageResult<Vec<ReflectionRecord>>;

    /// Thresholds from the most recent applied mutation, if any.
    async fn latest_thresholds(&self) -> StorageResult<Option<Thresholds>>;
}
