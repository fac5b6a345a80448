//! SurrealDB-backed `StateStore` implementation.
//!
//! Persists agents, trust history, executions, drift events, mutations, and
//! reflections to SurrealDB. The per-cycle commit runs as a single
//! transaction, so a cycle is either fully visible or absent.
//!
//! Connects to any SurrealDB endpoint; `from_env` honors the standard
//! `SURREALDB_*` variables with a local surrealkv fallback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::storage_traits::*;

/// SurrealDB-backed governance state store.
///
/// Tables are created with SCHEMAFULL mode for type safety; the opaque
/// executor output and threshold objects are FLEXIBLE.
#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentRow {
    agent_id: String,
    capabilities: Vec<String>,
    trust: f64,
    status: String,
    redemption_cycles_used: u32,
    suppression_entered_at: Option<u64>,
    registered_at: String,
    updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrustRow {
    agent_id: String,
    cycle: u64,
    old_score: f64,
    new_score: f64,
    outcome: String,
    timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExecutionRow {
    task_id: String,
    agent_id: Option<String>,
    cycle: u64,
    success: Option<bool>,
    latency_ms: u64,
    output: serde_json::Value,
    error_kind: Option<String>,
    timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DriftRow {
    agent_id: String,
    cycle: u64,
    delta: f64,
    window_mean_before: f64,
    window_mean_after: f64,
    timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MutationRow {
    cycle: u64,
    old: serde_json::Value,
    new: serde_json::Value,
    observed_success_rate: f64,
    direction: String,
    timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReflectionRow {
    cycle: u64,
    constraint_score: u8,
    notes: Vec<String>,
    timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CycleRow {
    cycle: u64,
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn parse_timestamp(s: &str, field: &str) -> Result<DateTime<Utc>, StorageError> {
    s.parse()
        .map_err(|e| StorageError::Deserialization(format!("parse {field}: {e}")))
}

fn parse_status(s: &str) -> Result<AgentStatus, StorageError> {
    match s {
        "active" => Ok(AgentStatus::Active),
        "probation" => Ok(AgentStatus::Probation),
        "suppressed" => Ok(AgentStatus::Suppressed),
        "excluded" => Ok(AgentStatus::Excluded),
        other => Err(StorageError::Deserialization(format!(
            "unknown agent status: {other}"
        ))),
    }
}

fn parse_outcome(s: &str) -> Result<TrustOutcome, StorageError> {
    match s {
        "success" => Ok(TrustOutcome::Success),
        "failure" => Ok(TrustOutcome::Failure),
        "mixed" => Ok(TrustOutcome::Mixed),
        other => Err(StorageError::Deserialization(format!(
            "unknown trust outcome: {other}"
        ))),
    }
}

fn parse_direction(s: &str) -> Result<MutationDirection, StorageError> {
    match s {
        "tighten" => Ok(MutationDirection::Tighten),
        "loosen" => Ok(MutationDirection::Loosen),
        "hold" => Ok(MutationDirection::Hold),
        other => Err(StorageError::Deserialization(format!(
            "unknown mutation direction: {other}"
        ))),
    }
}

impl AgentRow {
    fn from_record(record: &AgentRecord) -> Self {
        AgentRow {
            agent_id: record.agent_id.0.clone(),
            capabilities: record.capabilities.iter().cloned().collect(),
            trust: record.trust,
            status: record.status.to_string(),
            redemption_cycles_used: record.redemption_cycles_used,
            suppression_entered_at: record.suppression_entered_at.map(|c| c.0),
            registered_at: record.registered_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }

    fn into_record(self) -> Result<AgentRecord, StorageError> {
        Ok(AgentRecord {
            agent_id: AgentId(self.agent_id),
            capabilities: self.capabilities.into_iter().collect(),
            trust: self.trust,
            status: parse_status(&self.status)?,
            redemption_cycles_used: self.redemption_cycles_used,
            suppression_entered_at: self.suppression_entered_at.map(CycleId),
            registered_at: parse_timestamp(&self.registered_at, "registered_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

impl TrustRow {
    fn from_change(change: &TrustChange) -> Self {
        TrustRow {
            agent_id: change.agent_id.0.clone(),
            cycle: change.cycle.0,
            old_score: change.old_score,
            new_score: change.new_score,
            outcome: change.outcome.to_string(),
            timestamp: change.timestamp.to_rfc3339(),
        }
    }

    fn into_change(self) -> Result<TrustChange, StorageError> {
        Ok(TrustChange {
            agent_id: AgentId(self.agent_id),
            cycle: CycleId(self.cycle),
            old_score: self.old_score,
            new_score: self.new_score,
            outcome: parse_outcome(&self.outcome)?,
            timestamp: parse_timestamp(&self.timestamp, "timestamp")?,
        })
    }
}

impl ExecutionRow {
    fn from_record(record: &ExecutionRecord) -> Self {
        ExecutionRow {
            task_id: record.task_id.0.clone(),
            agent_id: record.agent_id.as_ref().map(|a| a.0.clone()),
            cycle: record.cycle.0,
            success: record.success,
            latency_ms: record.latency_ms,
            output: record.output.clone(),
            error_kind: record.error_kind.clone(),
            timestamp: record.timestamp.to_rfc3339(),
        }
    }

    fn into_record(self) -> Result<ExecutionRecord, StorageError> {
        Ok(ExecutionRecord {
            task_id: TaskId(self.task_id),
            agent_id: self.agent_id.map(AgentId),
            cycle: CycleId(self.cycle),
            success: self.success,
            latency_ms: self.latency_ms,
            output: self.output,
            error_kind: self.error_kind,
            timestamp: parse_timestamp(&self.timestamp, "timestamp")?,
        })
    }
}

impl DriftRow {
    fn from_record(record: &DriftRecord) -> Self {
        DriftRow {
            agent_id: record.agent_id.0.clone(),
            cycle: record.cycle.0,
            delta: record.delta,
            window_mean_before: record.window_mean_before,
            window_mean_after: record.window_mean_after,
            timestamp: record.timestamp.to_rfc3339(),
        }
    }

    fn into_record(self) -> Result<DriftRecord, StorageError> {
        Ok(DriftRecord {
            agent_id: AgentId(self.agent_id),
            cycle: CycleId(self.cycle),
            delta: self.delta,
            window_mean_before: self.window_mean_before,
            window_mean_after: self.window_mean_after,
            timestamp: parse_timestamp(&self.timestamp, "timestamp")?,
        })
    }
}

impl MutationRow {
    fn from_record(record: &MutationRecord) -> Result<Self, StorageError> {
        Ok(MutationRow {
            cycle: record.cycle.0,
            old: serde_json::to_value(record.old)?,
            new: serde_json::to_value(record.new)?,
            observed_success_rate: record.observed_success_rate,
            direction: record.direction.to_string(),
            timestamp: record.timestamp.to_rfc3339(),
        })
    }

    fn into_record(self) -> Result<MutationRecord, StorageError> {
        Ok(MutationRecord {
            cycle: CycleId(self.cycle),
            old: serde_json::from_value(self.old)?,
            new: serde_json::from_value(self.new)?,
            observed_success_rate: self.observed_success_rate,
            direction: parse_direction(&self.direction)?,
            timestamp: parse_timestamp(&self.timestamp, "timestamp")?,
        })
    }
}

impl ReflectionRow {
    fn from_record(record: &ReflectionRecord) -> Self {
        ReflectionRow {
            cycle: record.cycle.0,
            constraint_score: record.constraint_score,
            notes: record.notes.clone(),
            timestamp: record.timestamp.to_rfc3339(),
        }
    }

    fn into_record(self) -> Result<ReflectionRecord, StorageError> {
        Ok(ReflectionRecord {
            cycle: CycleId(self.cycle),
            constraint_score: self.constraint_score,
            notes: self.notes,
            timestamp: parse_timestamp(&self.timestamp, "timestamp")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl SurrealStore {
    /// Create a store from an existing SurrealDB connection.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create and connect to an in-memory SurrealDB for testing.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        db.use_ns("syndic")
            .use_db("governance")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create from environment (`SURREALDB_ENDPOINT` or local fallback).
    ///
    /// Reads `SURREALDB_ENDPOINT`, `SURREALDB_USERNAME`, `SURREALDB_PASSWORD`,
    /// `SURREALDB_NAMESPACE` (default "syndic"), `SURREALDB_DATABASE`
    /// (default "governance"), and `SURREALDB_ROOT`. Without an endpoint,
    /// falls back to a local surrealkv file under `.syndic/state`.
    pub async fn from_env() -> Result<Self, StorageError> {
        if let Ok(endpoint) = std::env::var("SURREALDB_ENDPOINT") {
            let db = surrealdb::engine::any::connect(&endpoint)
                .await
                .map_err(|e| StorageError::Backend(format!("connect to {endpoint}: {e}")))?;

            if let (Ok(user), Ok(pass)) = (
                std::env::var("SURREALDB_USERNAME"),
                std::env::var("SURREALDB_PASSWORD"),
            ) {
                let is_root = std::env::var("SURREALDB_ROOT")
                    .map(|v| v.to_lowercase() == "true")
                    .unwrap_or(false);

                if is_root {
                    db.signin(surrealdb::opt::auth::Root {
                        username: &user,
                        password: &pass,
                    })
                    .await
                    .map_err(|e| StorageError::Backend(format!("root auth: {e}")))?;
                } else {
                    let ns =
                        std::env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "syndic".into());
                    let dbname = std::env::var("SURREALDB_DATABASE")
                        .unwrap_or_else(|_| "governance".into());
                    db.signin(surrealdb::opt::auth::Database {
                        namespace: &ns,
                        database: &dbname,
                        username: &user,
                        password: &pass,
                    })
                    .await
                    .map_err(|e| StorageError::Backend(format!("db auth: {e}")))?;
                }
            }

            let ns = std::env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "syndic".into());
            let dbname =
                std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "governance".into());

            db.use_ns(&ns)
                .use_db(&dbname)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            let store = Self { db };
            store.init_schema().await?;
            Ok(store)
        } else {
            let path = ".syndic/state";
            std::fs::create_dir_all(path).map_err(|e| {
                StorageError::Backend(format!("failed to create state directory {path}: {e}"))
            })?;
            let url = format!("surrealkv://{path}");
            let db = surrealdb::engine::any::connect(&url)
                .await
                .map_err(|e| StorageError::Backend(format!("connect to {url}: {e}")))?;

            db.use_ns("syndic")
                .use_db("governance")
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            let store = Self { db };
            store.init_schema().await?;
            Ok(store)
        }
    }

    /// Initialize the governance schema in SurrealDB.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let schema = r#"
            -- Agents table (single mutable row per agent)
            DEFINE TABLE IF NOT EXISTS agents SCHEMAFULL;
            DEFINE FIELD agent_id ON agents TYPE string;
            DEFINE FIELD capabilities ON agents TYPE array<string>;
            DEFINE FIELD trust ON agents TYPE float;
            DEFINE FIELD status ON agents TYPE string;
            DEFINE FIELD redemption_cycles_used ON agents TYPE int;
            DEFINE FIELD suppression_entered_at ON agents TYPE option<int>;
            DEFINE FIELD registered_at ON agents TYPE string;
            DEFINE FIELD updated_at ON agents TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_agent_id ON agents FIELDS agent_id UNIQUE;

            -- Trust history (append-only)
            DEFINE TABLE IF NOT EXISTS trust_history SCHEMAFULL;
            DEFINE FIELD agent_id ON trust_history TYPE string;
            DEFINE FIELD cycle ON trust_history TYPE int;
            DEFINE FIELD old_score ON trust_history TYPE float;
            DEFINE FIELD new_score ON trust_history TYPE float;
            DEFINE FIELD outcome ON trust_history TYPE string;
            DEFINE FIELD timestamp ON trust_history TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_trust_agent_cycle ON trust_history FIELDS agent_id, cycle UNIQUE;
            DEFINE INDEX IF NOT EXISTS idx_trust_agent_ts ON trust_history FIELDS agent_id, timestamp;

            -- Execution records (append-only)
            DEFINE TABLE IF NOT EXISTS executions SCHEMAFULL;
            DEFINE FIELD task_id ON executions TYPE string;
            DEFINE FIELD agent_id ON executions TYPE option<string>;
            DEFINE FIELD cycle ON executions TYPE int;
            DEFINE FIELD success ON executions TYPE option<bool>;
            DEFINE FIELD latency_ms ON executions TYPE int;
            DEFINE FIELD output ON executions TYPE any;
            DEFINE FIELD error_kind ON executions TYPE option<string>;
            DEFINE FIELD timestamp ON executions TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_exec_cycle ON executions FIELDS cycle;
            DEFINE INDEX IF NOT EXISTS idx_exec_agent_ts ON executions FIELDS agent_id, timestamp;

            -- Drift history (append-only)
            DEFINE TABLE IF NOT EXISTS drift_history SCHEMAFULL;
            DEFINE FIELD agent_id ON drift_history TYPE string;
            DEFINE FIELD cycle ON drift_history TYPE int;
            DEFINE FIELD delta ON drift_history TYPE float;
            DEFINE FIELD window_mean_before ON drift_history TYPE float;
            DEFINE FIELD window_mean_after ON drift_history TYPE float;
            DEFINE FIELD timestamp ON drift_history TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_drift_agent_cycle ON drift_history FIELDS agent_id, cycle UNIQUE;

            -- Threshold mutations (append-only)
            DEFINE TABLE IF NOT EXISTS mutations SCHEMAFULL;
            DEFINE FIELD cycle ON mutations TYPE int;
            DEFINE FIELD old ON mutations FLEXIBLE TYPE object;
            DEFINE FIELD new ON mutations FLEXIBLE TYPE object;
            DEFINE FIELD observed_success_rate ON mutations TYPE float;
            DEFINE FIELD direction ON mutations TYPE string;
            DEFINE FIELD timestamp ON mutations TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_mutation_cycle ON mutations FIELDS cycle UNIQUE;

            -- Reflections (append-only, one per committed cycle)
            DEFINE TABLE IF NOT EXISTS reflections SCHEMAFULL;
            DEFINE FIELD cycle ON reflections TYPE int;
            DEFINE FIELD constraint_score ON reflections TYPE int;
            DEFINE FIELD notes ON reflections TYPE array<string>;
            DEFINE FIELD timestamp ON reflections TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_reflection_cycle ON reflections FIELDS cycle UNIQUE;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;

        debug!("governance schema initialized");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StateStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl StateStore for SurrealStore {
    #[instrument(skip(self, agent), fields(agent = %agent.agent_id))]
    async fn upsert_agent(&self, agent: &AgentRecord) -> StorageResult<AgentRecord> {
        if !(0.0..=1.0).contains(&agent.trust) || agent.trust.is_nan() {
            return Err(StorageError::InvalidTrust {
                agent_id: agent.agent_id.0.clone(),
                score: agent.trust,
            });
        }

        let mut response = self
            .db
            .query("SELECT * FROM agents WHERE agent_id = $aid")
            .bind(("aid", agent.agent_id.0.clone()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let existing: Vec<AgentRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;

        if let Some(row) = existing.into_iter().next() {
            // Registration preserves a live record.
            return row.into_record();
        }

        let row = AgentRow::from_record(agent);
        let _created: Option<AgentRow> = self
            .db
            .create("agents")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(agent = %agent.agent_id, "agent registered");
        Ok(agent.clone())
    }

    async fn load_agents(&self) -> StorageResult<Vec<AgentRecord>> {
        let mut response = self
            .db
            .query("SELECT * FROM agents")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<AgentRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        rows.into_iter().map(AgentRow::into_record).collect()
    }

    async fn last_cycle(&self) -> StorageResult<Option<CycleId>> {
        let mut response = self
            .db
            .query("SELECT cycle FROM reflections ORDER BY cycle DESC LIMIT 1")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<CycleRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        Ok(rows.into_iter().next().map(|r| CycleId(r.cycle)))
    }

    #[instrument(skip(self, delta), fields(cycle = %delta.cycle))]
    async fn record_cycle(&self, delta: &CycleDelta) -> StorageResult<()> {
        for agent in &delta.agents {
            if !(0.0..=1.0).contains(&agent.trust) || agent.trust.is_nan() {
                return Err(StorageError::InvalidTrust {
                    agent_id: agent.agent_id.0.clone(),
                    score: agent.trust,
                });
            }
        }

        let executions: Vec<ExecutionRow> = delta
            .executions
            .iter()
            .map(ExecutionRow::from_record)
            .collect();
        let trust_changes: Vec<TrustRow> = delta
            .trust_changes
            .iter()
            .map(TrustRow::from_change)
            .collect();
        let drift_events: Vec<DriftRow> =
            delta.drift_events.iter().map(DriftRow::from_record).collect();
        let agents: Vec<AgentRow> = delta.agents.iter().map(AgentRow::from_record).collect();
        let agent_ids: Vec<String> = delta
            .agents
            .iter()
            .map(|a| a.agent_id.0.clone())
            .collect();
        let mutations: Vec<MutationRow> = delta
            .mutation
            .iter()
            .map(MutationRow::from_record)
            .collect::<Result<_, _>>()?;
        let reflections = vec![ReflectionRow::from_record(&delta.reflection)];

        // One transaction: either the whole cycle lands or none of it does.
        // The leading deletes make resubmission of a cycle replace its rows.
        let commit = r#"
            BEGIN TRANSACTION;
            DELETE trust_history WHERE cycle = $cycle;
            DELETE executions WHERE cycle = $cycle;
            DELETE drift_history WHERE cycle = $cycle;
            DELETE mutations WHERE cycle = $cycle;
            DELETE reflections WHERE cycle = $cycle;
            DELETE agents WHERE agent_id IN $agent_ids;
            INSERT INTO executions $executions;
            INSERT INTO trust_history $trust_changes;
            INSERT INTO drift_history $drift_events;
            INSERT INTO agents $agents;
            INSERT INTO mutations $mutations;
            INSERT INTO reflections $reflections;
            COMMIT TRANSACTION;
        "#;

        let response = self
            .db
            .query(commit)
            .bind(("cycle", delta.cycle.0))
            .bind(("agent_ids", agent_ids))
            .bind(("executions", executions))
            .bind(("trust_changes", trust_changes))
            .bind(("drift_events", drift_events))
            .bind(("agents", agents))
            .bind(("mutations", mutations))
            .bind(("reflections", reflections))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        response
            .check()
            .map_err(|e| StorageError::Backend(format!("cycle commit: {e}")))?;

        debug!("cycle committed");
        Ok(())
    }

    async fn stats(&self, window: Option<u64>) -> StorageResult<StoreStats> {
        let floor = match (window, self.last_cycle().await?) {
            (Some(w), Some(last)) => Some(last.0.saturating_sub(w.saturating_sub(1))),
            _ => None,
        };

        let mut response = match floor {
            Some(f) => self
                .db
                .query("SELECT * FROM executions WHERE cycle >= $floor")
                .bind(("floor", f))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            None => self
                .db
                .query("SELECT * FROM executions")
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        };
        let exec_rows: Vec<ExecutionRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;

        let mut stats = StoreStats::default();
        for row in &exec_rows {
            stats.executions += 1;
            match row.success {
                Some(true) => stats.successes += 1,
                Some(false) => stats.failures += 1,
                None => stats.unassigned += 1,
            }
        }

        let agents = self.load_agents().await?;
        let mut trust_sum = 0.0;
        for agent in &agents {
            trust_sum += agent.trust;
            match agent.status {
                AgentStatus::Active => stats.active_agents += 1,
                AgentStatus::Suppressed | AgentStatus::Probation => {
                    stats.suppressed_agents += 1
                }
                AgentStatus::Excluded => {}
            }
        }
        if !agents.is_empty() {
            stats.average_trust = trust_sum / agents.len() as f64;
        }
        Ok(stats)
    }

    async fn trust_history(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> StorageResult<Vec<TrustChange>> {
        let mut response = self
            .db
            .query("SELECT * FROM trust_history WHERE agent_id = $aid ORDER BY cycle DESC LIMIT $limit")
            .bind(("aid", agent_id.0.clone()))
            .bind(("limit", limit as u64))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<TrustRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        rows.into_iter().map(TrustRow::into_change).collect()
    }

    async fn execution_history(
        &self,
        cycle: Option<CycleId>,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionRecord>> {
        let mut response = match cycle {
            Some(c) => self
                .db
                .query("SELECT * FROM executions WHERE cycle = $cycle ORDER BY timestamp DESC LIMIT $limit")
                .bind(("cycle", c.0))
                .bind(("limit", limit as u64))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            None => self
                .db
                .query("SELECT * FROM executions ORDER BY cycle DESC LIMIT $limit")
                .bind(("limit", limit as u64))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        };
        let rows: Vec<ExecutionRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        rows.into_iter().map(ExecutionRow::into_record).collect()
    }

    async fn drift_history(
        &self,
        agent_id: Option<&AgentId>,
    ) -> StorageResult<Vec<DriftRecord>> {
        let mut response = match agent_id {
            Some(aid) => self
                .db
                .query("SELECT * FROM drift_history WHERE agent_id = $aid ORDER BY cycle DESC")
                .bind(("aid", aid.0.clone()))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            None => self
                .db
                .query("SELECT * FROM drift_history ORDER BY cycle DESC")
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        };
        let rows: Vec<DriftRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        rows.into_iter().map(DriftRow::into_record).collect()
    }

    async fn mutation_history(&self, limit: usize) -> StorageResult<Vec<MutationRecord>> {
        let mut response = self
            .db
            .query("SELECT * FROM mutations ORDER BY cycle DESC LIMIT $limit")
            .bind(("limit", limit as u64))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<MutationRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        rows.into_iter().map(MutationRow::into_record).collect()
    }

    async fn reflections(&self, limit: usize) -> StorageResult<Vec<ReflectionRecord>> {
        let mut response = self
            .db
            .query("SELECT * FROM reflections ORDER BY cycle DESC LIMIT $limit")
            .bind(("limit", limit as u64))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<ReflectionRow> = response
            .take(0)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        rows.into_iter().map(ReflectionRow::into_record).collect()
    }

    async fn latest_thresholds(&self) -> StorageResult<Option<Thresholds>> {
        let latest = self.mutation_history(1).await?;
        Ok(latest.into_iter().next().map(|m| m.new))
    }
}
