//! Syndic Core Library
//!
//! The governance cycle engine for autonomous agent pools: deterministic
//! prioritization, trust-weighted assignment with suppression and
//! redemption, asymmetric learning, drift detection, adaptive threshold
//! mutation, and per-cycle reflection — all committed atomically through
//! the `syndic-state` store and announced over a typed event boundary.

pub mod config;
pub mod cycle;
pub mod error;
pub mod events;
pub mod executor;
pub mod learning;
pub mod metrics;
pub mod mutation;
pub mod obs;
pub mod prioritizer;
pub mod reflection;
pub mod registry;
pub mod task;
pub mod telemetry;
pub mod trust;

pub use config::GovernanceConfig;
pub use cycle::{CycleReport, CycleStatistics, CycleStatus, GovernanceLoop, TaskOutcome};
pub use error::{GovernanceError, Result};
pub use events::{
    BreakerScope, EventEnvelope, EventId, EventSink, GovernanceEvent, MemorySink, TracingSink,
};
pub use executor::{
    DeterministicExecutor, ErrorKind, ExecutionOutcome, Executor, ExecutorError,
};
pub use learning::{apply_outcomes, update_trust, ObservedOutcome};
pub use metrics::METRICS;
pub use mutation::{MutationDecision, MutationEngine, PerformanceTrend};
pub use obs::{emit_cycle_finished, emit_cycle_started, CycleSpan};
pub use prioritizer::{prioritize, PriorityWeights};
pub use reflection::CycleFacts;
pub use registry::{AgentRegistry, AgentSnapshot, AgentView, RegistryStatistics};
pub use task::Task;
pub use telemetry::init_tracing;
pub use trust::{
    AgentStatusReport, Assignment, StatusChange, StatusChangeReason, TrustEngine,
};

pub use syndic_state::{
    AgentId, AgentRecord, AgentStatus, CycleId, DriftRecord, MutationDirection, MutationRecord,
    ReflectionRecord, TaskId, Thresholds, TrustChange, TrustOutcome,
};

/// Syndic version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
