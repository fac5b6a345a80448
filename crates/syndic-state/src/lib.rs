//! Syndic-State: Persistence Layer for the Governance Plane
//!
//! This crate is the durable home for everything the governance loop
//! decides: agents and their trust, trust history, execution records,
//! drift events, threshold mutations, and reflections.
//!
//! ## Key components
//!
//! - `StateStore`: the async storage trait; one atomic commit per cycle
//! - `MemoryStateStore`: in-memory fake for tests and embedding
//! - `SurrealStore`: SurrealDB backend with transactional cycle commits

pub mod error;
pub mod fakes;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fakes::{FailingStateStore, MemoryStateStore};
pub use storage_traits::{
    AgentId, AgentRecord, AgentStatus, CycleDelta, CycleId, DriftRecord, ExecutionRecord,
    MutationDirection, MutationRecord, ReflectionRecord, StateStore, StorageResult, StoreStats,
    TaskId, Thresholds, TrustChange, TrustOutcome,
};
pub use surreal_store::SurrealStore;
