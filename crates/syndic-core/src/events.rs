//! Typed event boundary.
//!
//! After a cycle commits, the loop publishes its events to every registered
//! sink. Delivery is best-effort and strictly ordered by
//! `(cycle, sequence)`: events from cycle N are durably persisted before
//! any event from cycle N+1 is emitted. A misbehaving subscriber cannot
//! affect committed state — by the time a sink sees an envelope, the store
//! already accepted the cycle.

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use syndic_state::{
    AgentId, AgentStatus, CycleId, MutationDirection, TaskId, Thresholds, TrustOutcome,
};

use crate::trust::StatusChangeReason;

/// A unique event ID (UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scope of a circuit breaker trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    Task,
    Cycle,
}

/// Governance lifecycle events, fully ordered within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GovernanceEvent {
    AgentRegistered {
        agent_id: AgentId,
        capabilities: BTreeSet<String>,
        initial_trust: f64,
    },
    TrustUpdated {
        agent_id: AgentId,
        old: f64,
        new: f64,
        outcome: TrustOutcome,
    },
    StatusChanged {
        agent_id: AgentId,
        old: AgentStatus,
        new: AgentStatus,
        reason: StatusChangeReason,
    },
    DriftDetected {
        agent_id: AgentId,
        delta: f64,
    },
    ThresholdMutated {
        old: Thresholds,
        new: Thresholds,
        direction: MutationDirection,
        observed_success_rate: f64,
    },
    ReflectionRecorded {
        constraint_score: u8,
    },
    CircuitBreakerTripped {
        scope: BreakerScope,
        task_id: Option<TaskId>,
    },
}

/// An event plus its total-order coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub cycle: CycleId,
    /// Position within the cycle's event stream.
    pub seq: u64,
    pub event: GovernanceEvent,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort event subscriber.
pub trait EventSink: Send + Sync {
    fn deliver(&self, envelope: &EventEnvelope);
}

/// Sink that mirrors envelopes into structured log events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn deliver(&self, envelope: &EventEnvelope) {
        match &envelope.event {
            GovernanceEvent::AgentRegistered {
                agent_id,
                initial_trust,
                ..
            } => {
                info!(
                    event = "agent.registered",
                    cycle = envelope.cycle.0,
                    agent = %agent_id,
                    trust = initial_trust,
                );
            }
            GovernanceEvent::TrustUpdated {
                agent_id,
                old,
                new,
                outcome,
            } => {
                info!(
                    event = "trust.updated",
                    cycle = envelope.cycle.0,
                    agent = %agent_id,
                    old = old,
                    new = new,
                    outcome = %outcome,
                );
            }
            GovernanceEvent::StatusChanged {
                agent_id,
                old,
                new,
                reason,
            } => {
                info!(
                    event = "status.changed",
                    cycle = envelope.cycle.0,
                    agent = %agent_id,
                    old = %old,
                    new = %new,
                    reason = %reason,
                );
            }
            GovernanceEvent::DriftDetected { agent_id, delta } => {
                info!(
                    event = "drift.detected",
                    cycle = envelope.cycle.0,
                    agent = %agent_id,
                    delta = delta,
                );
            }
            GovernanceEvent::ThresholdMutated {
                direction,
                new,
                observed_success_rate,
                ..
            } => {
                info!(
                    event = "threshold.mutated",
                    cycle = envelope.cycle.0,
                    direction = %direction,
                    trust_threshold = new.trust_threshold,
                    suppression_threshold = new.suppression_threshold,
                    observed = observed_success_rate,
                );
            }
            GovernanceEvent::ReflectionRecorded { constraint_score } => {
                info!(
                    event = "reflection.recorded",
                    cycle = envelope.cycle.0,
                    constraint_score = constraint_score,
                );
            }
            GovernanceEvent::CircuitBreakerTripped { scope, task_id } => {
                info!(
                    event = "circuit_breaker.tripped",
                    cycle = envelope.cycle.0,
                    scope = ?scope,
                    task = task_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                );
            }
        }
    }
}

/// Buffering sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All delivered envelopes, in delivery order.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().unwrap().clone()
    }

    /// Drain the buffer.
    pub fn drain(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for MemorySink {
    fn deliver(&self, envelope: &EventEnvelope) {
        self.events.lock().unwrap().push(envelope.clone());
    }
}
