//! Per-cycle reflection.
//!
//! Scores each cycle against four governance constraints and records which
//! ones were violated. The score is consumed by operators and higher-level
//! orchestration; it never feeds back into the mutation engine.

use chrono::Utc;

use syndic_state::{CycleId, ReflectionRecord};

/// Facts about a finished cycle, as seen by the reflection engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleFacts {
    /// Any circuit breaker fired, task- or cycle-scoped.
    pub breaker_fired: bool,
    /// Tasks that received an agent.
    pub assigned: usize,
    /// Executed tasks with a non-null outcome.
    pub executed: usize,
    pub successes: usize,
    /// Agents that crossed into `Excluded` this cycle.
    pub exclusions: usize,
}

impl CycleFacts {
    pub fn success_rate(&self) -> Option<f64> {
        if self.executed == 0 {
            None
        } else {
            Some(self.successes as f64 / self.executed as f64)
        }
    }
}

/// Evaluate the four constraints: no breaker, at least one assignment,
/// success rate at target, no exclusion. One point each.
pub fn evaluate(cycle: CycleId, facts: &CycleFacts, target_success_rate: f64) -> ReflectionRecord {
    let mut score = 0u8;
    let mut notes = Vec::new();

    if facts.breaker_fired {
        notes.push("circuit breaker fired".to_string());
    } else {
        score += 1;
    }

    if facts.assigned > 0 {
        score += 1;
    } else {
        notes.push("no task was assigned".to_string());
    }

    match facts.success_rate() {
        Some(rate) if rate >= target_success_rate => score += 1,
        Some(rate) => notes.push(format!(
            "success rate {rate:.2} below target {target_success_rate:.2}"
        )),
        None => notes.push("no task executed".to_string()),
    }

    if facts.exclusions == 0 {
        score += 1;
    } else {
        notes.push(format!("{} agent(s) excluded", facts.exclusions));
    }

    ReflectionRecord {
        cycle,
        constraint_score: score,
        notes,
        timestamp: Utc::now(),
    }
}
