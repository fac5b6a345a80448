//! Deterministic task prioritization.
//!
//! Produces a total order on a batch: weighted score descending, ties broken
//! ascending by task id. Same input gives the identical order across
//! processes and restarts — downstream assignment and learning both depend
//! on this ordering.

use serde::{Deserialize, Serialize};

use crate::error::{GovernanceError, Result};
use crate::task::Task;

/// Weights for the priority score. Must each be in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub impact: f64,
    pub urgency: f64,
    pub risk: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        PriorityWeights {
            impact: 0.4,
            urgency: 0.4,
            risk: 0.2,
        }
    }
}

impl PriorityWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("impact", self.impact),
            ("urgency", self.urgency),
            ("risk", self.risk),
        ] {
            if !(0.0..=1.0).contains(&v) || v.is_nan() {
                return Err(GovernanceError::InvalidConfig(format!(
                    "priority weight {name} must be in [0, 1], got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Weighted score of a single task.
    pub fn score(&self, task: &Task) -> f64 {
        self.impact * task.impact + self.urgency * task.urgency + self.risk * task.risk
    }
}

/// Sort a batch into priority order: score descending, ties ascending by
/// task id.
pub fn prioritize(mut tasks: Vec<Task>, weights: &PriorityWeights) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        weights
            .score(b)
            .total_cmp(&weights.score(a))
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    tasks
}
