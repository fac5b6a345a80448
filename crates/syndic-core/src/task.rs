//! Task vocabulary for the governance plane.
//!
//! A task lives for exactly one cycle: it enters with a batch, is scored,
//! assigned, executed, and only its derived `ExecutionRecord` persists.
//! Metadata is an opaque map interpreted by executors; the core reads a
//! single optional field, `required_capability`.

use serde::{Deserialize, Serialize};
use syndic_state::TaskId;

/// Metadata key the core is allowed to read.
pub const REQUIRED_CAPABILITY_KEY: &str = "required_capability";

/// A unit of work submitted for one governance cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// Business impact in [0, 1].
    pub impact: f64,
    /// Time pressure in [0, 1].
    pub urgency: f64,
    /// Risk of acting in [0, 1].
    pub risk: f64,
    /// Opaque payload for the executor.
    pub metadata: serde_json::Value,
}

impl Task {
    /// Construct a task, clamping the scoring fields into [0, 1].
    pub fn new(task_id: impl Into<String>, impact: f64, urgency: f64, risk: f64) -> Self {
        Task {
            task_id: TaskId::new(task_id),
            impact: impact.clamp(0.0, 1.0),
            urgency: urgency.clamp(0.0, 1.0),
            risk: risk.clamp(0.0, 1.0),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach executor metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Constrain assignment to agents carrying the given capability tag.
    pub fn with_required_capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        match &mut self.metadata {
            serde_json::Value::Object(map) => {
                map.insert(
                    REQUIRED_CAPABILITY_KEY.to_string(),
                    serde_json::Value::String(capability),
                );
            }
            _ => {
                self.metadata = serde_json::json!({ REQUIRED_CAPABILITY_KEY: capability });
            }
        }
        self
    }

    /// The only metadata field the core introspects.
    pub fn required_capability(&self) -> Option<&str> {
        self.metadata
            .get(REQUIRED_CAPABILITY_KEY)
            .and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoring_fields_are_clamped() {
        let task = Task::new("t1", 1.5, -0.2, 0.5);
        assert_eq!(task.impact, 1.0);
        assert_eq!(task.urgency, 0.0);
        assert_eq!(task.risk, 0.5);
    }

    #[test]
    fn test_required_capability_round_trip() {
        let task = Task::new("t1", 0.5, 0.5, 0.0).with_required_capability("fraud");
        assert_eq!(task.required_capability(), Some("fraud"));
    }

    #[test]
    fn test_required_capability_absent_by_default() {
        let task = Task::new("t1", 0.5, 0.5, 0.0);
        assert_eq!(task.required_capability(), None);
    }

    #[test]
    fn test_with_required_capability_preserves_existing_metadata() {
        let task = Task::new("t1", 0.5, 0.5, 0.0)
            .with_metadata(serde_json::json!({ "payload": "xyz" }))
            .with_required_capability("fraud");
        assert_eq!(task.required_capability(), Some("fraud"));
        assert_eq!(task.metadata.get("payload").unwrap(), "xyz");
    }
}
