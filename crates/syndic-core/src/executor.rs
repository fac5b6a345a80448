//! Executor boundary.
//!
//! The core decides *who* runs a task; an [`Executor`] decides *what happens*
//! when it runs. Implementations must be side-effect-idempotent with respect
//! to re-submission — the governance layer never retries within a cycle.
//!
//! Dispatch fans out up to `max_parallel` concurrent executions behind a
//! semaphore and joins all outcomes before the loop moves on to learning.
//! Executor faults and timeouts never abort sibling tasks; they surface as
//! failed outcomes with an error kind annotation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::registry::AgentView;
use crate::task::Task;

/// Fault class annotated on a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Executor,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Executor => "EXECUTOR",
            ErrorKind::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error raised by an executor implementation. Becomes a failed outcome
/// with `ErrorKind::Executor`; it never propagates out of the cycle.
#[derive(Debug, thiserror::Error)]
#[error("executor failure: {0}")]
pub struct ExecutorError(pub String);

/// What happened when an agent ran a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub latency_ms: u64,
    /// Opaque output metadata; the core stores it verbatim.
    pub output: serde_json::Value,
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionOutcome {
    pub(crate) fn fault(kind: ErrorKind, latency_ms: u64, detail: String) -> Self {
        ExecutionOutcome {
            success: false,
            latency_ms,
            output: serde_json::json!({ "error": detail }),
            error_kind: Some(kind),
        }
    }
}

/// Contract for running one (task, agent) pair.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        agent: &AgentView,
    ) -> Result<ExecutionOutcome, ExecutorError>;
}

/// Execute the assigned jobs with bounded fan-out.
///
/// `jobs` carries the assignment index so outcomes can be matched back to
/// their task in priority order; the returned vector is sorted by it.
///
/// Cancellation is honored between tasks, not mid-task: a job that acquires
/// its permit after the cancel flag is raised never starts and yields
/// `None`; jobs already running complete and are joined normally.
pub(crate) async fn dispatch(
    executor: Arc<dyn Executor>,
    jobs: Vec<(usize, Task, AgentView)>,
    max_parallel: usize,
    timeout_ms: Option<u64>,
    cancel: Option<tokio::sync::watch::Receiver<bool>>,
) -> Vec<(usize, Option<ExecutionOutcome>)> {
    let sem = Arc::new(tokio::sync::Semaphore::new(max_parallel.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());

    for (index, task, agent) in jobs {
        let executor = Arc::clone(&executor);
        let sem = Arc::clone(&sem);
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            if cancel.map(|rx| *rx.borrow()).unwrap_or(false) {
                return (index, None);
            }
            let started = std::time::Instant::now();

            let result = match timeout_ms {
                Some(ms) => {
                    match tokio::time::timeout(
                        Duration::from_millis(ms),
                        executor.execute(&task, &agent),
                    )
                    .await
                    {
                        Ok(inner) => inner,
                        Err(_elapsed) => {
                            warn!(task = %task.task_id, timeout_ms = ms, "task timed out");
                            return (
                                index,
                                Some(ExecutionOutcome::fault(
                                    ErrorKind::Timeout,
                                    ms,
                                    format!("task exceeded {ms}ms timeout"),
                                )),
                            );
                        }
                    }
                }
                None => executor.execute(&task, &agent).await,
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(task = %task.task_id, error = %e, "executor fault");
                    ExecutionOutcome::fault(
                        ErrorKind::Executor,
                        started.elapsed().as_millis() as u64,
                        e.to_string(),
                    )
                }
            };
            (index, Some(outcome))
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(pair) => outcomes.push(pair),
            Err(e) => {
                // A panicked executor task is contained at the join
                // boundary; the index is lost with the task, so the caller
                // treats missing indices as executor faults.
                warn!(error = %e, "executor task panicked");
            }
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes
}

// ---------------------------------------------------------------------------
// DeterministicExecutor
// ---------------------------------------------------------------------------

/// Reproducible executor for simulation and regression runs.
///
/// Succeeds when `agent.trust - task.risk >= decision_threshold`. No
/// randomness, fixed reported latency.
#[derive(Debug, Clone)]
pub struct DeterministicExecutor {
    pub decision_threshold: f64,
    pub fixed_latency_ms: u64,
}

impl Default for DeterministicExecutor {
    fn default() -> Self {
        DeterministicExecutor {
            decision_threshold: 0.0,
            fixed_latency_ms: 1,
        }
    }
}

impl DeterministicExecutor {
    pub fn new(decision_threshold: f64) -> Self {
        DeterministicExecutor {
            decision_threshold,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Executor for DeterministicExecutor {
    async fn execute(
        &self,
        task: &Task,
        agent: &AgentView,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let score = agent.trust - task.risk;
        Ok(ExecutionOutcome {
            success: score >= self.decision_threshold,
            latency_ms: self.fixed_latency_ms,
            output: serde_json::json!({
                "deterministic": true,
                "score": score,
                "decision_threshold": self.decision_threshold,
            }),
            error_kind: None,
        })
    }
}
