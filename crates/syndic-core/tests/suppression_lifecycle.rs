//! Suppression, redemption, cancellation, and restart continuity.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use syndic_core::{
    AgentId, AgentStatus, AgentView, CycleStatus, ExecutionOutcome, Executor, ExecutorError,
    GovernanceConfig, GovernanceLoop, Task,
};
use syndic_state::{MemoryStateStore, StateStore};

fn caps(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

struct ScriptedExecutor {
    verdicts: HashMap<String, bool>,
}

impl ScriptedExecutor {
    fn new(verdicts: &[(&str, bool)]) -> Self {
        ScriptedExecutor {
            verdicts: verdicts
                .iter()
                .map(|(id, v)| (id.to_string(), *v))
                .collect(),
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        task: &Task,
        _agent: &AgentView,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        Ok(ExecutionOutcome {
            success: self
                .verdicts
                .get(task.task_id.as_str())
                .copied()
                .unwrap_or(true),
            latency_ms: 1,
            output: serde_json::Value::Null,
            error_kind: None,
        })
    }
}

#[tokio::test]
async fn successful_probation_trial_restores_active_status() {
    // Penalty deep enough to suppress in one failure, reward strong enough
    // to clear the assignment bar on the trial
    let config = GovernanceConfig::default().with_learning_rates(0.5, 0.3);
    let store = Arc::new(MemoryStateStore::new());
    let mut looper = GovernanceLoop::bootstrap(store, config).await.unwrap();
    looper
        .register_agent("a1", caps(&["fraud"]), 0.70)
        .await
        .unwrap();

    // Cycle 1: failure. 0.70 -> 0.49, suppressed, probation opens.
    looper
        .run_cycle(
            vec![Task::new("t1", 0.5, 0.5, 0.0)],
            Arc::new(ScriptedExecutor::new(&[("t1", false)])),
        )
        .await
        .unwrap();
    let record = looper.registry().get(&AgentId::new("a1")).unwrap();
    assert_eq!(record.status, AgentStatus::Probation);
    assert!((record.trust - 0.49).abs() < 1e-9);

    // Cycle 2: the trial succeeds. 0.49 + 0.5 * 0.51 = 0.745 >= 0.70.
    let report = looper
        .run_cycle(
            vec![Task::new("t2", 0.5, 0.5, 0.0)],
            Arc::new(ScriptedExecutor::new(&[("t2", true)])),
        )
        .await
        .unwrap();

    let record = looper.registry().get(&AgentId::new("a1")).unwrap();
    assert_eq!(record.status, AgentStatus::Active);
    assert!((record.trust - 0.745).abs() < 1e-9);
    assert!(record.suppression_entered_at.is_none());
    assert_eq!(report.status_changes.len(), 1);
    assert_eq!(report.status_changes[0].new, AgentStatus::Active);
}

#[tokio::test]
async fn probation_agent_yields_to_active_and_burns_its_window_when_unused() {
    let config = GovernanceConfig::default().with_learning_rates(0.5, 0.3);
    let store = Arc::new(MemoryStateStore::new());
    let mut looper = GovernanceLoop::bootstrap(store, config).await.unwrap();
    looper
        .register_agent("healthy", caps(&["fraud"]), 0.90)
        .await
        .unwrap();
    looper
        .register_agent("shaky", caps(&["legacy"]), 0.70)
        .await
        .unwrap();

    // Cycle 1: shaky fails its capability-bound task and is suppressed;
    // healthy succeeds.
    looper
        .run_cycle(
            vec![
                Task::new("t-healthy", 0.9, 0.9, 0.0).with_required_capability("fraud"),
                Task::new("t-shaky", 0.1, 0.1, 0.0).with_required_capability("legacy"),
            ],
            Arc::new(ScriptedExecutor::new(&[
                ("t-healthy", true),
                ("t-shaky", false),
            ])),
        )
        .await
        .unwrap();
    assert_eq!(
        looper.registry().get(&AgentId::new("shaky")).unwrap().status,
        AgentStatus::Probation
    );

    // Cycle 2: the healthy agent can serve every task, so the probation
    // agent gets no trial and its redemption window narrows.
    let report = looper
        .run_cycle(
            vec![Task::new("t3", 0.5, 0.5, 0.0), Task::new("t4", 0.4, 0.4, 0.0)],
            Arc::new(ScriptedExecutor::new(&[])),
        )
        .await
        .unwrap();

    for outcome in &report.task_outcomes {
        assert_eq!(outcome.agent_id, Some(AgentId::new("healthy")));
    }
    let shaky = looper.registry().get(&AgentId::new("shaky")).unwrap();
    assert_eq!(shaky.status, AgentStatus::Probation);
    assert_eq!(shaky.redemption_cycles_used, 1);
}

#[tokio::test]
async fn cancelled_cycle_commits_nothing_and_reuses_its_id() {
    let store = Arc::new(MemoryStateStore::new());
    let mut looper = GovernanceLoop::bootstrap(store.clone(), GovernanceConfig::default())
        .await
        .unwrap();
    looper
        .register_agent("a1", caps(&["fraud"]), 0.80)
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::watch::channel(true);
    looper.set_cancellation(rx);

    let report = looper
        .run_cycle(
            vec![Task::new("t1", 0.5, 0.5, 0.0)],
            Arc::new(ScriptedExecutor::new(&[])),
        )
        .await
        .unwrap();
    assert_eq!(report.status, CycleStatus::Cancelled);
    assert!(report.reflection.is_none());

    // No state reached the store
    assert!(store.execution_history(None, 10).await.unwrap().is_empty());
    assert!(store.last_cycle().await.unwrap().is_none());
    assert!((looper.registry().get(&AgentId::new("a1")).unwrap().trust - 0.80).abs() < 1e-9);

    // Lift the cancellation: the same cycle id runs for real
    tx.send(false).unwrap();
    let report = looper
        .run_cycle(
            vec![Task::new("t1", 0.5, 0.5, 0.0)],
            Arc::new(ScriptedExecutor::new(&[])),
        )
        .await
        .unwrap();
    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.cycle.0, 1);
}

#[tokio::test]
async fn restart_resumes_cycle_counter_status_and_thresholds() {
    let store = Arc::new(MemoryStateStore::new());
    let config = GovernanceConfig::default().with_learning_rates(0.1, 0.01);

    {
        let mut looper = GovernanceLoop::bootstrap(store.clone(), config.clone())
            .await
            .unwrap();
        looper
            .register_agent("a1", caps(&["fraud"]), 0.90)
            .await
            .unwrap();

        // Five poor cycles force a tighten mutation
        for cycle in 1..=5u64 {
            let s = format!("s{cycle}");
            let f1 = format!("f1-{cycle}");
            let f2 = format!("f2-{cycle}");
            looper
                .run_cycle(
                    vec![
                        Task::new(s.clone(), 0.9, 0.9, 0.0),
                        Task::new(f1.clone(), 0.5, 0.5, 0.0),
                        Task::new(f2.clone(), 0.4, 0.4, 0.0),
                    ],
                    Arc::new(ScriptedExecutor::new(&[
                        (s.as_str(), true),
                        (f1.as_str(), false),
                        (f2.as_str(), false),
                    ])),
                )
                .await
                .unwrap();
        }
        assert!((looper.thresholds().trust_threshold - 0.72).abs() < 1e-9);
    }

    // A fresh loop over the same store picks up where the old one stopped
    let looper = GovernanceLoop::bootstrap(store.clone(), config).await.unwrap();
    assert!((looper.thresholds().trust_threshold - 0.72).abs() < 1e-9);

    let record = looper.registry().get(&AgentId::new("a1")).unwrap();
    let stored = &store.load_agents().await.unwrap()[0];
    assert_eq!(record.status, stored.status);
    assert!((record.trust - stored.trust).abs() < 1e-12);

    let report = looper.agent_report(&AgentId::new("a1")).unwrap();
    assert_eq!(report.trust_window.len(), 5, "drift window reseeded");
}

#[tokio::test]
async fn empty_batch_commits_a_quiet_cycle() {
    let store = Arc::new(MemoryStateStore::new());
    let mut looper = GovernanceLoop::bootstrap(store.clone(), GovernanceConfig::default())
        .await
        .unwrap();
    looper
        .register_agent("a1", caps(&["fraud"]), 0.80)
        .await
        .unwrap();

    let report = looper
        .run_cycle(vec![], Arc::new(ScriptedExecutor::new(&[])))
        .await
        .unwrap();

    assert_eq!(report.status, CycleStatus::Completed);
    assert!(report.task_outcomes.is_empty());
    let reflection = report.reflection.unwrap();
    // No breaker, no exclusion; nothing assigned or executed
    assert_eq!(reflection.constraint_score, 2);
    assert_eq!(store.last_cycle().await.unwrap().unwrap().0, 1);
}
