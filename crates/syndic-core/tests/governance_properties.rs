//! Randomized invariant checks over the governance core.
//!
//! Each test drives the system with seeded-random inputs and asserts the
//! invariant over every intermediate state, so a regression shows up with a
//! reproducible seed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use syndic_core::{
    update_trust, AgentId, AgentStatus, AgentView, ExecutionOutcome, Executor, ExecutorError,
    GovernanceConfig, GovernanceError, GovernanceLoop, MutationEngine, PriorityWeights, Task,
    Thresholds,
};
use syndic_core::prioritize;
use syndic_state::{FailingStateStore, MemoryStateStore, StateStore};

fn caps(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

/// Executor whose verdict per (task, cycle) is pre-rolled from a seed, so
/// repeated runs are deterministic.
struct SeededExecutor {
    verdicts: HashMap<String, bool>,
}

impl SeededExecutor {
    fn roll(rng: &mut StdRng, task_ids: &[String], success_bias: f64) -> Self {
        SeededExecutor {
            verdicts: task_ids
                .iter()
                .map(|id| (id.clone(), rng.gen_bool(success_bias)))
                .collect(),
        }
    }
}

#[async_trait]
impl Executor for SeededExecutor {
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
                .unwrap_or(false),
            latency_ms: 1,
            output: serde_json::Value::Null,
            error_kind: None,
        })
    }
}

fn random_tasks(rng: &mut StdRng, cycle: u64, count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| {
            Task::new(
                format!("c{cycle}-t{i}"),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Property 1: trust bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trust_stays_in_unit_interval_under_random_load() {
    let mut rng = StdRng::seed_from_u64(17);
    let store = Arc::new(MemoryStateStore::new());
    let config = GovernanceConfig::default().with_learning_rates(0.3, 0.4);
    let mut looper = GovernanceLoop::bootstrap(store.clone(), config).await.unwrap();

    for i in 0..4 {
        let trust = rng.gen_range(0.55..1.0);
        looper
            .register_agent(format!("agent-{i}"), caps(&["work"]), trust)
            .await
            .unwrap();
    }

    for cycle in 1..=30u64 {
        let tasks = random_tasks(&mut rng, cycle, 5);
        let ids: Vec<String> = tasks.iter().map(|t| t.task_id.as_str().to_string()).collect();
        let executor = Arc::new(SeededExecutor::roll(&mut rng, &ids, 0.5));
        looper.run_cycle(tasks, executor).await.unwrap();

        for record in store.load_agents().await.unwrap() {
            assert!(
                (0.0..=1.0).contains(&record.trust),
                "cycle {cycle}: trust {} out of bounds for {}",
                record.trust,
                record.agent_id
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Property 2: asymmetric monotonicity
// ---------------------------------------------------------------------------

#[test]
fn pure_success_never_decreases_and_pure_failure_never_increases() {
    let mut rng = StdRng::seed_from_u64(23);

    for _ in 0..200 {
        let start = rng.gen_range(0.0..1.0);
        let eta = rng.gen_range(0.001..0.5);
        let gamma = rng.gen_range(0.001..0.5);
        let n = rng.gen_range(1..40);

        let mut up = start;
        for _ in 0..n {
            let next = update_trust(up, true, eta, gamma);
            assert!(next >= up, "success decreased trust: {up} -> {next}");
            up = next;
        }

        let mut down = start;
        for _ in 0..n {
            let next = update_trust(down, false, eta, gamma);
            assert!(next <= down, "failure increased trust: {down} -> {next}");
            down = next;
        }
    }
}

// ---------------------------------------------------------------------------
// Property 3: EXCLUDED is terminal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn excluded_agents_never_come_back() {
    let mut rng = StdRng::seed_from_u64(31);
    let store = Arc::new(MemoryStateStore::new());
    let config = GovernanceConfig::default()
        .with_learning_rates(0.02, 0.35)
        .with_max_redemption_cycles(2);
    let mut looper = GovernanceLoop::bootstrap(store.clone(), config).await.unwrap();
    looper
        .register_agent("doomed", caps(&["work"]), 0.72)
        .await
        .unwrap();

    struct NeverSucceeds;
    #[async_trait]
    impl Executor for NeverSucceeds {
        async fn execute(
            &self,
            _task: &Task,
            _agent: &AgentView,
        ) -> Result<ExecutionOutcome, ExecutorError> {
            Ok(ExecutionOutcome {
                success: false,
                latency_ms: 1,
                output: serde_json::Value::Null,
                error_kind: None,
            })
        }
    }

    let executor = Arc::new(NeverSucceeds);
    let mut excluded_at = None;
    for cycle in 1..=20u64 {
        let tasks = random_tasks(&mut rng, cycle, 2);
        let report = looper.run_cycle(tasks, executor.clone()).await.unwrap();

        let status = looper.registry().get(&AgentId::new("doomed")).unwrap().status;
        if excluded_at.is_none() && status == AgentStatus::Excluded {
            excluded_at = Some(cycle);
        }
        if let Some(when) = excluded_at {
            assert_eq!(
                status,
                AgentStatus::Excluded,
                "agent left EXCLUDED at cycle {cycle} (entered at {when})"
            );
            // And it never appears in an assignment again
            if cycle > when {
                assert!(report.task_outcomes.iter().all(|t| t.agent_id.is_none()));
            }
        }
    }
    assert!(excluded_at.is_some(), "exclusion never happened");
}

// ---------------------------------------------------------------------------
// Property 4: threshold ordering under random mutation pressure
// ---------------------------------------------------------------------------

#[test]
fn mutation_preserves_ordering_and_bands() {
    let mut rng = StdRng::seed_from_u64(41);

    for _ in 0..50 {
        let mut engine = MutationEngine::new(
            Thresholds {
                trust_threshold: 0.70,
                suppression_threshold: 0.55,
                drift_delta: 0.10,
            },
            rng.gen_range(0.005..0.08),
            0.85,
            0.10,
            0.05,
            10,
            5,
        );

        for _ in 0..200 {
            let rate = rng.gen_range(0.0..=1.0);
            let decision = engine.evaluate(rate);
            engine.commit(rate, &decision);

            let t = engine.thresholds();
            assert!(
                t.ordering_holds(),
                "ordering violated: suppression {} >= trust {}",
                t.suppression_threshold,
                t.trust_threshold
            );
            assert!((0.5..=0.9).contains(&t.trust_threshold));
            assert!((0.4..=0.85).contains(&t.suppression_threshold));
            assert!(t.drift_delta > 0.0);
        }
    }
}

// ---------------------------------------------------------------------------
// Property 5: persistence atomicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_commit_leaves_no_trace_and_rolls_back_memory() {
    let store = Arc::new(FailingStateStore::new());
    let config = GovernanceConfig::default();
    let mut looper = GovernanceLoop::bootstrap(store.clone(), config).await.unwrap();
    looper
        .register_agent("a1", caps(&["work"]), 0.80)
        .await
        .unwrap();

    struct AlwaysSucceeds;
    #[async_trait]
    impl Executor for AlwaysSucceeds {
        async fn execute(
            &self,
            _task: &Task,
            _agent: &AgentView,
        ) -> Result<ExecutionOutcome, ExecutorError> {
            Ok(ExecutionOutcome {
                success: true,
                latency_ms: 1,
                output: serde_json::Value::Null,
                error_kind: None,
            })
        }
    }

    store.fail_next_commits();
    let tasks = vec![Task::new("t1", 0.5, 0.5, 0.0)];
    let err = looper
        .run_cycle(tasks.clone(), Arc::new(AlwaysSucceeds))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Storage(_)));

    // Nothing persisted, nothing applied in memory
    assert!(store.execution_history(None, 10).await.unwrap().is_empty());
    assert!(store
        .trust_history(&AgentId::new("a1"), 10)
        .await
        .unwrap()
        .is_empty());
    assert!((looper.registry().get(&AgentId::new("a1")).unwrap().trust - 0.80).abs() < 1e-9);

    // After healing, the same cycle id commits cleanly
    store.heal();
    let report = looper
        .run_cycle(tasks, Arc::new(AlwaysSucceeds))
        .await
        .unwrap();
    assert_eq!(report.cycle.0, 1, "failed cycle id is reused");
    assert_eq!(store.last_cycle().await.unwrap().unwrap().0, 1);
    assert_eq!(
        store
            .trust_history(&AgentId::new("a1"), 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

// ---------------------------------------------------------------------------
// Property 6: registry-store consistency after commits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_matches_store_after_every_commit() {
    let mut rng = StdRng::seed_from_u64(53);
    let store = Arc::new(MemoryStateStore::new());
    let config = GovernanceConfig::default().with_learning_rates(0.1, 0.2);
    let mut looper = GovernanceLoop::bootstrap(store.clone(), config).await.unwrap();

    for i in 0..3 {
        looper
            .register_agent(format!("agent-{i}"), caps(&["work"]), 0.75)
            .await
            .unwrap();
    }

    for cycle in 1..=15u64 {
        let tasks = random_tasks(&mut rng, cycle, 3);
        let ids: Vec<String> = tasks.iter().map(|t| t.task_id.as_str().to_string()).collect();
        let executor = Arc::new(SeededExecutor::roll(&mut rng, &ids, 0.6));
        looper.run_cycle(tasks, executor).await.unwrap();

        for stored in store.load_agents().await.unwrap() {
            let live = looper.registry().get(&stored.agent_id).unwrap();
            assert_eq!(live.status, stored.status, "cycle {cycle}");
            assert!(
                (live.trust - stored.trust).abs() < 1e-12,
                "cycle {cycle}: registry {} vs store {}",
                live.trust,
                stored.trust
            );
            assert_eq!(
                live.redemption_cycles_used,
                stored.redemption_cycles_used
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Property 7: prioritization determinism
// ---------------------------------------------------------------------------

#[test]
fn prioritization_is_stable_across_input_permutations() {
    use rand::seq::SliceRandom;

    let mut rng = StdRng::seed_from_u64(61);
    let weights = PriorityWeights::default();

    for _ in 0..50 {
        let tasks: Vec<Task> = (0..12)
            .map(|i| {
                Task::new(
                    format!("t{i:02}"),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                )
            })
            .collect();

        let reference: Vec<String> = prioritize(tasks.clone(), &weights)
            .iter()
            .map(|t| t.task_id.as_str().to_string())
            .collect();

        for _ in 0..5 {
            let mut shuffled = tasks.clone();
            shuffled.shuffle(&mut rng);
            let order: Vec<String> = prioritize(shuffled, &weights)
                .iter()
                .map(|t| t.task_id.as_str().to_string())
                .collect();
            assert_eq!(order, reference);
        }
    }
}

// ---------------------------------------------------------------------------
// Property 8: drift idempotence at the store boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resubmitted_cycle_does_not_duplicate_drift_records() {
    use chrono::Utc;
    use syndic_state::{
        AgentRecord, CycleDelta, CycleId, DriftRecord, ReflectionRecord,
    };

    let mut rng = StdRng::seed_from_u64(71);
    let store = MemoryStateStore::new();
    store
        .upsert_agent(&AgentRecord::new(AgentId::new("a1"), caps(&["x"]), 0.9))
        .await
        .unwrap();

    for cycle in 1..=10u64 {
        let delta = CycleDelta {
            cycle: CycleId(cycle),
            executions: vec![],
            trust_changes: vec![],
            agents: vec![],
            drift_events: vec![DriftRecord {
                agent_id: AgentId::new("a1"),
                cycle: CycleId(cycle),
                delta: rng.gen_range(0.1..0.3),
                window_mean_before: 0.9,
                window_mean_after: 0.7,
                timestamp: Utc::now(),
            }],
            mutation: None,
            reflection: ReflectionRecord {
                cycle: CycleId(cycle),
                constraint_score: 3,
                notes: vec![],
                timestamp: Utc::now(),
            },
        };

        // Submit the identical cycle twice
        store.record_cycle(&delta).await.unwrap();
        store.record_cycle(&delta).await.unwrap();

        let drift = store.drift_history(Some(&AgentId::new("a1"))).await.unwrap();
        assert_eq!(drift.len(), cycle as usize, "one record per cycle");
    }
}
