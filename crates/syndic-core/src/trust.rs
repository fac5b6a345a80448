//! Trust engine: assignment, suppression, redemption, drift.
//!
//! Assignment is deterministic highest-trust routing over a consistent
//! snapshot. Lifecycle evaluation runs at end of cycle against the shadow
//! trust values and is split into a pure `evaluate_lifecycle` step and a
//! `commit_lifecycle` step, so a failed store commit leaves the engine's
//! drift windows and flags exactly as they were.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use syndic_state::{
    AgentId, AgentRecord, AgentStatus, CycleId, DriftRecord, Thresholds,
};

use crate::registry::{AgentSnapshot, AgentView};
use crate::task::Task;

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// One task's routing decision. `agent_id = None` is a per-task circuit
/// breaker: no eligible agent existed.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub task: Task,
    pub agent_id: Option<AgentId>,
}

/// Why an agent's status changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChangeReason {
    TrustBelowSuppression,
    RedemptionSucceeded,
    RedemptionFailed,
    RedemptionWindowOpened,
    RedemptionExhausted,
}

impl std::fmt::Display for StatusChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusChangeReason::TrustBelowSuppression => "trust_below_suppression",
            StatusChangeReason::RedemptionSucceeded => "redemption_succeeded",
            StatusChangeReason::RedemptionFailed => "redemption_failed",
            StatusChangeReason::RedemptionWindowOpened => "redemption_window_opened",
            StatusChangeReason::RedemptionExhausted => "redemption_exhausted",
        };
        write!(f, "{s}")
    }
}

/// A single status transition within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub agent_id: AgentId,
    pub cycle: CycleId,
    pub old: AgentStatus,
    pub new: AgentStatus,
    pub reason: StatusChangeReason,
}

/// Post-cycle state for one agent, merged into its full record by the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentUpdate {
    pub agent_id: AgentId,
    pub trust: f64,
    pub status: AgentStatus,
    pub redemption_cycles_used: u32,
    pub suppression_entered_at: Option<CycleId>,
}

/// Everything the end-of-cycle evaluation produced, computed without
/// touching engine state. Applied via [`TrustEngine::commit_lifecycle`]
/// only after the store accepted the cycle.
#[derive(Debug, Clone, Default)]
pub struct LifecycleOutcome {
    pub updates: Vec<AgentUpdate>,
    pub status_changes: Vec<StatusChange>,
    pub drift_events: Vec<DriftRecord>,
    window_pushes: Vec<(AgentId, f64)>,
    flag_sets: Vec<AgentId>,
    flag_clears: Vec<AgentId>,
}

impl LifecycleOutcome {
    /// Agents that crossed into `Excluded` this cycle.
    pub fn excluded(&self) -> Vec<&AgentId> {
        self.status_changes
            .iter()
            .filter(|c| c.new == AgentStatus::Excluded)
            .map(|c| &c.agent_id)
            .collect()
    }
}

/// Per-agent diagnostic view (trust window, suppression state, drift flag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub agent_id: AgentId,
    pub trust: f64,
    pub status: AgentStatus,
    pub trust_window: Vec<f64>,
    pub drifting: bool,
    pub redemption_cycles_used: u32,
    pub redemption_remaining: u32,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

fn best_candidate<'a>(
    candidates: impl Iterator<Item = (&'a AgentId, &'a AgentView)>,
) -> Option<&'a AgentId> {
    candidates
        .max_by(|a, b| a.1.trust.total_cmp(&b.1.trust).then_with(|| b.0.cmp(a.0)))
        .map(|(id, _)| id)
}

/// Trust-based routing and lifecycle management.
pub struct TrustEngine {
    drift_window: usize,
    max_redemption_cycles: u32,
    windows: BTreeMap<AgentId, VecDeque<f64>>,
    drifting: BTreeSet<AgentId>,
}

impl TrustEngine {
    pub fn new(drift_window: usize, max_redemption_cycles: u32) -> Self {
        TrustEngine {
            drift_window,
            max_redemption_cycles,
            windows: BTreeMap::new(),
            drifting: BTreeSet::new(),
        }
    }

    /// Seed an agent's trust window from persisted history (oldest first).
    /// Used at startup so drift detection survives a restart.
    pub fn seed_window(&mut self, agent_id: AgentId, values: impl IntoIterator<Item = f64>) {
        let window = self.windows.entry(agent_id).or_default();
        for value in values {
            window.push_back(value);
            if window.len() > self.drift_window {
                window.pop_front();
            }
        }
    }

    /// Whether the agent is currently flagged for drift.
    pub fn is_drifting(&self, agent_id: &AgentId) -> bool {
        self.drifting.contains(agent_id)
    }

    /// Diagnostic report for one agent.
    pub fn status_report(&self, record: &AgentRecord) -> AgentStatusReport {
        AgentStatusReport {
            agent_id: record.agent_id.clone(),
            trust: record.trust,
            status: record.status,
            trust_window: self
                .windows
                .get(&record.agent_id)
                .map(|w| w.iter().copied().collect())
                .unwrap_or_default(),
            drifting: self.is_drifting(&record.agent_id),
            redemption_cycles_used: record.redemption_cycles_used,
            redemption_remaining: self
                .max_redemption_cycles
                .saturating_sub(record.redemption_cycles_used),
        }
    }

    // -- assignment ---------------------------------------------------------

    /// Route a prioritized batch over the snapshot.
    ///
    /// Active agents need `trust >= trust_threshold`; drift-flagged agents
    /// are held back unless no un-flagged candidate exists. A probation
    /// agent is the last resort: at most one task per cycle, no threshold
    /// requirement (its trial is the point).
    pub fn assign(
        &self,
        tasks: &[Task],
        snapshot: &AgentSnapshot,
        thresholds: &Thresholds,
    ) -> Vec<Assignment> {
        let mut probation_used: HashSet<AgentId> = HashSet::new();
        let mut assignments = Vec::with_capacity(tasks.len());

        for task in tasks {
            let required = task.required_capability();
            let capable = |view: &AgentView| match required {
                Some(tag) => view.has_capability(tag),
                None => true,
            };

            let active: Vec<(&AgentId, &AgentView)> = snapshot
                .iter()
                .filter(|(_, v)| v.status == AgentStatus::Active && capable(v))
                .filter(|(_, v)| v.trust >= thresholds.trust_threshold)
                .collect();

            let chosen = self
                .pick(active.iter().copied())
                .or_else(|| {
                    let probation = snapshot.iter().filter(|(id, v)| {
                        v.status == AgentStatus::Probation
                            && capable(v)
                            && !probation_used.contains(*id)
                    });
                    self.pick(probation)
                })
                .cloned();

            if let Some(agent_id) = &chosen {
                if snapshot[agent_id].status == AgentStatus::Probation {
                    probation_used.insert(agent_id.clone());
                }
                debug!(task = %task.task_id, agent = %agent_id, "task assigned");
            } else {
                debug!(task = %task.task_id, "no eligible agent, task circuit broken");
            }

            assignments.push(Assignment {
                task: task.clone(),
                agent_id: chosen,
            });
        }

        assignments
    }

    /// Highest trust wins, ties go to the lexicographically smaller id.
    /// Drift-flagged agents only count when no clean candidate exists.
    fn pick<'a>(
        &self,
        candidates: impl Iterator<Item = (&'a AgentId, &'a AgentView)> + Clone,
    ) -> Option<&'a AgentId> {
        let clean = candidates
            .clone()
            .filter(|(id, _)| !self.drifting.contains(*id));
        if let Some(id) = best_candidate(clean) {
            return Some(id);
        }
        let flagged = candidates.filter(|(id, _)| self.drifting.contains(*id));
        best_candidate(flagged)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Evaluate suppression, redemption, and drift against the shadow trust
    /// values. Pure with respect to engine state.
    ///
    /// `trial_success` carries the probation trial verdicts: for each
    /// probation agent that executed its one task, whether it succeeded.
    pub fn evaluate_lifecycle(
        &self,
        cycle: CycleId,
        snapshot: &AgentSnapshot,
        shadow_trust: &BTreeMap<AgentId, f64>,
        trial_success: &BTreeMap<AgentId, bool>,
        thresholds: &Thresholds,
    ) -> LifecycleOutcome {
        let mut outcome = LifecycleOutcome::default();
        let now = Utc::now();

        for (agent_id, view) in snapshot {
            if view.status.is_terminal() {
                continue;
            }

            let new_trust = shadow_trust.get(agent_id).copied().unwrap_or(view.trust);
            let mut status = view.status;
            let mut used = view.redemption_cycles_used;
            let mut entered = view.suppression_entered_at;

            match view.status {
                AgentStatus::Probation => {
                    let trial_passed = trial_success.get(agent_id).copied() == Some(true);
                    if trial_passed && new_trust >= thresholds.trust_threshold {
                        status = AgentStatus::Active;
                        entered = None;
                        outcome.status_changes.push(StatusChange {
                            agent_id: agent_id.clone(),
                            cycle,
                            old: AgentStatus::Probation,
                            new: AgentStatus::Active,
                            reason: StatusChangeReason::RedemptionSucceeded,
                        });
                    } else {
                        status = AgentStatus::Suppressed;
                        used += 1;
                        outcome.status_changes.push(StatusChange {
                            agent_id: agent_id.clone(),
                            cycle,
                            old: AgentStatus::Probation,
                            new: AgentStatus::Suppressed,
                            reason: StatusChangeReason::RedemptionFailed,
                        });
                    }
                }
                AgentStatus::Active => {
                    if new_trust < thresholds.suppression_threshold {
                        status = AgentStatus::Suppressed;
                        used = 0;
                        entered = Some(cycle);
                        outcome.status_changes.push(StatusChange {
                            agent_id: agent_id.clone(),
                            cycle,
                            old: AgentStatus::Active,
                            new: AgentStatus::Suppressed,
                            reason: StatusChangeReason::TrustBelowSuppression,
                        });
                    }
                }
                AgentStatus::Suppressed | AgentStatus::Excluded => {}
            }

            // A suppressed agent never idles: it is either granted its next
            // probation cycle or runs out of redemption budget.
            if status == AgentStatus::Suppressed {
                if used < self.max_redemption_cycles {
                    outcome.status_changes.push(StatusChange {
                        agent_id: agent_id.clone(),
                        cycle,
                        old: AgentStatus::Suppressed,
                        new: AgentStatus::Probation,
                        reason: StatusChangeReason::RedemptionWindowOpened,
                    });
                    status = AgentStatus::Probation;
                } else {
                    outcome.status_changes.push(StatusChange {
                        agent_id: agent_id.clone(),
                        cycle,
                        old: AgentStatus::Suppressed,
                        new: AgentStatus::Excluded,
                        reason: StatusChangeReason::RedemptionExhausted,
                    });
                    status = AgentStatus::Excluded;
                }
            }

            // Drift: prospective window including this cycle's value.
            outcome.window_pushes.push((agent_id.clone(), new_trust));
            let mut window: VecDeque<f64> = self
                .windows
                .get(agent_id)
                .cloned()
                .unwrap_or_default();
            window.push_back(new_trust);
            while window.len() > self.drift_window {
                window.pop_front();
            }
            if window.len() == self.drift_window {
                let half = self.drift_window / 2;
                let older: f64 = window.iter().take(half).sum::<f64>() / half as f64;
                let newer: f64 = window.iter().skip(half).sum::<f64>() / half as f64;
                let gap = older - newer;
                let flagged = self.drifting.contains(agent_id);
                if gap >= thresholds.drift_delta {
                    if !flagged {
                        outcome.flag_sets.push(agent_id.clone());
                        outcome.drift_events.push(DriftRecord {
                            agent_id: agent_id.clone(),
                            cycle,
                            delta: gap,
                            window_mean_before: older,
                            window_mean_after: newer,
                            timestamp: now,
                        });
                    }
                } else if flagged {
                    outcome.flag_clears.push(agent_id.clone());
                }
            }

            let trust_changed = (new_trust - view.trust).abs() > f64::EPSILON;
            if trust_changed || status != view.status {
                outcome.updates.push(AgentUpdate {
                    agent_id: agent_id.clone(),
                    trust: new_trust,
                    status,
                    redemption_cycles_used: used,
                    suppression_entered_at: entered,
                });
            }
        }

        outcome
    }

    /// Apply a lifecycle outcome to the engine's windows and flags. Call
    /// only after the cycle committed.
    pub fn commit_lifecycle(&mut self, outcome: &LifecycleOutcome) {
        for (agent_id, value) in &outcome.window_pushes {
            let window = self.windows.entry(agent_id.clone()).or_default();
            window.push_back(*value);
            while window.len() > self.drift_window {
                window.pop_front();
            }
        }
        for agent_id in &outcome.flag_sets {
            self.drifting.insert(agent_id.clone());
        }
        for agent_id in &outcome.flag_clears {
            self.drifting.remove(agent_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: Thresholds = Thresholds {
        trust_threshold: 0.70,
        suppression_threshold: 0.55,
        drift_delta: 0.10,
    };

    fn view(trust: f64, status: AgentStatus) -> AgentView {
        AgentView {
            capabilities: ["fraud".to_string()].into_iter().collect(),
            trust,
            status,
            redemption_cycles_used: 0,
            suppression_entered_at: None,
        }
    }

    fn snapshot(agents: &[(&str, f64, AgentStatus)]) -> AgentSnapshot {
        agents
            .iter()
            .map(|(id, trust, status)| (AgentId::new(*id), view(*trust, *status)))
            .collect()
    }

    fn engine() -> TrustEngine {
        TrustEngine::new(10, 4)
    }

    #[test]
    fn test_highest_trust_wins() {
        let snap = snapshot(&[
            ("a-low", 0.75, AgentStatus::Active),
            ("a-high", 0.90, AgentStatus::Active),
        ]);
        let tasks = vec![Task::new("t1", 0.5, 0.5, 0.0)];
        let assignments = engine().assign(&tasks, &snap, &THRESHOLDS);
        assert_eq!(assignments[0].agent_id, Some(AgentId::new("a-high")));
    }

    #[test]
    fn test_trust_tie_breaks_lexicographically() {
        let snap = snapshot(&[
            ("bravo", 0.80, AgentStatus::Active),
            ("alpha", 0.80, AgentStatus::Active),
        ]);
        let tasks = vec![Task::new("t1", 0.5, 0.5, 0.0)];
        let assignments = engine().assign(&tasks, &snap, &THRESHOLDS);
        assert_eq!(assignments[0].agent_id, Some(AgentId::new("alpha")));
    }

    #[test]
    fn test_below_threshold_agent_is_skipped() {
        let snap = snapshot(&[("a1", 0.40, AgentStatus::Active)]);
        let tasks = vec![Task::new("t1", 0.5, 0.5, 0.0)];
        let assignments = engine().assign(&tasks, &snap, &THRESHOLDS);
        assert_eq!(assignments[0].agent_id, None);
    }

    #[test]
    fn test_capability_filter_applies() {
        let snap = snapshot(&[("a1", 0.90, AgentStatus::Active)]);
        let tasks = vec![
            Task::new("t1", 0.5, 0.5, 0.0).with_required_capability("lending"),
            Task::new("t2", 0.5, 0.5, 0.0).with_required_capability("fraud"),
        ];
        let assignments = engine().assign(&tasks, &snap, &THRESHOLDS);
        assert_eq!(assignments[0].agent_id, None);
        assert_eq!(assignments[1].agent_id, Some(AgentId::new("a1")));
    }

    #[test]
    fn test_probation_agent_is_last_resort_and_single_task() {
        let snap = snapshot(&[("p1", 0.50, AgentStatus::Probation)]);
        let tasks = vec![
            Task::new("t1", 0.9, 0.9, 0.0),
            Task::new("t2", 0.5, 0.5, 0.0),
        ];
        let assignments = engine().assign(&tasks, &snap, &THRESHOLDS);
        // One trial task only; the second task circuit-breaks
        assert_eq!(assignments[0].agent_id, Some(AgentId::new("p1")));
        assert_eq!(assignments[1].agent_id, None);
    }

    #[test]
    fn test_active_agent_preferred_over_probation() {
        let snap = snapshot(&[
            ("active", 0.75, AgentStatus::Active),
            ("trial", 0.95, AgentStatus::Probation),
        ]);
        let tasks = vec![Task::new("t1", 0.5, 0.5, 0.0)];
        let assignments = engine().assign(&tasks, &snap, &THRESHOLDS);
        assert_eq!(assignments[0].agent_id, Some(AgentId::new("active")));
    }

    #[test]
    fn test_drifting_agent_only_used_as_last_resort() {
        let mut eng = engine();
        eng.drifting.insert(AgentId::new("drifty"));

        let snap = snapshot(&[
            ("drifty", 0.95, AgentStatus::Active),
            ("steady", 0.75, AgentStatus::Active),
        ]);
        let tasks = vec![Task::new("t1", 0.5, 0.5, 0.0)];
        let assignments = eng.assign(&tasks, &snap, &THRESHOLDS);
        assert_eq!(assignments[0].agent_id, Some(AgentId::new("steady")));

        // Sole eligible agent: the flagged one is used after all
        let solo = snapshot(&[("drifty", 0.95, AgentStatus::Active)]);
        let assignments = eng.assign(&tasks, &solo, &THRESHOLDS);
        assert_eq!(assignments[0].agent_id, Some(AgentId::new("drifty")));
    }

    #[test]
    fn test_active_drops_to_suppressed_then_probation() {
        let eng = engine();
        let snap = snapshot(&[("a1", 0.76, AgentStatus::Active)]);
        let mut shadow = BTreeMap::new();
        shadow.insert(AgentId::new("a1"), 0.50);

        let outcome = eng.evaluate_lifecycle(
            CycleId(1),
            &snap,
            &shadow,
            &BTreeMap::new(),
            &THRESHOLDS,
        );

        let reasons: Vec<StatusChangeReason> =
            outcome.status_changes.iter().map(|c| c.reason).collect();
        assert_eq!(
            reasons,
            vec![
                StatusChangeReason::TrustBelowSuppression,
                StatusChangeReason::RedemptionWindowOpened,
            ]
        );
        assert_eq!(outcome.updates[0].status, AgentStatus::Probation);
        assert_eq!(outcome.updates[0].redemption_cycles_used, 0);
        assert_eq!(outcome.updates[0].suppression_entered_at, Some(CycleId(1)));
    }

    #[test]
    fn test_probation_success_restores_active() {
        let eng = engine();
        let mut snap = snapshot(&[("a1", 0.68, AgentStatus::Probation)]);
        snap.get_mut(&AgentId::new("a1")).unwrap().redemption_cycles_used = 2;

        let mut shadow = BTreeMap::new();
        shadow.insert(AgentId::new("a1"), 0.71);
        let mut trials = BTreeMap::new();
        trials.insert(AgentId::new("a1"), true);

        let outcome =
            eng.evaluate_lifecycle(CycleId(3), &snap, &shadow, &trials, &THRESHOLDS);
        assert_eq!(outcome.updates[0].status, AgentStatus::Active);
        assert_eq!(
            outcome.status_changes[0].reason,
            StatusChangeReason::RedemptionSucceeded
        );
    }

    #[test]
    fn test_probation_success_below_threshold_still_fails() {
        let eng = engine();
        let snap = snapshot(&[("a1", 0.50, AgentStatus::Probation)]);
        let mut shadow = BTreeMap::new();
        shadow.insert(AgentId::new("a1"), 0.51);
        let mut trials = BTreeMap::new();
        trials.insert(AgentId::new("a1"), true);

        let outcome =
            eng.evaluate_lifecycle(CycleId(1), &snap, &shadow, &trials, &THRESHOLDS);
        assert_eq!(outcome.updates[0].status, AgentStatus::Probation);
        assert_eq!(outcome.updates[0].redemption_cycles_used, 1);
        assert_eq!(
            outcome.status_changes[0].reason,
            StatusChangeReason::RedemptionFailed
        );
    }

    #[test]
    fn test_redemption_budget_exhaustion_excludes() {
        let eng = engine();
        let mut snap = snapshot(&[("a1", 0.40, AgentStatus::Probation)]);
        snap.get_mut(&AgentId::new("a1")).unwrap().redemption_cycles_used = 3;

        let mut trials = BTreeMap::new();
        trials.insert(AgentId::new("a1"), false);

        let outcome = eng.evaluate_lifecycle(
            CycleId(5),
            &snap,
            &BTreeMap::new(),
            &trials,
            &THRESHOLDS,
        );
        assert_eq!(outcome.updates[0].status, AgentStatus::Excluded);
        assert_eq!(outcome.excluded().len(), 1);
    }

    #[test]
    fn test_excluded_agent_is_never_touched() {
        let eng = engine();
        let snap = snapshot(&[("a1", 0.10, AgentStatus::Excluded)]);
        let outcome = eng.evaluate_lifecycle(
            CycleId(9),
            &snap,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &THRESHOLDS,
        );
        assert!(outcome.updates.is_empty());
        assert!(outcome.status_changes.is_empty());
    }

    #[test]
    fn test_drift_fires_once_on_rising_edge() {
        let mut eng = engine();
        let snap = snapshot(&[("a1", 0.75, AgentStatus::Active)]);

        // Nine stable-then-declining samples already in the window
        eng.seed_window(
            AgentId::new("a1"),
            [0.9, 0.9, 0.9, 0.9, 0.9, 0.75, 0.75, 0.75, 0.75],
        );

        // Tenth sample completes the window: older half 0.9, newer half 0.75
        let outcome = eng.evaluate_lifecycle(
            CycleId(10),
            &snap,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &THRESHOLDS,
        );
        assert_eq!(outcome.drift_events.len(), 1);
        let event = &outcome.drift_events[0];
        assert!(event.delta >= 0.10);
        assert!((event.window_mean_before - 0.9).abs() < 1e-9);
        assert!((event.window_mean_after - 0.75).abs() < 1e-9);

        eng.commit_lifecycle(&outcome);
        assert!(eng.is_drifting(&AgentId::new("a1")));

        // Next cycle, still depressed: no duplicate event
        let again = eng.evaluate_lifecycle(
            CycleId(11),
            &snap,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &THRESHOLDS,
        );
        assert!(again.drift_events.is_empty());
    }

    #[test]
    fn test_drift_flag_clears_on_recovery() {
        let mut eng = engine();
        let snap = snapshot(&[("a1", 0.9, AgentStatus::Active)]);
        eng.drifting.insert(AgentId::new("a1"));
        eng.seed_window(AgentId::new("a1"), [0.9; 9]);

        let outcome = eng.evaluate_lifecycle(
            CycleId(12),
            &snap,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &THRESHOLDS,
        );
        eng.commit_lifecycle(&outcome);
        assert!(!eng.is_drifting(&AgentId::new("a1")));
    }

    #[test]
    fn test_evaluate_is_pure_until_commit() {
        let eng = engine();
        let snap = snapshot(&[("a1", 0.75, AgentStatus::Active)]);
        let _ = eng.evaluate_lifecycle(
            CycleId(1),
            &snap,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &THRESHOLDS,
        );
        // No window was recorded without a commit
        assert!(eng.windows.get(&AgentId::new("a1")).is_none());
    }
}
