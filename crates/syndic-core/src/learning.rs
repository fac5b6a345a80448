//! Asymmetric trust learning.
//!
//! A success nudges trust toward 1 by a fraction of the remaining headroom;
//! a failure cuts it proportionally, and harder: `t + η(1−t)` versus
//! `t − γt` with γ > η by default. When an agent executed several tasks in
//! one cycle the updates compose left-to-right in task priority order, and
//! the composed result is the single value written to history.

use std::collections::BTreeMap;

use chrono::Utc;

use syndic_state::{AgentId, CycleId, TrustChange, TrustOutcome};

/// One observed outcome, in task priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedOutcome {
    pub agent_id: AgentId,
    pub success: bool,
}

/// Apply one asymmetric update and clamp into [0, 1].
pub fn update_trust(trust: f64, success: bool, reward_rate: f64, penalty_rate: f64) -> f64 {
    let updated = if success {
        trust + reward_rate * (1.0 - trust)
    } else {
        trust - penalty_rate * trust
    };
    updated.clamp(0.0, 1.0)
}

/// Fold a cycle's outcomes into per-agent trust values.
///
/// `base` holds the pre-cycle scores; the result maps every updated agent to
/// its composed post-cycle score plus the `TrustChange` rows for the commit.
/// Agents without outcomes are untouched (null outcomes never reach here).
pub fn apply_outcomes(
    cycle: CycleId,
    base: &BTreeMap<AgentId, f64>,
    outcomes: &[ObservedOutcome],
    reward_rate: f64,
    penalty_rate: f64,
) -> (BTreeMap<AgentId, f64>, Vec<TrustChange>) {
    let mut shadow: BTreeMap<AgentId, f64> = BTreeMap::new();
    let mut saw_success: BTreeMap<AgentId, bool> = BTreeMap::new();
    let mut saw_failure: BTreeMap<AgentId, bool> = BTreeMap::new();

    for outcome in outcomes {
        let Some(&start) = base.get(&outcome.agent_id) else {
            continue;
        };
        let current = *shadow.get(&outcome.agent_id).unwrap_or(&start);
        let updated = update_trust(current, outcome.success, reward_rate, penalty_rate);
        shadow.insert(outcome.agent_id.clone(), updated);
        if outcome.success {
            saw_success.insert(outcome.agent_id.clone(), true);
        } else {
            saw_failure.insert(outcome.agent_id.clone(), true);
        }
    }

    let now = Utc::now();
    let changes = shadow
        .iter()
        .map(|(agent_id, &new_score)| {
            let outcome = match (
                saw_success.contains_key(agent_id),
                saw_failure.contains_key(agent_id),
            ) {
                (true, true) => TrustOutcome::Mixed,
                (true, false) => TrustOutcome::Success,
                _ => TrustOutcome::Failure,
            };
            TrustChange {
                agent_id: agent_id.clone(),
                cycle,
                old_score: base[agent_id],
                new_score,
                outcome,
                timestamp: now,
            }
        })
        .collect();

    (shadow, changes)
}
