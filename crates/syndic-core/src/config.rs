//! Governance configuration.
//!
//! Every tunable of the plane lives here and is passed explicitly at loop
//! construction — no process-wide state. `validate()` runs once at startup;
//! a rejected configuration is fatal.

use serde::{Deserialize, Serialize};
use syndic_state::Thresholds;

use crate::error::{GovernanceError, Result};
use crate::prioritizer::PriorityWeights;

/// All governance tunables with their defaults.
///
/// The trust/suppression defaults are 0.70 / 0.55: suppression is the floor
/// an agent falls through, assignment is the bar it must clear, and the
/// floor must sit strictly below the bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Minimum trust to be assigned.
    pub trust_threshold: f64,
    /// Below this, an agent is suppressed at end of cycle.
    pub suppression_threshold: f64,
    /// Probation attempts before an agent is excluded.
    pub max_redemption_cycles: u32,
    /// Rolling half-window mean gap that triggers drift.
    pub drift_delta: f64,
    /// Samples per agent in the drift window.
    pub drift_window: usize,
    /// Asymmetric success update (η).
    pub reward_rate: f64,
    /// Asymmetric failure update (γ).
    pub penalty_rate: f64,
    /// Threshold step size (Δ).
    pub mutation_rate: f64,
    /// Cycles averaged for mutation.
    pub mutation_window: usize,
    /// Minimum window length before mutation may act.
    pub mutation_min_window: usize,
    /// Target success rate (s*).
    pub target_success_rate: f64,
    /// Hysteresis below s* before tightening.
    pub band_low: f64,
    /// Hysteresis above s* before loosening.
    pub band_high: f64,
    /// Executor fan-out cap.
    pub max_parallel_executions: usize,
    /// Per-task executor timeout; `None` is unbounded.
    pub task_timeout_ms: Option<u64>,
    /// Prioritizer weights.
    pub priority_weights: PriorityWeights,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        GovernanceConfig {
            trust_threshold: 0.70,
            suppression_threshold: 0.55,
            max_redemption_cycles: 4,
            drift_delta: 0.10,
            drift_window: 10,
            reward_rate: 0.02,
            penalty_rate: 0.05,
            mutation_rate: 0.02,
            mutation_window: 10,
            mutation_min_window: 5,
            target_success_rate: 0.85,
            band_low: 0.10,
            band_high: 0.05,
            max_parallel_executions: 1,
            task_timeout_ms: None,
            priority_weights: PriorityWeights::default(),
        }
    }
}

impl GovernanceConfig {
    /// Set the trust threshold.
    pub fn with_trust_threshold(mut self, value: f64) -> Self {
        self.trust_threshold = value;
        self
    }

    /// Set the suppression threshold.
    pub fn with_suppression_threshold(mut self, value: f64) -> Self {
        self.suppression_threshold = value;
        self
    }

    /// Set the redemption budget.
    pub fn with_max_redemption_cycles(mut self, value: u32) -> Self {
        self.max_redemption_cycles = value;
        self
    }

    /// Set the drift sensitivity.
    pub fn with_drift_delta(mut self, value: f64) -> Self {
        self.drift_delta = value;
        self
    }

    /// Set the learning rates (η, γ).
    pub fn with_learning_rates(mut self, reward: f64, penalty: f64) -> Self {
        self.reward_rate = reward;
        self.penalty_rate = penalty;
        self
    }

    /// Set the executor fan-out cap.
    pub fn with_max_parallel_executions(mut self, value: usize) -> Self {
        self.max_parallel_executions = value;
        self
    }

    /// Set the per-task executor timeout.
    pub fn with_task_timeout_ms(mut self, value: u64) -> Self {
        self.task_timeout_ms = Some(value);
        self
    }

    /// The mutable subset handed to the mutation engine at startup.
    pub fn initial_thresholds(&self) -> Thresholds {
        Thresholds {
            trust_threshold: self.trust_threshold,
            suppression_threshold: self.suppression_threshold,
            drift_delta: self.drift_delta,
        }
    }

    /// Validate the configuration. Any violation is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if !(0.0..=1.0).contains(&v) || v.is_nan() {
                return Err(GovernanceError::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {v}"
                )));
            }
            Ok(())
        };

        unit("trust_threshold", self.trust_threshold)?;
        unit("suppression_threshold", self.suppression_threshold)?;
        unit("reward_rate", self.reward_rate)?;
        unit("penalty_rate", self.penalty_rate)?;
        unit("target_success_rate", self.target_success_rate)?;
        unit("band_low", self.band_low)?;
        unit("band_high", self.band_high)?;

        if self.suppression_threshold >= self.trust_threshold {
            return Err(GovernanceError::InvalidConfig(format!(
                "suppression_threshold ({}) must be strictly below trust_threshold ({})",
                self.suppression_threshold, self.trust_threshold
            )));
        }
        if self.drift_delta <= 0.0 || self.drift_delta.is_nan() {
            return Err(GovernanceError::InvalidConfig(format!(
                "drift_delta must be positive, got {}",
                self.drift_delta
            )));
        }
        if self.drift_window < 2 || self.drift_window % 2 != 0 {
            return Err(GovernanceError::InvalidConfig(format!(
                "drift_window must be an even number >= 2, got {}",
                self.drift_window
            )));
        }
        if self.mutation_rate <= 0.0 {
            return Err(GovernanceError::InvalidConfig(format!(
                "mutation_rate must be positive, got {}",
                self.mutation_rate
            )));
        }
        if self.mutation_window == 0 || self.mutation_min_window == 0 {
            return Err(GovernanceError::InvalidConfig(
                "mutation windows must be non-zero".to_string(),
            ));
        }
        if self.mutation_min_window > self.mutation_window {
            return Err(GovernanceError::InvalidConfig(format!(
                "mutation_min_window ({}) exceeds mutation_window ({})",
                self.mutation_min_window, self.mutation_window
            )));
        }
        if self.max_parallel_executions == 0 {
            return Err(GovernanceError::InvalidConfig(
                "max_parallel_executions must be at least 1".to_string(),
            ));
        }
        self.priority_weights.validate()?;
        Ok(())
    }
}
