//! Adaptive threshold mutation.
//!
//! Watches a sliding window of cycle success rates and nudges the trust,
//! suppression, and drift thresholds toward the configured target: tighten
//! when the system underperforms, loosen when it overperforms, hold inside
//! the hysteresis band. Every step is clamped to its safety band and the
//! `suppression < trust` ordering is restored by shrinking the suppression
//! step when a clamp would break it.
//!
//! Mirrors the learning split elsewhere in the core: `evaluate` is pure,
//! `commit` applies a decision after the cycle persisted.

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use syndic_state::{CycleId, MutationDirection, MutationRecord, Thresholds};

const TRUST_BAND: (f64, f64) = (0.5, 0.9);
const SUPPRESSION_BAND: (f64, f64) = (0.4, 0.85);
const DRIFT_DELTA_FLOOR: f64 = 0.01;
/// Minimum separation restored between suppression and trust thresholds.
const ORDERING_GAP: f64 = 0.01;

/// The outcome of one mutation evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDecision {
    pub direction: MutationDirection,
    pub old: Thresholds,
    pub new: Thresholds,
    pub observed_success_rate: f64,
}

impl MutationDecision {
    /// Convert an applied (non-hold) decision into its persistent record.
    pub fn into_record(self, cycle: CycleId) -> Option<MutationRecord> {
        if self.direction == MutationDirection::Hold {
            return None;
        }
        Some(MutationRecord {
            cycle,
            old: self.old,
            new: self.new,
            observed_success_rate: self.observed_success_rate,
            direction: self.direction,
            timestamp: Utc::now(),
        })
    }
}

/// Trend over the success-rate window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTrend {
    pub average_success_rate: f64,
    pub cycles_tracked: usize,
    /// "improving", "declining", or "stable" when the window is too short.
    pub trend: String,
}

/// Sliding-window threshold tuner.
pub struct MutationEngine {
    thresholds: Thresholds,
    rate: f64,
    target: f64,
    band_low: f64,
    band_high: f64,
    window_len: usize,
    min_window: usize,
    window: VecDeque<f64>,
}

impl MutationEngine {
    pub fn new(
        thresholds: Thresholds,
        mutation_rate: f64,
        target_success_rate: f64,
        band_low: f64,
        band_high: f64,
        window_len: usize,
        min_window: usize,
    ) -> Self {
        MutationEngine {
            thresholds,
            rate: mutation_rate,
            target: target_success_rate,
            band_low,
            band_high,
            window_len,
            min_window,
            window: VecDeque::new(),
        }
    }

    /// Current thresholds (as of the last committed mutation).
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Seed the success-rate window from persisted mutation history
    /// (oldest first). Startup continuity across restarts.
    pub fn seed_window(&mut self, rates: impl IntoIterator<Item = f64>) {
        for rate in rates {
            self.window.push_back(rate);
            while self.window.len() > self.window_len {
                self.window.pop_front();
            }
        }
    }

    /// Restore thresholds persisted by an earlier run.
    pub fn restore_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    /// Evaluate this cycle's success rate against the window. Pure: engine
    /// state is untouched until [`MutationEngine::commit`].
    pub fn evaluate(&self, success_rate: f64) -> MutationDecision {
        let old = self.thresholds;

        let mut window = self.window.clone();
        window.push_back(success_rate);
        while window.len() > self.window_len {
            window.pop_front();
        }

        if window.len() < self.min_window {
            return MutationDecision {
                direction: MutationDirection::Hold,
                old,
                new: old,
                observed_success_rate: success_rate,
            };
        }

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let (direction, new) = if mean < self.target - self.band_low {
            (MutationDirection::Tighten, self.step(old, 1.0))
        } else if mean > self.target + self.band_high {
            (MutationDirection::Loosen, self.step(old, -1.0))
        } else {
            (MutationDirection::Hold, old)
        };

        let direction = if direction != MutationDirection::Hold && new == old {
            // Clamps swallowed the whole step; report it as a hold.
            MutationDirection::Hold
        } else {
            direction
        };

        MutationDecision {
            direction,
            old,
            new,
            observed_success_rate: mean,
        }
    }

    /// Apply an evaluated decision: push the observed rate and adopt the new
    /// thresholds. Call only after the cycle committed.
    pub fn commit(&mut self, success_rate: f64, decision: &MutationDecision) {
        self.window.push_back(success_rate);
        while self.window.len() > self.window_len {
            self.window.pop_front();
        }
        if decision.direction != MutationDirection::Hold {
            debug!(
                direction = %decision.direction,
                trust = decision.new.trust_threshold,
                suppression = decision.new.suppression_threshold,
                "thresholds mutated"
            );
            self.thresholds = decision.new;
        }
    }

    /// Windowed average and direction of travel.
    pub fn performance_trend(&self) -> PerformanceTrend {
        if self.window.is_empty() {
            return PerformanceTrend {
                average_success_rate: 0.0,
                cycles_tracked: 0,
                trend: "stable".to_string(),
            };
        }
        let average = self.window.iter().sum::<f64>() / self.window.len() as f64;
        let trend = if self.window.len() >= 2 {
            let half = self.window.len() / 2;
            let older: f64 = self.window.iter().take(half).sum::<f64>() / half as f64;
            let newer: f64 = self.window.iter().skip(half).sum::<f64>()
                / (self.window.len() - half) as f64;
            if newer > older {
                "improving"
            } else if newer < older {
                "declining"
            } else {
                "stable"
            }
        } else {
            "stable"
        };
        PerformanceTrend {
            average_success_rate: average,
            cycles_tracked: self.window.len(),
            trend: trend.to_string(),
        }
    }

    /// Step all three thresholds in `sign` direction, clamp to safety bands,
    /// then restore the ordering invariant by pulling suppression below
    /// trust if a clamp inverted them.
    fn step(&self, old: Thresholds, sign: f64) -> Thresholds {
        let mut new = Thresholds {
            trust_threshold: (old.trust_threshold + sign * self.rate)
                .clamp(TRUST_BAND.0, TRUST_BAND.1),
            suppression_threshold: (old.suppression_threshold + sign * self.rate / 2.0)
                .clamp(SUPPRESSION_BAND.0, SUPPRESSION_BAND.1),
            drift_delta: (old.drift_delta + sign * self.rate / 4.0).max(DRIFT_DELTA_FLOOR),
        };

        if new.suppression_threshold >= new.trust_threshold {
            new.suppression_threshold =
                (new.trust_threshold - ORDERING_GAP).max(SUPPRESSION_BAND.0);
        }
        new
    }
}
