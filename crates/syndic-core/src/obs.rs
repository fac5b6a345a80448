//! Structured observability hooks for the governance cycle lifecycle.
//!
//! Provides a cycle-scoped tracing span via the `CycleSpan` RAII guard and
//! emission functions for the key lifecycle moments. Events are emitted at
//! `info!` level; use [`crate::telemetry::init_tracing`] to configure output.

use tracing::info;

use syndic_state::CycleId;

/// RAII guard that enters a cycle-scoped tracing span.
pub struct CycleSpan {
    _span: tracing::span::EnteredSpan,
}

impl CycleSpan {
    /// Create and enter a span tagged with the cycle id.
    pub fn enter(cycle: CycleId) -> Self {
        let span = tracing::info_span!("syndic.cycle", cycle = cycle.0);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: cycle started with batch size and pool size.
pub fn emit_cycle_started(cycle: CycleId, tasks: usize, agents: usize) {
    info!(
        event = "cycle.started",
        cycle = cycle.0,
        tasks = tasks,
        agents = agents,
    );
}

/// Emit event: cycle finished with outcome counts.
pub fn emit_cycle_finished(
    cycle: CycleId,
    status: &str,
    executed: usize,
    successes: usize,
    duration_ms: u64,
) {
    info!(
        event = "cycle.finished",
        cycle = cycle.0,
        status = status,
        executed = executed,
        successes = successes,
        duration_ms = duration_ms,
    );
}

/// Emit event: cycle commit failed and in-memory state was rolled back.
pub fn emit_cycle_rollback(cycle: CycleId, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "cycle.rollback", cycle = cycle.0, error = %error);
}
