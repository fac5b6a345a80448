//! Global atomic counters for governance observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event (e.g. at the end of a cycle batch).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    cycles_completed: AtomicU64,
    tasks_executed: AtomicU64,
    breaker_trips: AtomicU64,
    drift_events: AtomicU64,
    mutations_applied: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            cycles_completed: AtomicU64::new(0),
            tasks_executed: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
            drift_events: AtomicU64::new(0),
            mutations_applied: AtomicU64::new(0),
        }
    }

    pub fn inc_cycles_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tasks_executed(&self, count: u64) {
        self.tasks_executed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_breaker_trips(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_drift_events(&self, count: u64) {
        self.drift_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_mutations_applied(&self) {
        self.mutations_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            cycles_completed = self.cycles_completed(),
            tasks_executed = self.tasks_executed(),
            breaker_trips = self.breaker_trips(),
            drift_events = self.drift_events(),
            mutations_applied = self.mutations_applied(),
        );
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn tasks_executed(&self) -> u64 {
        self.tasks_executed.load(Ordering::Relaxed)
    }

    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips.load(Ordering::Relaxed)
    }

    pub fn drift_events(&self) -> u64 {
        self.drift_events.load(Ordering::Relaxed)
    }

    pub fn mutations_applied(&self) -> u64 {
        self.mutations_applied.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.cycles_completed.store(0, Ordering::Relaxed);
        self.tasks_executed.store(0, Ordering::Relaxed);
        self.breaker_trips.store(0, Ordering::Relaxed);
        self.drift_events.store(0, Ordering::Relaxed);
        self.mutations_applied.store(0, Ordering::Relaxed);
    }
}
