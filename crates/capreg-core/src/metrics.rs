//! Global atomic counters for registry activity.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits
//! the current values as a single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    records_created: AtomicU64,
    updates_applied: AtomicU64,
    version_conflicts: AtomicU64,
    evaluations_recorded: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            records_created: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            version_conflicts: AtomicU64::new(0),
            evaluations_recorded: AtomicU64::new(0),
        }
    }

    pub fn inc_records_created(&self) {
        self.records_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "records_created", "counter incremented");
    }

    /// Counts every successful versioned write, soft deletes included.
    pub fn inc_updates(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "updates_applied", "counter incremented");
    }

    pub fn inc_conflicts(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "version_conflicts", "counter incremented");
    }

    pub fn inc_evaluations(&self) {
        self.evaluations_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_recorded", "counter incremented");
    }

    /// Emit all counters as one `info!` event. Call at natural boundaries
    /// (end of a CLI command, end of an evolution run).
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            records_created = self.records_created(),
            updates_applied = self.updates_applied(),
            version_conflicts = self.version_conflicts(),
            evaluations_recorded = self.evaluations_recorded(),
        );
    }

    pub fn records_created(&self) -> u64 {
        self.records_created.load(Ordering::Relaxed)
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied.load(Ordering::Relaxed)
    }

    pub fn version_conflicts(&self) -> u64 {
        self.version_conflicts.load(Ordering::Relaxed)
    }

    pub fn evaluations_recorded(&self) -> u64 {
        self.evaluations_recorded.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.records_created.store(0, Ordering::Relaxed);
        self.updates_applied.store(0, Ordering::Relaxed);
        self.version_conflicts.store(0, Ordering::Relaxed);
        self.evaluations_recorded.store(0, Ordering::Relaxed);
    }
}
