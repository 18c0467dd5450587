//! Slot metrics
//!
//! Counters only, monotonic, reset on process start. Relaxed atomics: exact
//! per counter, no cross-counter ordering.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one node.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    invalidation_passes: AtomicU64,
    slots_invalidated: AtomicU64,
    invalidations_aborted: AtomicU64,
    acquisitions: AtomicU64,
    acquisitions_rejected: AtomicU64,
    sync_polls: AtomicU64,
    sync_polls_skipped: AtomicU64,
    mirrors_created: AtomicU64,
    mirrors_dropped: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_invalidation_passes(&self) {
        self.invalidation_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_slots_invalidated(&self, n: u64) {
        self.slots_invalidated.fetch_add(n, Ordering::Relaxed);
    }

    /// An invalidation lost its race with a concurrent acquire.
    pub fn increment_invalidations_aborted(&self) {
        self.invalidations_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_acquisitions(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_acquisitions_rejected(&self) {
        self.acquisitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sync_polls(&self) {
        self.sync_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sync_polls_skipped(&self) {
        self.sync_polls_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_mirrors_created(&self, n: u64) {
        self.mirrors_created.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_mirrors_dropped(&self, n: u64) {
        self.mirrors_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invalidation_passes: self.invalidation_passes.load(Ordering::Relaxed),
            slots_invalidated: self.slots_invalidated.load(Ordering::Relaxed),
            invalidations_aborted: self.invalidations_aborted.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            acquisitions_rejected: self.acquisitions_rejected.load(Ordering::Relaxed),
            sync_polls: self.sync_polls.load(Ordering::Relaxed),
            sync_polls_skipped: self.sync_polls_skipped.load(Ordering::Relaxed),
            mirrors_created: self.mirrors_created.load(Ordering::Relaxed),
            mirrors_dropped: self.mirrors_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub invalidation_passes: u64,
    pub slots_invalidated: u64,
    pub invalidations_aborted: u64,
    pub acquisitions: u64,
    pub acquisitions_rejected: u64,
    pub sync_polls: u64,
    pub sync_polls_skipped: u64,
    pub mirrors_created: u64,
    pub mirrors_dropped: u64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.increment_invalidation_passes();
        metrics.increment_invalidation_passes();
        metrics.add_slots_invalidated(3);
        metrics.increment_sync_polls_skipped();

        let snap = metrics.snapshot();
        assert_eq!(snap.invalidation_passes, 2);
        assert_eq!(snap.slots_invalidated, 3);
        assert_eq!(snap.sync_polls_skipped, 1);
    }

    #[test]
    fn test_json_has_every_counter() {
        let json: serde_json::Value =
            serde_json::from_str(&MetricsRegistry::new().snapshot().to_json()).unwrap();
        for key in [
            "invalidation_passes",
            "slots_invalidated",
            "invalidations_aborted",
            "acquisitions",
            "acquisitions_rejected",
            "sync_polls",
            "sync_polls_skipped",
            "mirrors_created",
            "mirrors_dropped",
        ] {
            assert_eq!(json[key], 0, "missing {}", key);
        }
    }
}
