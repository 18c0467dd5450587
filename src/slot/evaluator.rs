//! Invalidation Evaluator
//!
//! Runs once per checkpoint over every locally authoritative, non-temporary
//! slot and invalidates the ones that stayed inactive for at least
//! `inactive_timeout`. A zero timeout disables the check for this node.
//!
//! Passes are serialized on a pass lock. Within a pass:
//! 1. Scan: pick candidates (valid, inactive, elapsed >= timeout)
//! 2. Commit: per candidate, lock the entry, re-validate, invalidate
//!
//! A consumer may acquire a candidate between scan and commit. The commit
//! re-checks under the entry lock and leaves such a slot alone.
//!
//! `SLOT_INVALIDATED` is not logged here. The caller persists first and then
//! calls [`announce`].
//!
//! Mirrored (`synced`) slots are never touched here; their state belongs to
//! the primary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::{lock_entry, SlotCatalog, SlotEntry};
use super::clock::Clock;
use super::types::{InvalidationReason, ReplicationSlot, SlotState};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Structured record of one invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationNotice {
    pub slot_name: String,
    pub reason: InvalidationReason,
    pub inactive_since: Option<DateTime<Utc>>,
    pub invalidated_at: DateTime<Utc>,
    /// Timeout the slot was judged against.
    pub timeout_ms: u64,
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// Timeout is zero on this node; nothing was examined.
    pub timeout_disabled: bool,
    pub examined: usize,
    pub skipped_active: usize,
    pub skipped_synced: usize,
    pub skipped_temporary: usize,
    pub already_invalidated: usize,
    /// Candidates that changed under us before the commit.
    pub aborted: usize,
    pub invalidated: Vec<InvalidationNotice>,
}

impl InvalidationReport {
    pub fn invalidated_names(&self) -> Vec<&str> {
        self.invalidated
            .iter()
            .map(|n| n.slot_name.as_str())
            .collect()
    }
}

/// Why a slot is not a candidate.
enum Verdict {
    Candidate,
    Synced,
    Temporary,
    AlreadyInvalidated,
    Active,
    NotYet,
}

fn judge(slot: &ReplicationSlot, timeout: chrono::Duration, now: DateTime<Utc>) -> Verdict {
    if slot.synced {
        return Verdict::Synced;
    }
    if slot.temporary {
        return Verdict::Temporary;
    }
    match slot.state {
        SlotState::Invalidated { .. } => Verdict::AlreadyInvalidated,
        SlotState::Valid { active: true, .. } => Verdict::Active,
        SlotState::Valid {
            active: false,
            inactive_since: Some(since),
        } if now.signed_duration_since(since) >= timeout => Verdict::Candidate,
        SlotState::Valid { .. } => Verdict::NotYet,
    }
}

/// Candidates picked by a scan, waiting for their commit.
struct Scan {
    report: InvalidationReport,
    timeout: chrono::Duration,
    candidates: Vec<(String, SlotEntry)>,
}

/// Per-node invalidation evaluator.
pub struct InvalidationEvaluator {
    catalog: Arc<SlotCatalog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    pass_lock: Mutex<()>,
}

impl InvalidationEvaluator {
    pub fn new(
        catalog: Arc<SlotCatalog>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            catalog,
            clock,
            metrics,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one pass with the given timeout.
    ///
    /// Invalidations are applied in memory only. The caller makes them
    /// durable and then hands the report to [`announce`].
    pub fn run_pass(&self, inactive_timeout: Duration) -> InvalidationReport {
        let _pass = self.pass_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.metrics.increment_invalidation_passes();

        let timeout_ms = inactive_timeout.as_millis().to_string();
        log_event(
            Event::InvalidationPassBegin,
            &[("timeout_ms", timeout_ms.as_str())],
        );

        if inactive_timeout.is_zero() {
            log_event(
                Event::InvalidationPassComplete,
                &[("timeout_ms", "0"), ("disabled", "true")],
            );
            return InvalidationReport {
                timeout_disabled: true,
                ..InvalidationReport::default()
            };
        }

        // Timeouts beyond chrono's range can never elapse.
        let Ok(timeout) = chrono::Duration::from_std(inactive_timeout) else {
            log_event(
                Event::InvalidationPassComplete,
                &[("timeout_ms", timeout_ms.as_str()), ("invalidated", "0")],
            );
            return InvalidationReport {
                examined: self.catalog.len(),
                ..InvalidationReport::default()
            };
        };

        let report = self.commit(self.scan(timeout));

        let count = report.invalidated.len().to_string();
        let aborted = report.aborted.to_string();
        log_event(
            Event::InvalidationPassComplete,
            &[
                ("timeout_ms", timeout_ms.as_str()),
                ("invalidated", count.as_str()),
                ("aborted", aborted.as_str()),
            ],
        );
        report
    }

    /// Phase 1: pick candidates.
    fn scan(&self, timeout: chrono::Duration) -> Scan {
        let now = self.clock.now();
        let mut report = InvalidationReport::default();
        let mut candidates = Vec::new();
        for (name, entry) in self.catalog.entries() {
            report.examined += 1;
            let verdict = judge(&lock_entry(&entry), timeout, now);
            match verdict {
                Verdict::Candidate => candidates.push((name, entry)),
                Verdict::Synced => report.skipped_synced += 1,
                Verdict::Temporary => report.skipped_temporary += 1,
                Verdict::AlreadyInvalidated => report.already_invalidated += 1,
                Verdict::Active => report.skipped_active += 1,
                Verdict::NotYet => {}
            }
        }
        Scan {
            report,
            timeout,
            candidates,
        }
    }

    /// Phase 2: re-validate each candidate inside its entry's exclusive
    /// section and invalidate the ones that still qualify.
    fn commit(&self, scan: Scan) -> InvalidationReport {
        let Scan {
            mut report,
            timeout,
            candidates,
        } = scan;
        let timeout_ms = timeout.num_milliseconds().max(0) as u64;

        for (name, entry) in candidates {
            let mut slot = lock_entry(&entry);
            let now = self.clock.now();
            match judge(&slot, timeout, now) {
                Verdict::Candidate => {
                    let inactive_since = slot.inactive_since();
                    slot.state = slot.state.invalidate(InvalidationReason::InactiveTimeout);
                    report.invalidated.push(InvalidationNotice {
                        slot_name: name,
                        reason: InvalidationReason::InactiveTimeout,
                        inactive_since,
                        invalidated_at: now,
                        timeout_ms,
                    });
                }
                _ => {
                    report.aborted += 1;
                    self.metrics.increment_invalidations_aborted();
                }
            }
        }

        self.metrics
            .add_slots_invalidated(report.invalidated.len() as u64);
        report
    }
}

/// Emit one `SLOT_INVALIDATED` line per notice.
pub fn announce(notices: &[InvalidationNotice]) {
    for notice in notices {
        let since = notice
            .inactive_since
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let timeout_ms = notice.timeout_ms.to_string();
        log_event(
            Event::SlotInvalidated,
            &[
                ("slot", notice.slot_name.as_str()),
                ("reason", notice.reason.as_str()),
                ("inactive_since", since.as_str()),
                ("timeout_ms", timeout_ms.as_str()),
            ],
        );
    }
}
