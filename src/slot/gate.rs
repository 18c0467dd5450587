//! Acquisition Gate
//!
//! The one entry point for any operation that reads from or advances a
//! slot. The invalidation check and the active registration happen in a
//! single exclusive section on the slot entry; once acquired, a slot cannot
//! be invalidated until it is released.

use std::sync::Arc;

use uuid::Uuid;

use super::catalog::{lock_entry, SlotCatalog, SlotEntry};
use super::clock::Clock;
use super::errors::{SlotError, SlotResult};
use super::liveness;
use super::types::{SlotRow, SlotState};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Gate in front of a node's slot catalog.
pub struct AcquisitionGate {
    catalog: Arc<SlotCatalog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl AcquisitionGate {
    pub fn new(
        catalog: Arc<SlotCatalog>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            catalog,
            clock,
            metrics,
        }
    }

    /// Acquire a slot for a local consumer.
    ///
    /// # Errors
    ///
    /// - `SlotNotFound`: no such slot
    /// - `SlotInvalidated`: permanent; the slot must be dropped and recreated
    /// - `SlotSynced`: the slot mirrors a primary slot on this standby
    /// - `SlotActive`: another consumer holds it
    pub fn try_acquire(&self, slot_name: &str) -> SlotResult<SlotHandle> {
        let result = self.acquire_inner(slot_name);
        match &result {
            Ok(handle) => {
                self.metrics.increment_acquisitions();
                let holder = handle.holder.to_string();
                log_event(
                    Event::SlotAcquired,
                    &[("slot", slot_name), ("holder", holder.as_str())],
                );
            }
            Err(err) => {
                self.metrics.increment_acquisitions_rejected();
                let message = err.to_string();
                log_event(
                    Event::SlotAcquireRejected,
                    &[("slot", slot_name), ("code", err.code()), ("error", message.as_str())],
                );
            }
        }
        result
    }

    fn acquire_inner(&self, slot_name: &str) -> SlotResult<SlotHandle> {
        let entry = self
            .catalog
            .entry(slot_name)
            .ok_or_else(|| SlotError::not_found(slot_name))?;

        let holder = Uuid::new_v4();
        {
            let mut slot = lock_entry(&entry);

            if let SlotState::Invalidated { reason, .. } = slot.state {
                return Err(SlotError::invalidated(slot_name, reason));
            }
            if slot.synced {
                return Err(SlotError::SlotSynced(slot_name.to_string()));
            }
            if slot.is_active() {
                return Err(SlotError::SlotActive(slot_name.to_string()));
            }

            liveness::on_acquire(&mut slot, holder);
        }

        Ok(SlotHandle {
            name: slot_name.to_string(),
            holder,
            entry,
            clock: Arc::clone(&self.clock),
            released: false,
        })
    }
}

/// A held slot. Dropping the handle releases it.
pub struct SlotHandle {
    name: String,
    holder: Uuid,
    entry: SlotEntry,
    clock: Arc<dyn Clock>,
    released: bool,
}

impl SlotHandle {
    pub fn slot_name(&self) -> &str {
        &self.name
    }

    /// Identity of this consumer.
    pub fn holder(&self) -> Uuid {
        self.holder
    }

    /// Current catalog view of the held slot.
    pub fn row(&self) -> SlotRow {
        lock_entry(&self.entry).to_row()
    }

    /// Release explicitly.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let released = {
            let mut slot = lock_entry(&self.entry);
            // Only the current holder may flip the slot back to inactive.
            if slot.holder != Some(self.holder) {
                return;
            }
            liveness::on_release(&mut slot, self.clock.now())
        };

        if released {
            let holder = self.holder.to_string();
            log_event(
                Event::SlotReleased,
                &[("slot", self.name.as_str()), ("holder", holder.as_str())],
            );
        }
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("name", &self.name)
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::clock::ManualClock;
    use crate::slot::types::{InvalidationReason, ReplicationSlot, SlotKind};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn setup() -> (Arc<SlotCatalog>, Arc<ManualClock>, AcquisitionGate) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let catalog = Arc::new(SlotCatalog::new());
        catalog
            .register(ReplicationSlot::new("s1", SlotKind::Logical, clock.now()))
            .unwrap();
        let gate = AcquisitionGate::new(
            Arc::clone(&catalog),
            clock.clone(),
            Arc::new(MetricsRegistry::new()),
        );
        (catalog, clock, gate)
    }

    #[test]
    fn test_acquire_and_drop_release() {
        let (catalog, clock, gate) = setup();

        let handle = gate.try_acquire("s1").unwrap();
        assert!(handle.row().active);
        assert_eq!(handle.row().inactive_since, None);
        let held_by = catalog.entry("s1").unwrap().lock().unwrap().holder;
        assert_eq!(held_by, Some(handle.holder()));

        clock.advance(Duration::from_secs(3));
        drop(handle);

        let row = catalog.row("s1").unwrap();
        assert!(!row.active);
        assert_eq!(row.inactive_since, Some(clock.now()));
    }

    #[test]
    fn test_unknown_slot() {
        let (_, _, gate) = setup();
        assert_eq!(
            gate.try_acquire("missing").unwrap_err(),
            SlotError::not_found("missing")
        );
    }

    #[test]
    fn test_second_consumer_rejected() {
        let (_, _, gate) = setup();
        let _held = gate.try_acquire("s1").unwrap();
        assert_eq!(
            gate.try_acquire("s1").unwrap_err(),
            SlotError::SlotActive("s1".to_string())
        );
    }

    #[test]
    fn test_invalidated_slot_rejected_and_stays_inactive() {
        let (catalog, _, gate) = setup();
        catalog
            .with_slot("s1", |slot| {
                slot.state = slot.state.invalidate(InvalidationReason::InactiveTimeout)
            })
            .unwrap();

        let err = gate.try_acquire("s1").unwrap_err();
        assert_eq!(
            err,
            SlotError::invalidated("s1", InvalidationReason::InactiveTimeout)
        );
        assert!(err.to_string().contains("\"s1\""));
        assert!(!catalog.row("s1").unwrap().active);
    }

    #[test]
    fn test_synced_slot_rejected() {
        let (catalog, _, gate) = setup();
        catalog.with_slot("s1", |slot| slot.synced = true).unwrap();
        assert_eq!(
            gate.try_acquire("s1").unwrap_err(),
            SlotError::SlotSynced("s1".to_string())
        );
    }

    #[test]
    fn test_explicit_release_then_reacquire() {
        let (_, _, gate) = setup();
        gate.try_acquire("s1").unwrap().release();
        let again = gate.try_acquire("s1").unwrap();
        assert!(again.row().active);
    }
}
