//! Slot Catalog
//!
//! Per-node table of slot records. Each node owns its own instance; nodes
//! only exchange state through the sync protocol.
//!
//! Locking:
//! - The map lock guards membership only (register/remove/lookup)
//! - Every field change happens under the entry's own mutex
//! - No code path holds two entry locks at once

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};

use super::errors::{SlotError, SlotResult};
use super::types::{ReplicationSlot, SlotRow, SlotState};

/// Shared handle to one catalog entry.
pub type SlotEntry = Arc<Mutex<ReplicationSlot>>;

/// Lock an entry, recovering the data if a holder panicked.
///
/// Slot fields are plain values with no multi-step invariants spanning a
/// panic point, so the data behind a poisoned lock is still consistent.
pub(crate) fn lock_entry(entry: &SlotEntry) -> MutexGuard<'_, ReplicationSlot> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory slot table.
#[derive(Debug, Default)]
pub struct SlotCatalog {
    slots: RwLock<HashMap<String, SlotEntry>>,
}

impl SlotCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from previously persisted slots.
    pub fn from_slots(slots: impl IntoIterator<Item = ReplicationSlot>) -> Self {
        let map = slots
            .into_iter()
            .map(|slot| (slot.name.clone(), Arc::new(Mutex::new(slot))))
            .collect();
        Self {
            slots: RwLock::new(map),
        }
    }

    /// Add a slot. Names are unique per node.
    pub fn register(&self, slot: ReplicationSlot) -> SlotResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        if slots.contains_key(&slot.name) {
            return Err(SlotError::SlotAlreadyExists(slot.name));
        }
        slots.insert(slot.name.clone(), Arc::new(Mutex::new(slot)));
        Ok(())
    }

    /// Remove a slot, returning its last state.
    pub fn remove(&self, name: &str) -> Option<ReplicationSlot> {
        let entry = {
            let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
            slots.remove(name)?
        };
        let slot = lock_entry(&entry).clone();
        Some(slot)
    }

    /// Remove a slot only if `keep` rejects it under the entry lock.
    ///
    /// Returns the removed slot. The check and the removal happen while the
    /// map write lock is held, so no lookup can observe a half-removed entry.
    pub fn remove_if(
        &self,
        name: &str,
        keep: impl FnOnce(&ReplicationSlot) -> bool,
    ) -> Option<ReplicationSlot> {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        let entry = slots.get(name)?.clone();
        let slot = lock_entry(&entry);
        if keep(&slot) {
            return None;
        }
        let removed = slot.clone();
        drop(slot);
        slots.remove(name);
        Some(removed)
    }

    /// Shared handle to a slot entry.
    pub fn entry(&self, name: &str) -> Option<SlotEntry> {
        let slots = self.slots.read().unwrap_or_else(|p| p.into_inner());
        slots.get(name).cloned()
    }

    /// Run `f` on a slot inside its exclusive section.
    pub fn with_slot<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ReplicationSlot) -> R,
    ) -> SlotResult<R> {
        let entry = self.entry(name).ok_or_else(|| SlotError::not_found(name))?;
        let mut slot = lock_entry(&entry);
        Ok(f(&mut slot))
    }

    /// All entries, sorted by slot name.
    pub fn entries(&self) -> Vec<(String, SlotEntry)> {
        let slots = self.slots.read().unwrap_or_else(|p| p.into_inner());
        let mut entries: Vec<_> = slots
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Catalog read surface, sorted by slot name.
    ///
    /// Each row is consistent on its own; rows are not a single atomic
    /// snapshot of the whole table.
    pub fn rows(&self) -> Vec<SlotRow> {
        self.entries()
            .into_iter()
            .map(|(_, entry)| lock_entry(&entry).to_row())
            .collect()
    }

    pub fn row(&self, name: &str) -> Option<SlotRow> {
        self.entry(name).map(|entry| lock_entry(&entry).to_row())
    }

    /// Copies of every slot, sorted by name.
    pub fn slots(&self) -> Vec<ReplicationSlot> {
        self.entries()
            .into_iter()
            .map(|(_, entry)| lock_entry(&entry).clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries().into_iter().map(|(name, _)| name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        let slots = self.slots.read().unwrap_or_else(|p| p.into_inner());
        slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(|p| p.into_inner());
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take local authority over every mirrored slot (standby promotion).
    ///
    /// Mirrors become ordinary slots governed by this node's own timeout.
    /// Valid ones restart their inactivity clock at `now`; invalidated ones
    /// stay invalidated. Returns the names of the converted slots.
    pub fn assume_authority(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut converted = Vec::new();
        for (name, entry) in self.entries() {
            let mut slot = lock_entry(&entry);
            if !slot.synced {
                continue;
            }
            slot.synced = false;
            if let SlotState::Valid { .. } = slot.state {
                slot.state = SlotState::inactive(now);
            }
            converted.push(name);
        }
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::types::{InvalidationReason, SlotKind};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let catalog = SlotCatalog::new();
        catalog
            .register(ReplicationSlot::new("b", SlotKind::Logical, t0()))
            .unwrap();
        catalog
            .register(ReplicationSlot::new("a", SlotKind::Physical, t0()))
            .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(catalog.row("a").unwrap().kind, SlotKind::Physical);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let catalog = SlotCatalog::new();
        catalog
            .register(ReplicationSlot::new("a", SlotKind::Logical, t0()))
            .unwrap();
        let err = catalog
            .register(ReplicationSlot::new("a", SlotKind::Logical, t0()))
            .unwrap_err();
        assert_eq!(err, SlotError::SlotAlreadyExists("a".to_string()));
    }

    #[test]
    fn test_with_slot_missing() {
        let catalog = SlotCatalog::new();
        let err = catalog.with_slot("nope", |_| ()).unwrap_err();
        assert_eq!(err, SlotError::not_found("nope"));
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let catalog = SlotCatalog::new();
        catalog
            .register(ReplicationSlot::new("a", SlotKind::Logical, t0()))
            .unwrap();

        assert!(catalog.remove_if("a", |slot| !slot.synced).is_none());
        assert!(catalog.contains("a"));

        assert!(catalog.remove_if("a", |slot| slot.synced).is_some());
        assert!(!catalog.contains("a"));
    }

    #[test]
    fn test_assume_authority_converts_mirrors() {
        let catalog = SlotCatalog::new();

        let mut valid = ReplicationSlot::new("valid", SlotKind::Logical, t0());
        valid.synced = true;
        valid.state = SlotState::active();
        catalog.register(valid).unwrap();

        let mut dead = ReplicationSlot::new("dead", SlotKind::Logical, t0());
        dead.synced = true;
        dead.state = dead.state.invalidate(InvalidationReason::InactiveTimeout);
        catalog.register(dead).unwrap();

        catalog
            .register(ReplicationSlot::new("local", SlotKind::Physical, t0()))
            .unwrap();

        let later = t0() + chrono::Duration::seconds(30);
        let converted = catalog.assume_authority(later);
        assert_eq!(converted, vec!["dead".to_string(), "valid".to_string()]);

        let valid = catalog.row("valid").unwrap();
        assert!(!valid.synced);
        assert!(!valid.active);
        assert_eq!(valid.inactive_since, Some(later));

        let dead = catalog.row("dead").unwrap();
        assert!(!dead.synced);
        assert_eq!(dead.invalidation_reason, Some(InvalidationReason::InactiveTimeout));
    }
}
