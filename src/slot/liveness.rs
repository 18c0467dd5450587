//! Liveness Tracker
//!
//! Sole writer of `active` / `inactive_since` for locally authoritative
//! slots. Both transitions run inside the caller's entry lock, so a release
//! racing an acquire can never leave `inactive_since` set on an active slot.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{ReplicationSlot, SlotState};

/// Mark the slot held by `holder`.
///
/// Has no effect on an invalidated slot; the gate refuses those before
/// getting here.
pub fn on_acquire(slot: &mut ReplicationSlot, holder: Uuid) -> bool {
    match slot.state {
        SlotState::Valid { .. } => {
            slot.state = SlotState::active();
            slot.holder = Some(holder);
            true
        }
        SlotState::Invalidated { .. } => false,
    }
}

/// Mark the slot released at `now`.
///
/// Idempotent: releasing an already inactive slot keeps the original
/// `inactive_since`. Returns whether the slot went from active to inactive.
pub fn on_release(slot: &mut ReplicationSlot, now: DateTime<Utc>) -> bool {
    slot.holder = None;
    match slot.state {
        SlotState::Valid { active: true, .. } => {
            slot.state = SlotState::inactive(now);
            true
        }
        SlotState::Valid {
            active: false,
            inactive_since: None,
        } => {
            // Repair a row that lost its timestamp; the invariant requires one.
            slot.state = SlotState::inactive(now);
            false
        }
        _ => false,
    }
}
