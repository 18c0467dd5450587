//! Observable slot lifecycle events
//!
//! Events are explicit and typed; the string form is what lands in the log.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Node lifecycle
    BootStart,
    BootComplete,
    ConfigLoaded,

    // Durable slot state
    SlotStateLoaded,
    SlotStatePersisted,

    // Acquisition gate
    SlotAcquired,
    SlotReleased,
    SlotAcquireRejected,

    // Invalidation evaluator
    InvalidationPassBegin,
    InvalidationPassComplete,
    /// A slot reached its terminal state
    SlotInvalidated,

    // Slot sync agent
    SyncBegin,
    SyncComplete,
    /// Poll skipped after a transport failure; retried next tick
    SyncSkipped,
    MirrorCreated,
    MirrorPersisted,
    MirrorDropped,
    SyncConflict,

    // Promotion
    AuthorityAssumed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "AEROSLOT_STARTUP_BEGIN",
            Event::BootComplete => "AEROSLOT_STARTUP_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::SlotStateLoaded => "SLOT_STATE_LOADED",
            Event::SlotStatePersisted => "SLOT_STATE_PERSISTED",

            Event::SlotAcquired => "SLOT_ACQUIRED",
            Event::SlotReleased => "SLOT_RELEASED",
            Event::SlotAcquireRejected => "SLOT_ACQUIRE_REJECTED",

            Event::InvalidationPassBegin => "SLOT_INVALIDATION_PASS_BEGIN",
            Event::InvalidationPassComplete => "SLOT_INVALIDATION_PASS_COMPLETE",
            Event::SlotInvalidated => "SLOT_INVALIDATED",

            Event::SyncBegin => "SLOT_SYNC_BEGIN",
            Event::SyncComplete => "SLOT_SYNC_COMPLETE",
            Event::SyncSkipped => "SLOT_SYNC_SKIPPED",
            Event::MirrorCreated => "SLOT_MIRROR_CREATED",
            Event::MirrorPersisted => "SLOT_MIRROR_PERSISTED",
            Event::MirrorDropped => "SLOT_MIRROR_DROPPED",
            Event::SyncConflict => "SLOT_SYNC_CONFLICT",

            Event::AuthorityAssumed => "SLOT_AUTHORITY_ASSUMED",
        }
    }

    /// Events worth an operator's attention.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::SyncSkipped | Event::SyncConflict | Event::SlotAcquireRejected
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
