//! Replication Slot Lifecycle
//!
//! Invariants:
//! - `inactive_since.is_some() == !active` for every valid slot at rest
//! - An invalidation reason is written once and never changes or clears
//! - An acquired slot is never invalidated until it is released
//! - An invalidated slot can never be acquired again
//!
//! Primary authority:
//! - Only the primary decides invalidation of a failover slot
//! - A standby mirror (`synced`) is a cache of the primary row; no local
//!   policy ever derives new state for it
//! - The primary's invalidation reaches the mirror within one sync poll
//!
//! Each node owns its own catalog. Nodes exchange slot state only through
//! the sync agent.

mod catalog;
mod clock;
mod config;
mod errors;
mod evaluator;
mod gate;
mod liveness;
mod manager;
mod store;
mod sync;
mod types;

pub use catalog::{SlotCatalog, SlotEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{parse_duration, SlotConfig, DEFAULT_SYNC_INTERVAL, DEFAULT_SYNC_TIMEOUT};
pub use errors::{SlotError, SlotResult};
pub use evaluator::{InvalidationEvaluator, InvalidationNotice, InvalidationReport};
pub use gate::{AcquisitionGate, SlotHandle};
pub use liveness::{on_acquire, on_release};
pub use manager::{NodeRole, SlotManager};
pub use store::{state_path, SlotStore, FORMAT_VERSION};
pub use sync::{
    FileSlotSource, FlushPosition, PrimarySlotSource, SlotSyncAgent, SlotSyncWorker,
    StandbyProgress, SyncReport,
};
pub use types::{InvalidationReason, Lsn, ReplicationSlot, SlotKind, SlotRow, SlotState};
