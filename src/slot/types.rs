//! Replication slot records
//!
//! A slot is either Valid (with its liveness pair) or Invalidated.
//! Invalidated is terminal: there is no transition out of it.
//!
//! Liveness invariant: `inactive_since` is `None` if and only if `active`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::errors::{SlotError, SlotResult};

/// Write-ahead log position.
///
/// Rendered as two hex halves separated by a slash, e.g. `0/16B3748`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = SlotError;

    fn from_str(s: &str) -> SlotResult<Self> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| SlotError::persistence(format!("malformed LSN '{}'", s)))?;
        let hi = u32::from_str_radix(hi, 16)
            .map_err(|e| SlotError::persistence(format!("malformed LSN '{}': {}", s, e)))?;
        let lo = u32::from_str_radix(lo, 16)
            .map_err(|e| SlotError::persistence(format!("malformed LSN '{}': {}", s, e)))?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Slot kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Retains WAL for a streaming standby
    Physical,
    /// Retains WAL for a logical decoding consumer
    Logical,
}

impl SlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Physical => "physical",
            SlotKind::Logical => "logical",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a slot was invalidated.
///
/// Only `InactiveTimeout` is decided by this crate; the other reasons are
/// set by the WAL retention layer and are carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Required WAL was already removed
    WalRemoved,
    /// `wal_level` is too low for the slot kind
    WalLevelInsufficient,
    /// Required catalog rows were removed
    Rotation,
    /// Slot stayed inactive longer than the configured timeout
    InactiveTimeout,
}

impl InvalidationReason {
    /// Stable token used in logs, errors and the catalog surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationReason::WalRemoved => "wal_removed",
            InvalidationReason::WalLevelInsufficient => "wal_level_insufficient",
            InvalidationReason::Rotation => "rotation",
            InvalidationReason::InactiveTimeout => "inactive_timeout",
        }
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-slot lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Slot may serve changes.
    Valid {
        active: bool,
        inactive_since: Option<DateTime<Utc>>,
    },

    /// Terminal. The slot can never serve changes again.
    Invalidated {
        reason: InvalidationReason,
        /// Liveness at the moment of invalidation, kept for the catalog view.
        inactive_since: Option<DateTime<Utc>>,
    },
}

impl SlotState {
    /// A valid slot that nobody holds, inactive since `since`.
    pub fn inactive(since: DateTime<Utc>) -> Self {
        Self::Valid {
            active: false,
            inactive_since: Some(since),
        }
    }

    /// A valid slot currently held by a consumer.
    pub fn active() -> Self {
        Self::Valid {
            active: true,
            inactive_since: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Valid { active: true, .. })
    }

    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::Invalidated { .. })
    }

    pub fn inactive_since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Valid { inactive_since, .. } => *inactive_since,
            Self::Invalidated { inactive_since, .. } => *inactive_since,
        }
    }

    pub fn invalidation_reason(&self) -> Option<InvalidationReason> {
        match self {
            Self::Valid { .. } => None,
            Self::Invalidated { reason, .. } => Some(*reason),
        }
    }

    /// Move to Invalidated.
    ///
    /// Write-once: an already invalidated state keeps its first reason.
    pub fn invalidate(self, reason: InvalidationReason) -> Self {
        match self {
            Self::Valid { inactive_since, .. } => Self::Invalidated {
                reason,
                inactive_since,
            },
            invalidated @ Self::Invalidated { .. } => invalidated,
        }
    }
}

/// A replication slot as held in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSlot {
    pub name: String,
    pub kind: SlotKind,
    /// Vanishes at process end; never persisted.
    pub temporary: bool,
    /// Standby-side mirror of a primary slot.
    pub synced: bool,
    /// Eligible for mirroring onto standbys.
    pub failover: bool,
    pub state: SlotState,
    pub restart_lsn: Lsn,
    pub confirmed_flush_lsn: Lsn,
    /// Consumer currently holding the slot.
    pub holder: Option<Uuid>,
}

impl ReplicationSlot {
    /// New, locally authoritative slot, inactive since `now`.
    pub fn new(name: impl Into<String>, kind: SlotKind, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind,
            temporary: false,
            synced: false,
            failover: false,
            state: SlotState::inactive(now),
            restart_lsn: Lsn::INVALID,
            confirmed_flush_lsn: Lsn::INVALID,
            holder: None,
        }
    }

    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    pub fn with_positions(mut self, restart_lsn: Lsn, confirmed_flush_lsn: Lsn) -> Self {
        self.restart_lsn = restart_lsn;
        self.confirmed_flush_lsn = confirmed_flush_lsn;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.is_invalidated()
    }

    pub fn inactive_since(&self) -> Option<DateTime<Utc>> {
        self.state.inactive_since()
    }

    pub fn invalidation_reason(&self) -> Option<InvalidationReason> {
        self.state.invalidation_reason()
    }

    /// Catalog view of this slot.
    pub fn to_row(&self) -> SlotRow {
        SlotRow {
            name: self.name.clone(),
            kind: self.kind,
            temporary: self.temporary,
            synced: self.synced,
            failover: self.failover,
            active: self.is_active(),
            inactive_since: self.inactive_since(),
            invalidation_reason: self.invalidation_reason(),
            restart_lsn: self.restart_lsn,
            confirmed_flush_lsn: self.confirmed_flush_lsn,
        }
    }

    /// Rebuild a slot from a catalog row.
    ///
    /// The holder is never carried across: a row describes state, not a
    /// live connection on this node.
    pub fn from_row(row: &SlotRow) -> Self {
        Self {
            name: row.name.clone(),
            kind: row.kind,
            temporary: row.temporary,
            synced: row.synced,
            failover: row.failover,
            state: row.state(),
            restart_lsn: row.restart_lsn,
            confirmed_flush_lsn: row.confirmed_flush_lsn,
            holder: None,
        }
    }
}

/// One row of the catalog read surface.
///
/// Also the unit returned by the sync transport and written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRow {
    pub name: String,
    pub kind: SlotKind,
    pub temporary: bool,
    pub synced: bool,
    #[serde(default)]
    pub failover: bool,
    pub active: bool,
    pub inactive_since: Option<DateTime<Utc>>,
    pub invalidation_reason: Option<InvalidationReason>,
    pub restart_lsn: Lsn,
    pub confirmed_flush_lsn: Lsn,
}

impl SlotRow {
    /// Lifecycle state described by this row.
    pub fn state(&self) -> SlotState {
        match self.invalidation_reason {
            Some(reason) => SlotState::Invalidated {
                reason,
                inactive_since: self.inactive_since,
            },
            None => SlotState::Valid {
                active: self.active,
                inactive_since: self.inactive_since,
            },
        }
    }
}
