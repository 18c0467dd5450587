//! Slot error types
//!
//! - `SlotInvalidated` is permanent and never retried
//! - `SyncTransport` is the only retryable error; the sync agent skips the
//!   poll and tries again on the next tick
//! - Lost races inside the catalog are resolved by re-validation under the
//!   entry lock and never surface here

use thiserror::Error;

use super::types::InvalidationReason;

/// Result type for slot operations
pub type SlotResult<T> = Result<T, SlotError>;

/// Slot errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("replication slot \"{0}\" does not exist")]
    SlotNotFound(String),

    #[error("can no longer get changes from replication slot \"{name}\": slot has been invalidated ({reason})")]
    SlotInvalidated {
        name: String,
        reason: InvalidationReason,
    },

    #[error("replication slot \"{0}\" is active for another consumer")]
    SlotActive(String),

    #[error("cannot use replication slot \"{0}\": it is being synchronized from the primary server")]
    SlotSynced(String),

    #[error("replication slot \"{0}\" already exists")]
    SlotAlreadyExists(String),

    #[error("slot sync transport failed: {0}")]
    SyncTransport(String),

    #[error("slot state persistence failed: {0}")]
    Persistence(String),

    #[error("slot configuration error: {0}")]
    Configuration(String),
}

impl SlotError {
    pub fn not_found(name: impl Into<String>) -> Self {
        SlotError::SlotNotFound(name.into())
    }

    pub fn invalidated(name: impl Into<String>, reason: InvalidationReason) -> Self {
        SlotError::SlotInvalidated {
            name: name.into(),
            reason,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        SlotError::SyncTransport(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        SlotError::Persistence(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        SlotError::Configuration(message.into())
    }

    /// Error code in AERO_CATEGORY_NAME format
    pub fn code(&self) -> &'static str {
        match self {
            SlotError::SlotNotFound(_) => "AERO_SLOT_NOT_FOUND",
            SlotError::SlotInvalidated { .. } => "AERO_SLOT_INVALIDATED",
            SlotError::SlotActive(_) => "AERO_SLOT_ACTIVE",
            SlotError::SlotSynced(_) => "AERO_SLOT_SYNCED",
            SlotError::SlotAlreadyExists(_) => "AERO_SLOT_ALREADY_EXISTS",
            SlotError::SyncTransport(_) => "AERO_SLOT_SYNC_TRANSPORT",
            SlotError::Persistence(_) => "AERO_SLOT_PERSISTENCE",
            SlotError::Configuration(_) => "AERO_SLOT_CONFIG",
        }
    }

    /// Only transport failures are worth retrying, and only on the next poll.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SlotError::SyncTransport(_))
    }

    /// Slot named by this error, if any.
    pub fn slot_name(&self) -> Option<&str> {
        match self {
            SlotError::SlotNotFound(name)
            | SlotError::SlotActive(name)
            | SlotError::SlotSynced(name)
            | SlotError::SlotAlreadyExists(name) => Some(name),
            SlotError::SlotInvalidated { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidated_message_names_slot() {
        let err = SlotError::invalidated("lsub4_slot", InvalidationReason::InactiveTimeout);
        let msg = err.to_string();

        assert!(msg.contains("can no longer get changes from replication slot \"lsub4_slot\""));
        assert!(msg.contains("inactive_timeout"));
        assert_eq!(err.code(), "AERO_SLOT_INVALIDATED");
        assert_eq!(err.slot_name(), Some("lsub4_slot"));
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(SlotError::transport("connection refused").is_retryable());
        assert!(!SlotError::not_found("x").is_retryable());
        assert!(!SlotError::invalidated("x", InvalidationReason::WalRemoved).is_retryable());
        assert!(!SlotError::persistence("disk full").is_retryable());
    }
}
