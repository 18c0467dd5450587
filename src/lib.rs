//! aeroslot - replication slot lifecycle manager
//!
//! Tracks slot liveness, invalidates slots left inactive past a timeout,
//! refuses any use of an invalidated slot, and mirrors failover slots from
//! a primary onto its standbys without letting a standby decide on its own.

pub mod cli;
pub mod observability;
pub mod slot;
