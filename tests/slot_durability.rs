//! Slot Durability Tests
//!
//! Slot state across node restarts:
//! - Invalidation survives a restart unchanged
//! - Inactivity recorded before a restart keeps counting after it
//! - A slot held at shutdown comes back inactive as of the restart
//! - Temporary mirrors are lost on restart and recreated by the next poll
//! - Persisted mirrors keep the primary's copied state

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use aeroslot::slot::{
    state_path, Clock, FileSlotSource, FlushPosition, InvalidationReason, Lsn, ManualClock,
    NodeRole, SlotConfig, SlotError, SlotKind, SlotManager,
};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ))
}

fn open(dir: &TempDir, role: NodeRole, timeout: Duration, clock: &Arc<ManualClock>) -> SlotManager {
    SlotManager::open(
        dir.path(),
        SlotConfig::with_inactive_timeout(timeout),
        role,
        clock.clone(),
    )
    .unwrap()
}

// =============================================================================
// Local Slots
// =============================================================================

/// An invalidated slot is still invalidated, with the same reason, after a
/// restart; acquisition still fails.
#[test]
fn test_invalidation_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let node = open(&dir, NodeRole::Primary, Duration::from_secs(1), &clock);
    node.create_slot("s1", SlotKind::Logical, false).unwrap();
    clock.advance(Duration::from_secs(2));
    node.run_invalidation_pass().unwrap();
    drop(node);

    let node = open(&dir, NodeRole::Primary, Duration::ZERO, &clock);
    assert_eq!(
        node.rows()[0].invalidation_reason,
        Some(InvalidationReason::InactiveTimeout)
    );
    assert!(matches!(
        node.try_acquire("s1").unwrap_err(),
        SlotError::SlotInvalidated { .. }
    ));
}

/// Inactivity recorded before a restart still counts after it: a slot idle
/// past its timeout is invalidated by the first pass on the reopened node.
#[test]
fn test_inactivity_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let node = open(&dir, NodeRole::Primary, Duration::from_secs(60), &clock);
    node.create_slot("s1", SlotKind::Logical, false).unwrap();
    let since = node.rows()[0].inactive_since;
    drop(node);

    clock.advance(Duration::from_secs(3600));
    let node = open(&dir, NodeRole::Primary, Duration::from_secs(60), &clock);
    assert_eq!(node.rows()[0].inactive_since, since);
    assert_eq!(node.run_invalidation_pass().unwrap().invalidated_names(), vec!["s1"]);
}

/// A slot not yet past its timeout keeps counting from its original
/// inactive_since after a restart.
#[test]
fn test_partial_inactivity_carries_over_restart() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let node = open(&dir, NodeRole::Primary, Duration::from_secs(60), &clock);
    node.create_slot("s1", SlotKind::Logical, false).unwrap();
    drop(node);

    clock.advance(Duration::from_secs(40));
    let node = open(&dir, NodeRole::Primary, Duration::from_secs(60), &clock);
    assert!(node.run_invalidation_pass().unwrap().invalidated.is_empty());

    clock.advance(Duration::from_secs(20));
    assert_eq!(node.run_invalidation_pass().unwrap().invalidated.len(), 1);
}

/// A slot held when the node stopped comes back inactive as of the load.
#[test]
fn test_held_slot_comes_back_inactive() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let node = open(&dir, NodeRole::Primary, Duration::ZERO, &clock);
    node.create_slot("s1", SlotKind::Logical, false).unwrap();
    let handle = node.try_acquire("s1").unwrap();
    node.persist().unwrap();
    std::mem::forget(handle);
    drop(node);

    clock.advance(Duration::from_secs(300));
    let node = open(&dir, NodeRole::Primary, Duration::ZERO, &clock);
    let rows = node.rows();
    assert!(!rows[0].active);
    assert_eq!(rows[0].inactive_since, Some(clock.now()));
    assert!(node.try_acquire("s1").is_ok());
}

/// A corrupted state file refuses to open rather than losing slots.
#[test]
fn test_corrupt_state_file_refused() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let node = open(&dir, NodeRole::Primary, Duration::ZERO, &clock);
    node.create_slot("s1", SlotKind::Logical, false).unwrap();
    drop(node);

    let path = state_path(dir.path());
    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.replace("logical", "physical")).unwrap();

    let err = SlotManager::open(
        dir.path(),
        SlotConfig::disabled(),
        NodeRole::Primary,
        clock.clone(),
    )
    .unwrap_err();
    assert_eq!(err.code(), "AERO_SLOT_PERSISTENCE");
}

// =============================================================================
// Mirrors
// =============================================================================

/// A mirror stays temporary until the standby catches up; a temporary
/// mirror is gone after restart and the next poll recreates it.
#[test]
fn test_mirror_persisted_after_catch_up() {
    let primary_dir = TempDir::new().unwrap();
    let standby_dir = TempDir::new().unwrap();
    let clock = clock();

    let primary = open(&primary_dir, NodeRole::Primary, Duration::ZERO, &clock);
    primary.create_slot("s1", SlotKind::Logical, true).unwrap();
    primary
        .catalog()
        .with_slot("s1", |s| {
            s.restart_lsn = Lsn::new(0x3000028);
            s.confirmed_flush_lsn = Lsn::new(0x3000060);
        })
        .unwrap();
    primary.persist().unwrap();

    let progress = Arc::new(FlushPosition::new(Lsn::new(0x3000000)));
    let standby = open(&standby_dir, NodeRole::Standby, Duration::ZERO, &clock);
    let agent = standby
        .sync_agent(
            Arc::new(FileSlotSource::new(primary_dir.path())),
            progress.clone(),
        )
        .unwrap();

    let report = agent.sync_once();
    assert_eq!(report.created, vec!["s1".to_string()]);
    assert!(report.persisted.is_empty());
    assert!(standby.rows()[0].temporary);
    drop(agent);
    drop(standby);

    let standby = open(&standby_dir, NodeRole::Standby, Duration::ZERO, &clock);
    assert!(standby.rows().is_empty());

    progress.advance_to(Lsn::new(0x3000060));
    let agent = standby
        .sync_agent(
            Arc::new(FileSlotSource::new(primary_dir.path())),
            progress.clone(),
        )
        .unwrap();
    let report = agent.sync_once();
    assert_eq!(report.persisted, vec!["s1".to_string()]);
    drop(agent);
    drop(standby);

    let standby = open(&standby_dir, NodeRole::Standby, Duration::ZERO, &clock);
    let rows = standby.rows();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].synced);
    assert!(!rows[0].temporary);
    assert_eq!(rows[0].confirmed_flush_lsn, Lsn::new(0x3000060));
}

/// A persisted mirror keeps the primary's inactive_since across a standby
/// restart, and the standby's timeout still does not apply to it.
#[test]
fn test_persisted_mirror_keeps_copied_state() {
    let primary_dir = TempDir::new().unwrap();
    let standby_dir = TempDir::new().unwrap();
    let clock = clock();

    let primary = open(&primary_dir, NodeRole::Primary, Duration::ZERO, &clock);
    primary.create_slot("s1", SlotKind::Logical, true).unwrap();
    let primary_since = primary.rows()[0].inactive_since;

    let standby = open(&standby_dir, NodeRole::Standby, Duration::from_secs(1), &clock);
    standby
        .sync_agent(
            Arc::new(FileSlotSource::new(primary_dir.path())),
            Arc::new(FlushPosition::new(Lsn::new(u64::MAX))),
        )
        .unwrap()
        .sync_once();
    drop(standby);

    clock.advance(Duration::from_secs(30));
    let standby = open(&standby_dir, NodeRole::Standby, Duration::from_secs(1), &clock);
    assert_eq!(standby.rows()[0].inactive_since, primary_since);
    assert!(standby.run_invalidation_pass().unwrap().invalidated.is_empty());
    assert_eq!(standby.rows()[0].invalidation_reason, None);
}

/// An unreadable primary state file skips the poll instead of failing.
#[test]
fn test_unreadable_primary_state_skips_poll() {
    let primary_dir = TempDir::new().unwrap();
    let standby_dir = TempDir::new().unwrap();
    let clock = clock();

    let path = state_path(primary_dir.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{ truncated").unwrap();

    let standby = open(&standby_dir, NodeRole::Standby, Duration::ZERO, &clock);
    let report = standby
        .sync_agent(
            Arc::new(FileSlotSource::new(primary_dir.path())),
            Arc::new(FlushPosition::default()),
        )
        .unwrap()
        .sync_once();

    assert!(report.skipped);
    assert!(standby.rows().is_empty());
}
