//! Slot Sync Agent (standby side)
//!
//! Mirrors every failover-enabled primary slot into the standby's catalog.
//! The mirror is a pure cache of primary state:
//! - Liveness, invalidation reason and positions are copied verbatim
//! - The standby's own timeout never applies to a mirror
//! - An invalidated primary slot is invalidated here on the next poll
//!
//! New mirrors start temporary and are persisted once the standby has
//! flushed WAL up to the primary slot's `confirmed_flush_lsn`. Mirrors of
//! already invalidated slots are persisted at once.
//!
//! Transport failures skip the poll; the next tick retries. They are never
//! fatal to the standby.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::catalog::{lock_entry, SlotCatalog};
use super::errors::{SlotError, SlotResult};
use super::store::SlotStore;
use super::types::{Lsn, ReplicationSlot, SlotRow};
use crate::observability::{log_event, Event, Logger, MetricsRegistry};

/// Read-only view of the primary's slots.
pub trait PrimarySlotSource: Send + Sync {
    /// Current rows of every failover-enabled slot on the primary.
    ///
    /// Implementations must give up after `timeout` and return
    /// `SlotError::SyncTransport`.
    fn fetch_failover_slots(&self, timeout: Duration) -> SlotResult<Vec<SlotRow>>;
}

/// The primary's own catalog can serve as a source directly.
impl PrimarySlotSource for SlotCatalog {
    fn fetch_failover_slots(&self, _timeout: Duration) -> SlotResult<Vec<SlotRow>> {
        Ok(self.rows().into_iter().filter(|r| r.failover).collect())
    }
}

/// Reads the primary's persisted slot state from its data directory.
#[derive(Debug, Clone)]
pub struct FileSlotSource {
    store: SlotStore,
}

impl FileSlotSource {
    pub fn new(primary_data_dir: impl Into<PathBuf>) -> Self {
        let dir: PathBuf = primary_data_dir.into();
        Self {
            store: SlotStore::new(&dir),
        }
    }
}

impl PrimarySlotSource for FileSlotSource {
    fn fetch_failover_slots(&self, _timeout: Duration) -> SlotResult<Vec<SlotRow>> {
        // A local read; a failed read is reported as transport trouble so
        // the poll is skipped rather than aborted.
        let rows = self
            .store
            .load_rows()
            .map_err(|e| SlotError::transport(e.to_string()))?;
        Ok(rows.into_iter().filter(|r| r.failover).collect())
    }
}

/// How far the standby has flushed WAL received from the primary.
pub trait StandbyProgress: Send + Sync {
    fn flushed_lsn(&self) -> Lsn;
}

/// Flush position updated by the WAL receiver.
#[derive(Debug, Default)]
pub struct FlushPosition(AtomicU64);

impl FlushPosition {
    pub fn new(lsn: Lsn) -> Self {
        Self(AtomicU64::new(lsn.value()))
    }

    /// Move forward; never moves back.
    pub fn advance_to(&self, lsn: Lsn) {
        self.0.fetch_max(lsn.value(), Ordering::AcqRel);
    }
}

impl StandbyProgress for FlushPosition {
    fn flushed_lsn(&self) -> Lsn {
        Lsn::new(self.0.load(Ordering::Acquire))
    }
}

/// Outcome of one sync poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// The poll did not reach the primary and changed nothing.
    pub skipped: bool,
    pub error: Option<String>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    /// Mirrors promoted from temporary to durable.
    pub persisted: Vec<String>,
    /// Mirrors that took over the primary's invalidation.
    pub invalidated: Vec<String>,
    pub dropped: Vec<String>,
    /// Slots that exist locally but cannot be mirrored.
    pub conflicts: Vec<String>,
    /// Durable write after the poll failed; retried next poll.
    pub persist_error: Option<String>,
}

impl SyncReport {
    fn skipped(error: impl Into<String>) -> Self {
        Self {
            skipped: true,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn changed(&self) -> bool {
        !(self.created.is_empty()
            && self.updated.is_empty()
            && self.persisted.is_empty()
            && self.invalidated.is_empty()
            && self.dropped.is_empty())
    }
}

/// What happened to one existing mirror during reconciliation.
#[derive(Default)]
struct MirrorChange {
    updated: bool,
    invalidated: bool,
    persisted: bool,
    conflict: Option<&'static str>,
}

/// Standby-side sync agent.
pub struct SlotSyncAgent {
    catalog: Arc<SlotCatalog>,
    source: Arc<dyn PrimarySlotSource>,
    progress: Arc<dyn StandbyProgress>,
    store: Option<SlotStore>,
    metrics: Arc<MetricsRegistry>,
    sync_timeout: Duration,
    poll_lock: Mutex<()>,
    dirty: Mutex<bool>,
}

impl SlotSyncAgent {
    pub fn new(
        catalog: Arc<SlotCatalog>,
        source: Arc<dyn PrimarySlotSource>,
        progress: Arc<dyn StandbyProgress>,
        metrics: Arc<MetricsRegistry>,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            source,
            progress,
            store: None,
            metrics,
            sync_timeout,
            poll_lock: Mutex::new(()),
            dirty: Mutex::new(false),
        }
    }

    /// Persist the standby catalog after every poll that changed it.
    pub fn with_store(mut self, store: SlotStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one poll.
    ///
    /// Overlapping calls do not queue: a poll that finds another one still
    /// running is skipped.
    pub fn sync_once(&self) -> SyncReport {
        let Ok(_poll) = self.poll_lock.try_lock() else {
            return SyncReport::skipped("previous sync poll still running");
        };
        self.metrics.increment_sync_polls();
        log_event(Event::SyncBegin, &[]);

        let remote = match self.source.fetch_failover_slots(self.sync_timeout) {
            Ok(rows) => rows,
            Err(err) => {
                self.metrics.increment_sync_polls_skipped();
                let message = err.to_string();
                log_event(
                    Event::SyncSkipped,
                    &[("code", err.code()), ("error", message.as_str())],
                );
                return SyncReport::skipped(message);
            }
        };

        let mut report = SyncReport::default();
        let flushed = self.progress.flushed_lsn();

        let wanted: Vec<&SlotRow> = remote
            .iter()
            .filter(|row| row.failover && !row.temporary)
            .collect();
        let wanted_names: HashSet<&str> = wanted.iter().map(|row| row.name.as_str()).collect();

        for row in &wanted {
            match self.catalog.entry(&row.name) {
                None => self.create_mirror(row, flushed, &mut report),
                Some(entry) => {
                    let change = {
                        let mut slot = lock_entry(&entry);
                        reconcile(&mut slot, row, flushed)
                    };
                    self.record_change(&row.name, change, &mut report);
                }
            }
        }

        for name in self.catalog.names() {
            if wanted_names.contains(name.as_str()) {
                continue;
            }
            if self.catalog.remove_if(&name, |slot| !slot.synced).is_some() {
                log_event(Event::MirrorDropped, &[("slot", name.as_str())]);
                report.dropped.push(name);
            }
        }

        self.metrics.add_mirrors_created(report.created.len() as u64);
        self.metrics.add_mirrors_dropped(report.dropped.len() as u64);

        self.persist_if_needed(&mut report);

        let created = report.created.len().to_string();
        let invalidated = report.invalidated.len().to_string();
        let dropped = report.dropped.len().to_string();
        log_event(
            Event::SyncComplete,
            &[
                ("created", created.as_str()),
                ("dropped", dropped.as_str()),
                ("invalidated", invalidated.as_str()),
            ],
        );
        report
    }

    fn create_mirror(&self, row: &SlotRow, flushed: Lsn, report: &mut SyncReport) {
        let mut mirror = ReplicationSlot::from_row(row);
        mirror.synced = true;
        mirror.failover = true;
        mirror.temporary = !(mirror.is_invalidated() || flushed >= row.confirmed_flush_lsn);

        let temporary = mirror.temporary;
        let invalidated = mirror.is_invalidated();

        if let Err(err) = self.catalog.register(mirror) {
            // Created concurrently by someone else; next poll reconciles it.
            let message = err.to_string();
            log_event(
                Event::SyncConflict,
                &[("slot", row.name.as_str()), ("detail", message.as_str())],
            );
            report.conflicts.push(row.name.clone());
            return;
        }

        log_event(
            Event::MirrorCreated,
            &[
                ("slot", row.name.as_str()),
                ("temporary", if temporary { "true" } else { "false" }),
            ],
        );
        report.created.push(row.name.clone());
        if !temporary {
            log_event(Event::MirrorPersisted, &[("slot", row.name.as_str())]);
            report.persisted.push(row.name.clone());
        }
        if invalidated {
            log_mirror_invalidated(row);
            report.invalidated.push(row.name.clone());
        }
    }

    fn record_change(&self, name: &str, change: MirrorChange, report: &mut SyncReport) {
        if let Some(detail) = change.conflict {
            log_event(Event::SyncConflict, &[("slot", name), ("detail", detail)]);
            report.conflicts.push(name.to_string());
            return;
        }
        if change.updated {
            report.updated.push(name.to_string());
        }
        if change.persisted {
            log_event(Event::MirrorPersisted, &[("slot", name)]);
            report.persisted.push(name.to_string());
        }
        if change.invalidated {
            if let Some(row) = self.catalog.row(name) {
                log_mirror_invalidated(&row);
            }
            report.invalidated.push(name.to_string());
        }
    }

    fn persist_if_needed(&self, report: &mut SyncReport) {
        let Some(store) = &self.store else {
            return;
        };
        let mut dirty = self.dirty.lock().unwrap_or_else(|p| p.into_inner());
        if !report.changed() && !*dirty {
            return;
        }
        match store.persist_catalog(&self.catalog) {
            Ok(written) => {
                *dirty = false;
                let written = written.to_string();
                log_event(Event::SlotStatePersisted, &[("slots", written.as_str())]);
            }
            Err(err) => {
                *dirty = true;
                let message = err.to_string();
                Logger::error(
                    Event::SlotStatePersisted.as_str(),
                    &[("code", err.code()), ("error", message.as_str())],
                );
                report.persist_error = Some(message);
            }
        }
    }
}

impl std::fmt::Debug for SlotSyncAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotSyncAgent")
            .field("slots", &self.catalog.len())
            .field("durable", &self.store.is_some())
            .field("sync_timeout", &self.sync_timeout)
            .finish()
    }
}

/// Apply one upstream row to an existing local entry.
///
/// Runs inside the entry's exclusive section.
fn reconcile(slot: &mut ReplicationSlot, row: &SlotRow, flushed: Lsn) -> MirrorChange {
    let mut change = MirrorChange::default();

    if !slot.synced {
        change.conflict = Some("a locally created slot has the same name");
        return change;
    }

    if slot.is_invalidated() {
        if row.invalidation_reason.is_none() {
            change.conflict = Some("local mirror is invalidated but the primary slot is valid");
        }
        // Terminal: nothing else to copy.
        return change;
    }

    let before = slot.clone();

    slot.state = row.state();
    slot.kind = row.kind;
    slot.failover = true;
    slot.restart_lsn = row.restart_lsn;
    slot.confirmed_flush_lsn = row.confirmed_flush_lsn;
    slot.holder = None;

    if slot.temporary && (slot.is_invalidated() || flushed >= row.confirmed_flush_lsn) {
        slot.temporary = false;
        change.persisted = true;
    }

    change.invalidated = slot.is_invalidated();
    change.updated = *slot != before;
    change
}

fn log_mirror_invalidated(row: &SlotRow) {
    let reason = row
        .invalidation_reason
        .map(|r| r.as_str())
        .unwrap_or_default();
    log_event(
        Event::SlotInvalidated,
        &[
            ("origin", "primary"),
            ("reason", reason),
            ("slot", row.name.as_str()),
        ],
    );
}

/// Background loop driving an agent on a fixed interval.
pub struct SlotSyncWorker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    reports: watch::Receiver<Option<SyncReport>>,
}

impl SlotSyncWorker {
    /// Start polling. Must be called inside a tokio runtime.
    ///
    /// Each poll runs on the blocking pool and is abandoned after twice the
    /// agent's sync timeout; an abandoned poll counts as skipped.
    pub fn spawn(agent: Arc<SlotSyncAgent>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (report_tx, report_rx) = watch::channel(None);
        let budget = agent.sync_timeout.saturating_mul(2);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let poll_agent = Arc::clone(&agent);
                        let poll = tokio::task::spawn_blocking(move || poll_agent.sync_once());
                        let report = match tokio::time::timeout(budget, poll).await {
                            Ok(Ok(report)) => report,
                            Ok(Err(join_err)) => {
                                let message = join_err.to_string();
                                Logger::error(
                                    Event::SyncSkipped.as_str(),
                                    &[("error", message.as_str())],
                                );
                                SyncReport::skipped(message)
                            }
                            Err(_) => {
                                agent.metrics.increment_sync_polls_skipped();
                                log_event(Event::SyncSkipped, &[("error", "sync poll timed out")]);
                                SyncReport::skipped("sync poll timed out")
                            }
                        };
                        let _ = report_tx.send(Some(report));
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            handle,
            shutdown: shutdown_tx,
            reports: report_rx,
        }
    }

    /// Receiver of the most recent poll report.
    pub fn reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    /// Stop after the current poll and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
