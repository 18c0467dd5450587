//! Per-node slot manager
//!
//! Wires one node's catalog, acquisition gate, invalidation evaluator and
//! durable store together. The checkpoint collaborator calls
//! `run_invalidation_pass()` once per cycle; consumers go through
//! `try_acquire()`; a standby builds its sync agent from here.
//!
//! Every node owns its own manager. Nodes never share a catalog.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use super::catalog::{lock_entry, SlotCatalog};
use super::clock::Clock;
use super::config::SlotConfig;
use super::errors::{SlotError, SlotResult};
use super::evaluator::{
    announce, InvalidationEvaluator, InvalidationNotice, InvalidationReport,
};
use super::gate::{AcquisitionGate, SlotHandle};
use super::store::SlotStore;
use super::sync::{PrimarySlotSource, SlotSyncAgent, StandbyProgress};
use super::types::{ReplicationSlot, SlotKind, SlotRow};
use crate::observability::{log_event, Event, Logger, MetricsRegistry};

/// Role of this node in the replication pair.
///
/// Configured externally, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Standby,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Primary => "primary",
            NodeRole::Standby => "standby",
        }
    }
}

/// Slot lifecycle manager for one node.
pub struct SlotManager {
    config: SlotConfig,
    role: RwLock<NodeRole>,
    catalog: Arc<SlotCatalog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    gate: AcquisitionGate,
    evaluator: InvalidationEvaluator,
    store: Option<SlotStore>,
    /// A previous write failed; the next pass retries it.
    dirty: AtomicBool,
    /// Invalidations not yet durable, announced once written.
    unannounced: Mutex<Vec<InvalidationNotice>>,
}

impl SlotManager {
    /// Open a node from its data directory.
    ///
    /// A missing state file is an empty node. A corrupt one is an error:
    /// silently dropping slots would release retained WAL.
    pub fn open(
        data_dir: &Path,
        config: SlotConfig,
        role: NodeRole,
        clock: Arc<dyn Clock>,
    ) -> SlotResult<Self> {
        config.validate()?;

        let store = SlotStore::new(data_dir);
        let slots = store.load(clock.now())?;

        let count = slots.len().to_string();
        let path = store.path().display().to_string();
        log_event(
            Event::SlotStateLoaded,
            &[
                ("path", path.as_str()),
                ("role", role.as_str()),
                ("slots", count.as_str()),
            ],
        );

        Ok(Self::build(
            config,
            role,
            SlotCatalog::from_slots(slots),
            clock,
            Some(store),
        ))
    }

    /// Node without a data directory. Nothing is persisted.
    pub fn in_memory(config: SlotConfig, role: NodeRole, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, role, SlotCatalog::new(), clock, None)
    }

    fn build(
        config: SlotConfig,
        role: NodeRole,
        catalog: SlotCatalog,
        clock: Arc<dyn Clock>,
        store: Option<SlotStore>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let metrics = Arc::new(MetricsRegistry::new());
        let gate = AcquisitionGate::new(
            Arc::clone(&catalog),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        );
        let evaluator = InvalidationEvaluator::new(
            Arc::clone(&catalog),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        );
        Self {
            config,
            role: RwLock::new(role),
            catalog,
            clock,
            metrics,
            gate,
            evaluator,
            store,
            dirty: AtomicBool::new(false),
            unannounced: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    pub fn role(&self) -> NodeRole {
        *self.role.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn catalog(&self) -> &Arc<SlotCatalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn store(&self) -> Option<&SlotStore> {
        self.store.as_ref()
    }

    /// Catalog read surface, ordered by slot name.
    pub fn rows(&self) -> Vec<SlotRow> {
        self.catalog.rows()
    }

    /// Register a new local slot, inactive as of now.
    pub fn create_slot(&self, name: &str, kind: SlotKind, failover: bool) -> SlotResult<SlotRow> {
        let slot = ReplicationSlot::new(name, kind, self.clock.now()).with_failover(failover);
        let row = slot.to_row();
        self.catalog.register(slot)?;
        self.persist()?;
        Ok(row)
    }

    /// Remove a local slot. The only way out of the invalidated state.
    ///
    /// # Errors
    ///
    /// - `SlotNotFound`: no such slot
    /// - `SlotSynced`: mirrors are dropped by the sync agent, not locally
    /// - `SlotActive`: a consumer still holds it
    pub fn drop_slot(&self, name: &str) -> SlotResult<()> {
        // Check and removal happen under the entry lock.
        let removed = self
            .catalog
            .remove_if(name, |slot| slot.synced || slot.is_active());
        if removed.is_none() {
            return Err(self.drop_refusal(name));
        }
        self.persist()?;
        Ok(())
    }

    /// Why `remove_if` kept the slot, judged from what is there now.
    fn drop_refusal(&self, name: &str) -> SlotError {
        match self.catalog.entry(name) {
            None => SlotError::not_found(name),
            Some(entry) => {
                if lock_entry(&entry).synced {
                    SlotError::SlotSynced(name.to_string())
                } else {
                    SlotError::SlotActive(name.to_string())
                }
            }
        }
    }

    /// Acquire a slot for a local consumer.
    pub fn try_acquire(&self, name: &str) -> SlotResult<SlotHandle> {
        self.gate.try_acquire(name)
    }

    /// One invalidation pass with this node's configured timeout.
    ///
    /// Order per slot: set the reason, persist, then emit `SLOT_INVALIDATED`.
    /// If the write fails the in-memory decision stands, nothing is
    /// announced, and the next pass writes and announces it.
    pub fn run_invalidation_pass(&self) -> SlotResult<InvalidationReport> {
        let report = self.evaluator.run_pass(self.config.inactive_timeout);
        let mut unannounced = self.unannounced.lock().unwrap_or_else(|p| p.into_inner());
        unannounced.extend(report.invalidated.iter().cloned());
        if !unannounced.is_empty() {
            self.dirty.store(true, Ordering::Release);
        }
        if self.dirty.load(Ordering::Acquire) {
            self.persist()?;
        }
        announce(&unannounced);
        unannounced.clear();
        Ok(report)
    }

    /// Durably write every non-temporary slot. No-op without a store.
    pub fn persist(&self) -> SlotResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        match store.persist_catalog(&self.catalog) {
            Ok(written) => {
                self.dirty.store(false, Ordering::Release);
                let count = written.to_string();
                log_event(Event::SlotStatePersisted, &[("slots", count.as_str())]);
                Ok(written)
            }
            Err(err) => {
                self.dirty.store(true, Ordering::Release);
                let message = err.to_string();
                Logger::error(
                    Event::SlotStatePersisted.as_str(),
                    &[("code", err.code()), ("error", message.as_str())],
                );
                Err(err)
            }
        }
    }

    /// Build the sync agent for this standby.
    ///
    /// The agent shares this node's catalog, metrics and store.
    pub fn sync_agent(
        &self,
        source: Arc<dyn PrimarySlotSource>,
        progress: Arc<dyn StandbyProgress>,
    ) -> SlotResult<SlotSyncAgent> {
        if self.role() != NodeRole::Standby {
            return Err(SlotError::configuration(
                "slot sync runs on standby nodes only",
            ));
        }
        let agent = SlotSyncAgent::new(
            Arc::clone(&self.catalog),
            source,
            progress,
            Arc::clone(&self.metrics),
            self.config.sync_timeout,
        );
        Ok(match &self.store {
            Some(store) => agent.with_store(store.clone()),
            None => agent,
        })
    }

    /// Standby promotion: this node becomes authoritative for its mirrors.
    ///
    /// Stop the sync worker before calling this. Returns the names of the
    /// converted mirrors.
    pub fn promote(&self) -> SlotResult<Vec<String>> {
        {
            let mut role = self.role.write().unwrap_or_else(|p| p.into_inner());
            *role = NodeRole::Primary;
        }
        let converted = self.catalog.assume_authority(self.clock.now());
        let count = converted.len().to_string();
        log_event(Event::AuthorityAssumed, &[("slots", count.as_str())]);
        self.persist()?;
        Ok(converted)
    }
}

impl std::fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotManager")
            .field("config", &self.config)
            .field("role", &self.role())
            .field("slots", &self.catalog.len())
            .field("durable", &self.store.is_some())
            .finish()
    }
}
