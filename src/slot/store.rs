//! Durable slot state
//!
//! Location: `<data_dir>/slots/state.json`
//!
//! Write protocol (same as the checkpoint marker):
//! 1. Serialize rows, compute crc32 over the serialized rows
//! 2. Write `state.json.tmp`, fsync
//! 3. Rename over `state.json`
//! 4. fsync the directory
//!
//! A crash at any step leaves either the old or the new file in place.
//!
//! Temporary slots are never written. On load, locally authoritative slots
//! keep their persisted `inactive_since`; one that was held when written
//! comes back inactive as of the load time. Mirrors keep the values copied
//! from the primary. Invalidation reasons are restored unchanged.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::SlotCatalog;
use super::errors::{SlotError, SlotResult};
use super::types::{ReplicationSlot, SlotRow, SlotState};

/// Current on-disk format.
pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    format_version: u8,
    checksum: u32,
    slots: Vec<SlotRow>,
}

/// Path of the slot state file under a data directory.
pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join("slots").join("state.json")
}

/// File-backed slot store for one node.
///
/// Clones share one write lock, so the evaluator and the sync agent never
/// interleave writes to the same temp file.
#[derive(Debug, Clone)]
pub struct SlotStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl SlotStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: state_path(data_dir),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Durably write every non-temporary slot.
    ///
    /// Returns the number of slots written.
    pub fn persist(&self, slots: &[ReplicationSlot]) -> SlotResult<usize> {
        let _write = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.write_slots(slots)
    }

    /// Durably write the current contents of a catalog.
    ///
    /// The snapshot is taken under the write lock, so a later snapshot is
    /// never overwritten by an earlier one.
    pub fn persist_catalog(&self, catalog: &SlotCatalog) -> SlotResult<usize> {
        let _write = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.write_slots(&catalog.slots())
    }

    fn write_slots(&self, slots: &[ReplicationSlot]) -> SlotResult<usize> {
        let rows: Vec<SlotRow> = slots
            .iter()
            .filter(|slot| !slot.temporary)
            .map(ReplicationSlot::to_row)
            .collect();

        let checksum = checksum_rows(&rows)?;
        let file = StateFile {
            format_version: FORMAT_VERSION,
            checksum,
            slots: rows,
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| SlotError::persistence(format!("failed to serialize slot state: {}", e)))?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| SlotError::persistence("slot state path has no parent"))?;
        fs::create_dir_all(dir).map_err(|e| {
            SlotError::persistence(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut f = File::create(&tmp).map_err(|e| {
                SlotError::persistence(format!("failed to create {}: {}", tmp.display(), e))
            })?;
            f.write_all(&json).map_err(|e| {
                SlotError::persistence(format!("failed to write {}: {}", tmp.display(), e))
            })?;
            f.sync_all().map_err(|e| {
                SlotError::persistence(format!("failed to fsync {}: {}", tmp.display(), e))
            })?;
        }

        fs::rename(&tmp, &self.path).map_err(|e| {
            SlotError::persistence(format!(
                "failed to move {} into place: {}",
                tmp.display(),
                e
            ))
        })?;

        let dir_handle = OpenOptions::new().read(true).open(dir).map_err(|e| {
            SlotError::persistence(format!("failed to open {} for fsync: {}", dir.display(), e))
        })?;
        dir_handle.sync_all().map_err(|e| {
            SlotError::persistence(format!("failed to fsync {}: {}", dir.display(), e))
        })?;

        Ok(file.slots.len())
    }

    /// Read the raw rows. A missing file is an empty node.
    pub fn load_rows(&self) -> SlotResult<Vec<SlotRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read(&self.path).map_err(|e| {
            SlotError::persistence(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let file: StateFile = serde_json::from_slice(&contents).map_err(|e| {
            SlotError::persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        if file.format_version != FORMAT_VERSION {
            return Err(SlotError::persistence(format!(
                "unsupported slot state format version {}",
                file.format_version
            )));
        }
        let expected = checksum_rows(&file.slots)?;
        if expected != file.checksum {
            return Err(SlotError::persistence(format!(
                "slot state checksum mismatch: stored {:08x}, computed {:08x}",
                file.checksum, expected
            )));
        }

        Ok(file.slots)
    }

    /// Restore slots for a starting node.
    pub fn load(&self, now: DateTime<Utc>) -> SlotResult<Vec<ReplicationSlot>> {
        Ok(self
            .load_rows()?
            .iter()
            .map(|row| restore_slot(row, now))
            .collect())
    }
}

/// Rebuild a slot at node start.
///
/// Nobody holds a local slot across a restart: its holder died with the
/// process, so it turns inactive at `now`. Inactive slots keep counting
/// from their persisted `inactive_since`.
fn restore_slot(row: &SlotRow, now: DateTime<Utc>) -> ReplicationSlot {
    let mut slot = ReplicationSlot::from_row(row);
    if !slot.synced {
        if let SlotState::Valid {
            active,
            inactive_since,
        } = slot.state
        {
            if active || inactive_since.is_none() {
                slot.state = SlotState::inactive(now);
            }
        }
    }
    slot
}

fn checksum_rows(rows: &[SlotRow]) -> SlotResult<u32> {
    let bytes = serde_json::to_vec(rows)
        .map_err(|e| SlotError::persistence(format!("failed to serialize slot rows: {}", e)))?;
    Ok(crc32fast::hash(&bytes))
}
