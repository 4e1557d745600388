//! # Engine - Multi-Index LSM Storage Engine
//!
//! Ties the [`memtable`], [`sstable`] and [`wal`] crates together into an
//! embedded key-value store with many databases, each holding a fixed number
//! of independently ordered indices.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────────┐
//! │                       ENGINE                         │
//! │                                                      │
//! │ write.rs → WorkerPool (db_id % n)                    │
//! │              |                                       │
//! │              v                                       │
//! │        DiskLogger append ──► wal-writer thread       │
//! │              |  (wait for fsync unless pseudo-sync)  │
//! │              v                                       │
//! │        LsmTree::apply (current overlay generation)   │
//! │                                                      │
//! │ checkpoint.rs → freeze generations, switch segment,  │
//! │                 materialize + link disk indices,     │
//! │                 delete covered log segments          │
//! │                                                      │
//! │ read.rs → overlay generations → disk index           │
//! │            (newest generation wins)                  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                                  |
//! |-----------------|----------------------------------------------------------|
//! | `lib.rs`        | `Engine` struct, accessors, shutdown, `Debug`, `Drop`    |
//! | [`recovery`]    | `Engine::open`: manifest, database load, log replay      |
//! | [`catalog`]     | create, delete and look up databases                     |
//! | [`write`]       | record group inserts through the worker pool            |
//! | [`read`]        | lookups, prefix and range scans, user-defined lookups    |
//! | [`checkpoint`]  | checkpoints and the background checkpointer              |
//! | [`snapshot`]    | persistent named snapshots                               |
//! | [`replication`] | collaborator interface for log shipping                  |
//! | [`manifest`]    | persistent database catalog (atomic file ops)            |
//!
//! ## Directory Layout
//!
//! ```text
//! <base_dir>/DATABASES                         database catalog
//! <base_dir>/databases/<name>/IX<i>V<v>SEQ<s>.idx   disk index per index
//! <base_dir>/snapshots/<name>/<snapshot>/      persistent snapshots
//! <log_dir>/<view>.<seq>.dbl                   log segments
//! ```
//!
//! ## Crash Safety
//!
//! A record group is applied only after its log entry is written (and, unless
//! pseudo-sync is configured, fsynced). Disk indices are written to scratch
//! directories and renamed into place; log segments are deleted only after
//! every database has linked a checkpoint covering them.
mod catalog;
mod checkpoint;
mod database;
mod error;
mod manifest;
mod read;
mod record;
mod recovery;
mod registry;
mod replication;
mod snapshot;
mod tree;
mod worker;
mod write;

pub use config::{Durability, EngineConfig};
pub use database::{parse_snapshot_dir_name, snapshot_dir_name, LsmDatabase, SnapshotFile};
pub use error::{EngineError, Result};
pub use manifest::{DatabaseMeta, MANIFEST_FILENAME};
pub use memtable::{Comparator, KeyRange, LexicographicComparator, SharedComparator};
pub use record::{Record, RecordGroup};
pub use registry::ComparatorRegistry;
pub use replication::ReplicationSource;
pub use snapshot::{SnapshotConfig, SNAPSHOTS_DIR};
pub use tree::{LsmTree, TreeIter};
pub use wal::{LogEntry, Lsn, PayloadType};
pub use worker::Pending;

use checkpoint::Checkpointer;
use manifest::Manifest;
use parking_lot::{Mutex, RwLock};
use snapshot::SnapshotStore;
use sstable::WriterOptions;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use wal::DiskLogger;
use worker::WorkerPool;

/// Directory below the base directory holding one directory per database.
pub const DATABASES_DIR: &str = "databases";

/// State shared between the engine handle, the workers and the
/// checkpointer.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) registry: ComparatorRegistry,
    pub(crate) options: WriterOptions,
    pub(crate) manifest: Mutex<Manifest>,
    pub(crate) databases: RwLock<BTreeMap<u32, Arc<LsmDatabase>>>,
    pub(crate) logger: Arc<DiskLogger>,
    /// Workers read-lock it from log append until the group is applied.
    /// Write-locked to take a consistent cut of all overlays.
    pub(crate) gate: Arc<RwLock<()>>,
    /// Serializes checkpoints with catalog changes and persistent snapshots.
    pub(crate) checkpoint_lock: Mutex<()>,
    pub(crate) checkpoint_lsn: Mutex<Lsn>,
    pub(crate) snapshots: SnapshotStore,
}

impl EngineInner {
    /// All databases, ordered by id.
    pub(crate) fn database_list(&self) -> Vec<Arc<LsmDatabase>> {
        self.databases.read().values().cloned().collect()
    }
}

/// The storage engine.
///
/// `Engine` is `Send + Sync`; share it between threads behind an `Arc`.
/// Writes go through the worker pool, point lookups and scans may run on the
/// calling thread or on the owning worker.
///
/// # Recovery
///
/// [`Engine::open`] loads every database from its newest disk indices and
/// replays the log entries written after them.
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
    pub(crate) workers: WorkerPool,
    checkpointer: Mutex<Option<Checkpointer>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .inner
            .database_list()
            .iter()
            .map(|db| db.name().to_string())
            .collect();
        f.debug_struct("Engine")
            .field("base_dir", &self.inner.config.base_dir)
            .field("log_dir", &self.inner.config.log_dir)
            .field("durability", &self.inner.config.durability)
            .field("num_workers", &self.workers.num_workers())
            .field("databases", &names)
            .field("checkpoint_lsn", &*self.inner.checkpoint_lsn.lock())
            .field("durable_lsn", &self.inner.logger.durable_lsn())
            .finish()
    }
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ComparatorRegistry {
        &self.inner.registry
    }

    /// Highest LSN known to be fsynced.
    pub fn durable_lsn(&self) -> Lsn {
        self.inner.logger.durable_lsn()
    }

    /// Forces an fsync of the log; returns the durable LSN afterwards.
    pub fn sync_log(&self) -> Result<Lsn> {
        Ok(self.inner.logger.sync()?)
    }

    /// Stops the checkpointer, the workers and the log writer, in that order.
    ///
    /// Requests still queued fail with [`EngineError::ShuttingDown`]. The log
    /// is synced before the writer exits, so pseudo-sync writes acknowledged
    /// so far become durable. Calling it again is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(mut checkpointer) = self.checkpointer.lock().take() {
            checkpointer.shutdown();
        }
        self.workers.shutdown();
        self.inner.logger.shutdown()?;
        info!(base_dir = %self.inner.config.base_dir.display(), "engine stopped");
        Ok(())
    }
}

/// Best-effort shutdown on drop. Outside pseudo-sync mode every acknowledged
/// write is already durable in the log.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "engine shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests;
