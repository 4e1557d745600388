//! Persistent named snapshots.
//!
//! A named snapshot freezes a subset of the indices of one database and keeps
//! them on disk under
//!
//! ```text
//! <base_dir>/snapshots/<database>/<snapshot>/IX<index>V0SEQ0.idx
//! ```
//!
//! Creating one is logged as a `SnapshotConfig` entry, so a crash between
//! logging and materialization is repaired by replay.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use sstable::DiskIndex;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use wal::{Lsn, PayloadType};

use crate::database::{snapshot_dir_name, sync_dir, LsmDatabase};
use crate::error::{EngineError, Result};
use crate::manifest::validate_name;
use crate::Engine;

/// Directory below the base directory holding named snapshots.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Which indices of a database a named snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    pub name: String,
    pub indices: Vec<u32>,
}

impl SnapshotConfig {
    pub fn new(name: impl Into<String>, indices: impl Into<Vec<u32>>) -> Self {
        Self {
            name: name.into(),
            indices: indices.into(),
        }
    }

    /// `[database_id u32][name_len u32][name][count u32][index u32]*`
    pub fn encode(&self, database_id: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.name.len() + 4 * self.indices.len());
        // writes into a Vec cannot fail
        let _ = self.encode_into(database_id, &mut buf);
        buf
    }

    fn encode_into(&self, database_id: u32, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u32::<LittleEndian>(database_id)?;
        buf.write_u32::<LittleEndian>(self.name.len() as u32)?;
        buf.extend_from_slice(self.name.as_bytes());
        buf.write_u32::<LittleEndian>(self.indices.len() as u32)?;
        for &i in &self.indices {
            buf.write_u32::<LittleEndian>(i)?;
        }
        Ok(())
    }

    /// Inverse of [`encode`](Self::encode); returns the database id too.
    pub fn decode(payload: &[u8]) -> Result<(u32, Self)> {
        let corrupt = |what: &str| EngineError::CorruptEntry(format!("snapshot config: {what}"));
        let mut rdr = payload;
        let database_id = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated"))?;
        let name_len = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated"))? as usize;
        if name_len > rdr.len() {
            return Err(corrupt("name exceeds payload"));
        }
        let mut name = vec![0u8; name_len];
        rdr.read_exact(&mut name).map_err(|_| corrupt("truncated name"))?;
        let name = String::from_utf8(name).map_err(|_| corrupt("name is not utf-8"))?;

        let count = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated"))? as usize;
        if count.saturating_mul(4) != rdr.len() {
            return Err(corrupt("index count does not match payload"));
        }
        let indices = (0..count)
            .map(|_| rdr.read_u32::<LittleEndian>())
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|_| corrupt("truncated index list"))?;
        Ok((database_id, Self { name, indices }))
    }
}

/// Snapshot directories and the disk indices opened from them.
pub(crate) struct SnapshotStore {
    root: PathBuf,
    open: Mutex<HashMap<(String, String, u32), Arc<DiskIndex>>>,
}

impl SnapshotStore {
    pub(crate) fn new(base_dir: &Path) -> Self {
        Self {
            root: base_dir.join(SNAPSHOTS_DIR),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn dir_of(&self, database: &str, snapshot: &str) -> PathBuf {
        self.root.join(database).join(snapshot)
    }

    pub(crate) fn exists(&self, database: &str, snapshot: &str) -> bool {
        self.dir_of(database, snapshot).is_dir()
    }

    /// Freezes the configured indices and writes them out. The snapshot dir
    /// appears atomically.
    pub(crate) fn materialize(&self, db: &LsmDatabase, config: &SnapshotConfig, snap_ids: &[u32]) -> Result<()> {
        let target = self.dir_of(db.name(), &config.name);
        let scratch = self.root.join(db.name()).join(format!(".{}.tmp", config.name));
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        if let Err(e) = db.write_snapshot_to(&scratch, &config.indices, snap_ids) {
            let _ = fs::remove_dir_all(&scratch);
            return Err(e);
        }
        fs::rename(&scratch, &target)?;
        if let Some(parent) = target.parent() {
            sync_dir(parent);
        }
        info!(database = db.name(), snapshot = %config.name, indices = ?config.indices, "persistent snapshot written");
        Ok(())
    }

    /// Recreates a snapshot found in the log if its directory is missing.
    pub(crate) fn replay(&self, db: &LsmDatabase, config: &SnapshotConfig) -> Result<()> {
        if self.exists(db.name(), &config.name) {
            debug!(database = db.name(), snapshot = %config.name, "snapshot already on disk");
            return Ok(());
        }
        let ids = db.create_snapshot_of(&config.indices)?;
        self.materialize(db, config, &ids)
    }

    fn index(&self, db: &LsmDatabase, snapshot: &str, index: u32) -> Result<Arc<DiskIndex>> {
        let key = (db.name().to_string(), snapshot.to_string(), index);
        if let Some(found) = self.open.lock().get(&key) {
            return Ok(found.clone());
        }

        let snap_dir = self.dir_of(db.name(), snapshot);
        if !snap_dir.is_dir() {
            return Err(EngineError::InvalidArgument(format!(
                "database {} has no snapshot {snapshot:?}",
                db.name()
            )));
        }
        let dir = snap_dir.join(snapshot_dir_name(index, Lsn::NONE));
        if !dir.is_dir() {
            return Err(EngineError::NoSuchIndex {
                database: db.id(),
                index,
            });
        }
        let tree = db.index(index)?;
        let opened = Arc::new(DiskIndex::open(&dir, tree.comparator().clone(), tree.options().compressed)?);
        Ok(self.open.lock().entry(key).or_insert(opened).clone())
    }

    pub(crate) fn list(&self, database: &str) -> Result<Vec<String>> {
        let dir = self.root.join(database);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub(crate) fn remove(&self, database: &str, snapshot: &str) -> Result<bool> {
        self.open
            .lock()
            .retain(|(db, snap, _), _| !(db == database && snap == snapshot));
        let dir = self.dir_of(database, snapshot);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(dir)?;
        Ok(true)
    }

    pub(crate) fn remove_database(&self, database: &str) -> Result<()> {
        self.open.lock().retain(|(db, _, _), _| db != database);
        let dir = self.root.join(database);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Engine {
    /// Creates the named snapshot `config` of database `database`.
    ///
    /// The snapshot captures every write acknowledged before the call. It is
    /// logged first and then written to disk; both happen before this
    /// returns.
    pub fn create_persistent_snapshot(&self, database: &str, config: SnapshotConfig) -> Result<()> {
        validate_name(&config.name)?;
        if config.indices.is_empty() {
            return Err(EngineError::InvalidArgument("snapshot covers no index".into()));
        }
        let db = self.database(database)?;
        for &i in &config.indices {
            db.index(i)?;
        }

        let inner = &self.inner;
        // no checkpoint may release the frozen generations before they are written
        let _serial = inner.checkpoint_lock.lock();
        if inner.snapshots.exists(database, &config.name) {
            return Err(EngineError::InvalidArgument(format!(
                "snapshot {:?} of database {database} already exists",
                config.name
            )));
        }
        let ids = {
            let _gate = inner.gate.write();
            let ids = db.create_snapshot_of(&config.indices)?;
            inner
                .logger
                .append(PayloadType::SnapshotConfig, config.encode(db.id()))?
                .wait()?;
            ids
        };
        fs::create_dir_all(inner.snapshots.root.join(database))?;
        inner.snapshots.materialize(&db, &config, &ids)
    }

    /// Names of the persistent snapshots of `database`.
    pub fn list_persistent_snapshots(&self, database: &str) -> Result<Vec<String>> {
        self.database(database)?;
        self.inner.snapshots.list(database)
    }

    /// Deletes a persistent snapshot. Returns `false` if it did not exist.
    pub fn delete_persistent_snapshot(&self, database: &str, snapshot: &str) -> Result<bool> {
        validate_name(snapshot)?;
        self.database(database)?;
        let _serial = self.inner.checkpoint_lock.lock();
        self.inner.snapshots.remove(database, snapshot)
    }

    /// Point lookup in index `index` of a persistent snapshot.
    pub fn snapshot_lookup(&self, database: &str, snapshot: &str, index: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_name(snapshot)?;
        let db = self.database(database)?;
        let disk = self.inner.snapshots.index(&db, snapshot, index)?;
        Ok(disk.lookup(key)?)
    }

    /// Prefix scan in index `index` of a persistent snapshot.
    pub fn snapshot_prefix_lookup(
        &self,
        database: &str,
        snapshot: &str,
        index: u32,
        prefix: &[u8],
        ascending: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        validate_name(snapshot)?;
        let db = self.database(database)?;
        let disk = self.inner.snapshots.index(&db, snapshot, index)?;
        let entries = disk
            .prefix_lookup(prefix, ascending)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
