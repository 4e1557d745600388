//! A database: a fixed set of indices that share one on-disk LSN.
//!
//! ## On-disk layout
//!
//! ```text
//! <dir>/IX0V1SEQ57.idx/blockindex.idx
//! <dir>/IX0V1SEQ57.idx/blockfile_0.idx
//! <dir>/IX1V1SEQ57.idx/...
//! ```
//!
//! Each `IX<index>V<view>SEQ<seq>.idx` directory holds the disk index of one
//! index as of LSN `view:seq`. On load the newest directory per index is
//! used; after a link every older one is deleted.

use memtable::SharedComparator;
use parking_lot::Mutex;
use sstable::{DiskIndexWriter, WriterOptions};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wal::Lsn;

use crate::error::{EngineError, Result};
use crate::record::RecordGroup;
use crate::tree::LsmTree;

/// Scratch directory prefix for snapshots being written.
const SNAPSHOT_TMP_PREFIX: &str = ".currentSnapshot";

/// `IX<index>V<view>SEQ<seq>.idx`
pub fn snapshot_dir_name(index: u32, lsn: Lsn) -> String {
    format!("IX{}V{}SEQ{}.idx", index, lsn.view, lsn.seq)
}

/// Inverse of [`snapshot_dir_name`]. Only plain decimal digits are accepted.
pub fn parse_snapshot_dir_name(name: &str) -> Option<(u32, Lsn)> {
    let rest = name.strip_prefix("IX")?.strip_suffix(".idx")?;
    let (index, rest) = rest.split_once('V')?;
    let (view, seq) = rest.split_once("SEQ")?;
    Some((digits(index)?, Lsn::new(digits(view)?, digits(seq)?)))
}

fn digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// One file of a snapshot, as offered to a replica for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub length: u64,
    /// Transfer unit the replica should request the file in.
    pub chunk_size: u64,
}

/// The indices of one database.
pub struct LsmDatabase {
    id: u32,
    name: String,
    dir: PathBuf,
    trees: Vec<LsmTree>,
    /// Every write with an LSN up to this one is in the linked disk indices.
    ondisk_lsn: Mutex<Lsn>,
}

impl LsmDatabase {
    /// Creates a database with empty indices.
    ///
    /// If the engine has checkpointed before (`ondisk != Lsn::NONE`), empty
    /// disk indices are written at that LSN so every database of the engine
    /// agrees on its on-disk LSN.
    pub fn create(
        id: u32,
        name: &str,
        dir: &Path,
        comparators: &[SharedComparator],
        options: WriterOptions,
        ondisk: Lsn,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let trees = comparators
            .iter()
            .map(|c| LsmTree::open(None, c.clone(), options))
            .collect::<Result<Vec<_>>>()?;
        let db = Self {
            id,
            name: name.to_string(),
            dir: dir.to_path_buf(),
            trees,
            ondisk_lsn: Mutex::new(Lsn::NONE),
        };
        if ondisk != Lsn::NONE {
            for (i, tree) in db.trees.iter().enumerate() {
                let target = dir.join(snapshot_dir_name(i as u32, ondisk));
                DiskIndexWriter::write(&target, std::iter::empty(), &options)?;
                tree.link_to_snapshot(&target, 0)?;
            }
            *db.ondisk_lsn.lock() = ondisk;
        }
        info!(id, database = name, indices = comparators.len(), %ondisk, "database created");
        Ok(db)
    }

    /// Loads a database from the newest snapshot of each index.
    ///
    /// # Errors
    ///
    /// [`EngineError::ConsistencyViolation`] if the indices were written at
    /// different LSNs.
    pub fn load(
        id: u32,
        name: &str,
        dir: &Path,
        comparators: &[SharedComparator],
        options: WriterOptions,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        remove_scratch_dirs(dir)?;

        let latest = latest_snapshots(dir)?;
        let mut ondisk: Option<Lsn> = None;
        let mut trees = Vec::with_capacity(comparators.len());
        for (i, order) in comparators.iter().enumerate() {
            let found = latest.get(&(i as u32)).copied();
            let lsn = found.unwrap_or(Lsn::NONE);
            match ondisk {
                None => ondisk = Some(lsn),
                Some(seen) if seen != lsn => {
                    return Err(EngineError::ConsistencyViolation(format!(
                        "database {name}: index {i} is at {lsn}, earlier indices at {seen}"
                    )));
                }
                Some(_) => {}
            }
            let base = found.map(|lsn| dir.join(snapshot_dir_name(i as u32, lsn)));
            debug!(database = name, index = i, base = ?base, "loading index");
            trees.push(LsmTree::open(base.as_deref(), order.clone(), options)?);
        }

        let ondisk = ondisk.unwrap_or(Lsn::NONE);
        info!(id, database = name, indices = trees.len(), %ondisk, "database loaded");
        Ok(Self {
            id,
            name: name.to_string(),
            dir: dir.to_path_buf(),
            trees,
            ondisk_lsn: Mutex::new(ondisk),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_indices(&self) -> usize {
        self.trees.len()
    }

    pub fn comparators(&self) -> Vec<SharedComparator> {
        self.trees.iter().map(|t| t.comparator().clone()).collect()
    }

    /// The tree of index `index`.
    pub fn index(&self, index: u32) -> Result<&LsmTree> {
        self.trees.get(index as usize).ok_or(EngineError::NoSuchIndex {
            database: self.id,
            index,
        })
    }

    pub fn ondisk_lsn(&self) -> Lsn {
        *self.ondisk_lsn.lock()
    }

    // -------------------- Modifications --------------------

    /// Checks that every record names an existing index.
    pub fn validate(&self, group: &RecordGroup) -> Result<()> {
        for r in &group.records {
            self.index(r.index_id)?;
        }
        Ok(())
    }

    /// Applies a group to the overlays. Nothing is applied unless every
    /// index exists.
    pub fn apply(&self, group: RecordGroup) -> Result<()> {
        self.validate(&group)?;
        for r in group.records {
            self.trees[r.index_id as usize].apply(r.key, r.value);
        }
        Ok(())
    }

    // -------------------- Snapshots --------------------

    /// Freezes the current generation of every index.
    pub fn create_snapshot(&self) -> Vec<u32> {
        self.trees.iter().map(LsmTree::create_snapshot).collect()
    }

    /// Freezes the current generation of the given indices.
    pub fn create_snapshot_of(&self, indices: &[u32]) -> Result<Vec<u32>> {
        // validate first so a bad id freezes nothing
        for &i in indices {
            self.index(i)?;
        }
        Ok(indices
            .iter()
            .map(|&i| self.trees[i as usize].create_snapshot())
            .collect())
    }

    /// Materializes `snap_ids` (one per index) as the snapshot at `lsn`.
    ///
    /// Same as [`prepare_snapshot`](Self::prepare_snapshot) followed by
    /// [`commit_snapshot`](Self::commit_snapshot).
    pub fn write_snapshot(&self, lsn: Lsn, snap_ids: &[u32]) -> Result<()> {
        self.prepare_snapshot(lsn, snap_ids)?;
        self.commit_snapshot(lsn)
    }

    /// Writes every index into a scratch directory. Nothing becomes visible
    /// to a restart until [`commit_snapshot`](Self::commit_snapshot).
    pub fn prepare_snapshot(&self, lsn: Lsn, snap_ids: &[u32]) -> Result<()> {
        self.check_ids(snap_ids)?;
        let ondisk = self.ondisk_lsn();
        if lsn <= ondisk {
            return Err(EngineError::InvalidArgument(format!(
                "snapshot {lsn} of database {} is not newer than {ondisk}",
                self.name
            )));
        }
        info!(database = %self.name, %lsn, "writing snapshot");

        for (i, (tree, &snap)) in self.trees.iter().zip(snap_ids).enumerate() {
            let tmp = self.scratch_dir(i);
            if tmp.exists() {
                fs::remove_dir_all(&tmp)?;
            }
            tree.materialize_snapshot(&tmp, snap)?;
        }
        Ok(())
    }

    /// Renames the scratch directories written by
    /// [`prepare_snapshot`](Self::prepare_snapshot) to their names at `lsn`.
    pub fn commit_snapshot(&self, lsn: Lsn) -> Result<()> {
        for i in 0..self.trees.len() {
            fs::rename(self.scratch_dir(i), self.dir.join(snapshot_dir_name(i as u32, lsn)))?;
        }
        sync_dir(&self.dir);
        Ok(())
    }

    fn scratch_dir(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_TMP_PREFIX}{index}"))
    }

    /// Links every index to the snapshot at `lsn`, then deletes older
    /// snapshot directories.
    pub fn link_snapshot(&self, lsn: Lsn, snap_ids: &[u32]) -> Result<()> {
        self.check_ids(snap_ids)?;
        for (i, (tree, &snap)) in self.trees.iter().zip(snap_ids).enumerate() {
            tree.link_to_snapshot(&self.dir.join(snapshot_dir_name(i as u32, lsn)), snap)?;
        }
        *self.ondisk_lsn.lock() = lsn;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((_, snap_lsn)) = name.to_str().and_then(parse_snapshot_dir_name) else {
                continue;
            };
            if snap_lsn < lsn {
                debug!(path = %entry.path().display(), "removing superseded snapshot");
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "failed to remove old snapshot");
                }
            }
        }
        Ok(())
    }

    /// Materializes a subset of indices into `target` as
    /// `IX<index>V0SEQ0.idx` directories (persistent named snapshots).
    pub fn write_snapshot_to(&self, target: &Path, indices: &[u32], snap_ids: &[u32]) -> Result<()> {
        if indices.len() != snap_ids.len() {
            return Err(EngineError::InvalidArgument(
                "one snapshot id per index is required".into(),
            ));
        }
        fs::create_dir_all(target)?;
        for (&index, &snap) in indices.iter().zip(snap_ids) {
            let tree = self.index(index)?;
            tree.materialize_snapshot(&target.join(snapshot_dir_name(index, Lsn::NONE)), snap)?;
        }
        sync_dir(target);
        Ok(())
    }

    /// Files of the newest snapshot of every index.
    pub fn latest_snapshot_files(&self, chunk_size: u64) -> Result<Vec<SnapshotFile>> {
        let latest = latest_snapshots(&self.dir)?;
        let mut out = Vec::new();
        for (index, lsn) in latest {
            if index as usize >= self.trees.len() {
                continue;
            }
            let snap_dir = self.dir.join(snapshot_dir_name(index, lsn));
            let mut files: Vec<PathBuf> = fs::read_dir(&snap_dir)?
                .map(|e| e.map(|e| e.path()))
                .collect::<std::io::Result<_>>()?;
            files.sort();
            for path in files {
                let length = fs::metadata(&path)?.len();
                out.push(SnapshotFile {
                    path,
                    length,
                    chunk_size,
                });
            }
        }
        Ok(out)
    }

    /// Deletes all files of this database.
    pub fn destroy(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        info!(id = self.id, name = %self.name, "database removed");
        Ok(())
    }

    fn check_ids(&self, snap_ids: &[u32]) -> Result<()> {
        if snap_ids.len() != self.trees.len() {
            return Err(EngineError::InvalidArgument(format!(
                "expected {} snapshot ids, got {}",
                self.trees.len(),
                snap_ids.len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LsmDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmDatabase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("indices", &self.trees.len())
            .field("ondisk_lsn", &self.ondisk_lsn())
            .finish()
    }
}

/// Newest snapshot LSN per index found in `dir`.
fn latest_snapshots(dir: &Path) -> Result<BTreeMap<u32, Lsn>> {
    let mut latest: BTreeMap<u32, Lsn> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some((index, lsn)) = name.to_str().and_then(parse_snapshot_dir_name) else {
            continue;
        };
        let slot = latest.entry(index).or_insert(lsn);
        if lsn > *slot {
            *slot = lsn;
        }
    }
    Ok(latest)
}

/// Removes snapshot directories left behind by an interrupted write.
fn remove_scratch_dirs(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(SNAPSHOT_TMP_PREFIX) {
            warn!(path = %entry.path().display(), "removing interrupted snapshot");
            fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

pub(crate) fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
