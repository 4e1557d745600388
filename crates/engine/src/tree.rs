//! One index: overlay generations on top of an immutable disk index.
//!
//! ```text
//! ┌────────────────────────────┐  ← current generation (mutable)
//! │ OVERLAY                    │
//! │   frozen generations       │  ← snapshots, newest first
//! ├────────────────────────────┤
//! │ DISK INDEX (base)          │  ← everything up to the on-disk LSN
//! └────────────────────────────┘
//! ```
//!
//! Reads load the generation chain before the base. A link publishes the new
//! base before it releases the generations it covers, so a reader always
//! sees every write either in a generation or in the base it picked up.

use arc_swap::ArcSwapOption;
use memtable::{generation_sources_of, live_entries, MergeIterator, OverlayTree, SharedComparator, Source};
use parking_lot::Mutex;
use sstable::{DiskIndex, DiskIndexWriter, RangeIter, WriteSummary, WriterOptions};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// Slot a disk source parks its error in; the tree iterator reports it.
type ErrorSlot = Arc<Mutex<Option<anyhow::Error>>>;

/// A log-structured index.
pub struct LsmTree {
    overlay: OverlayTree,
    base: ArcSwapOption<DiskIndex>,
    options: WriterOptions,
}

impl LsmTree {
    /// Creates a tree over an optional existing disk index directory.
    pub fn open(base_dir: Option<&Path>, order: SharedComparator, options: WriterOptions) -> Result<Self> {
        let base = match base_dir {
            Some(dir) => Some(Arc::new(DiskIndex::open(dir, order.clone(), options.compressed)?)),
            None => None,
        };
        Ok(Self {
            overlay: OverlayTree::new(order),
            base: ArcSwapOption::new(base),
            options,
        })
    }

    pub fn comparator(&self) -> &SharedComparator {
        self.overlay.comparator()
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// The live disk index, if one is linked.
    pub fn disk_index(&self) -> Option<Arc<DiskIndex>> {
        self.base.load_full()
    }

    /// Id of the generation currently receiving writes.
    pub fn current_generation(&self) -> u32 {
        self.overlay.current_id()
    }

    pub fn approx_overlay_size(&self) -> usize {
        self.overlay.approx_size()
    }

    // -------------------- Writes --------------------

    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert(key, value);
    }

    pub fn delete(&self, key: Vec<u8>) {
        self.overlay.delete(key);
    }

    /// Inserts `Some(value)` or deletes on `None`.
    pub fn apply(&self, key: Vec<u8>, value: Option<Vec<u8>>) {
        match value {
            Some(v) => self.overlay.insert(key, v),
            None => self.overlay.delete(key),
        }
    }

    // -------------------- Reads --------------------

    /// Point lookup against the current state, or against snapshot `as_of`.
    pub fn lookup(&self, key: &[u8], as_of: Option<u32>) -> Result<Option<Vec<u8>>> {
        let chain = self.overlay.generations();
        let hit = chain
            .iter()
            .filter(|g| as_of.map_or(true, |id| g.id() <= id))
            .find_map(|g| g.get(key));
        if let Some(decisive) = hit {
            return Ok(decisive);
        }
        match self.base.load_full() {
            Some(base) => Ok(base.lookup(key)?),
            None => Ok(None),
        }
    }

    /// Live entries in `[from, to)` merged over the overlay and the disk
    /// index. `None` bounds are open.
    pub fn range_lookup(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        ascending: bool,
        as_of: Option<u32>,
    ) -> TreeIter {
        let chain = self.overlay.generations();
        let base = self.base.load_full();
        let slot: ErrorSlot = Arc::new(Mutex::new(None));

        let mut sources: Vec<Source> = Vec::with_capacity(chain.len() + 1);
        if let Some(base) = base {
            sources.push(Box::new(DiskSource {
                iter: base.range_lookup(from, to, ascending),
                slot: slot.clone(),
            }));
        }
        sources.extend(generation_sources_of(&chain, from, to, ascending, as_of));

        let merged = MergeIterator::new(sources, self.comparator().clone(), ascending);
        TreeIter {
            inner: Box::new(live_entries(merged)),
            slot,
            done: false,
        }
    }

    pub fn prefix_lookup(&self, prefix: &[u8], ascending: bool, as_of: Option<u32>) -> TreeIter {
        let range = self.comparator().prefix_to_range(prefix);
        self.range_lookup(Some(&range.from), range.to.as_deref(), ascending, as_of)
    }

    pub fn first_entry(&self, as_of: Option<u32>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.range_lookup(None, None, true, as_of).next().transpose()
    }

    pub fn last_entry(&self, as_of: Option<u32>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.range_lookup(None, None, false, as_of).next().transpose()
    }

    // -------------------- Snapshots --------------------

    /// Freezes the current generation and returns its id.
    pub fn create_snapshot(&self) -> u32 {
        self.overlay.create_snapshot()
    }

    /// Writes the state as of `snapshot_id` (generations up to the id plus the
    /// current base) into a new disk index at `target`. Deleted and shadowed
    /// entries are dropped.
    ///
    /// `target` must not exist yet.
    pub fn materialize_snapshot(&self, target: &Path, snapshot_id: u32) -> Result<WriteSummary> {
        if target.exists() {
            return Err(EngineError::InvalidArgument(format!(
                "snapshot target {} already exists",
                target.display()
            )));
        }
        let mut entries = self.range_lookup(None, None, true, Some(snapshot_id));
        let mut failure = None;
        let stream = std::iter::from_fn(|| match entries.next()? {
            Ok(kv) => Some(kv),
            Err(e) => {
                failure = Some(e);
                None
            }
        });
        let written = DiskIndexWriter::write(target, stream, &self.options);
        if let Some(e) = failure {
            let _ = fs::remove_dir_all(target);
            return Err(e);
        }
        let summary = written?;
        debug!(
            target = %target.display(),
            snapshot_id,
            keys = summary.num_keys,
            blocks = summary.num_blocks,
            files = summary.block_files,
            "materialized snapshot"
        );
        Ok(summary)
    }

    /// Replaces the disk index with the one in `dir` and drops every
    /// generation up to `snapshot_id`. The old index stays mapped until the
    /// last reader holding it is gone.
    pub fn link_to_snapshot(&self, dir: &Path, snapshot_id: u32) -> Result<()> {
        let index = DiskIndex::open(dir, self.comparator().clone(), self.options.compressed)?;
        info!(dir = %dir.display(), snapshot_id, keys = index.num_keys(), "linked disk index");
        self.base.store(Some(Arc::new(index)));
        self.overlay.release_up_to(snapshot_id);
        Ok(())
    }
}

impl std::fmt::Debug for LsmTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmTree")
            .field("overlay", &self.overlay)
            .field("base", &self.base.load_full().map(|b| b.dir().to_path_buf()))
            .finish()
    }
}

/// Adapts a disk range iterator to a merge source.
struct DiskSource {
    iter: RangeIter,
    slot: ErrorSlot,
}

impl Iterator for DiskSource {
    type Item = (Vec<u8>, Option<Vec<u8>>);

    fn next(&mut self) -> Option<Self::Item> {
        match self.iter.next()? {
            Ok((k, v)) => Some((k, Some(v))),
            Err(e) => {
                *self.slot.lock() = Some(e);
                None
            }
        }
    }
}

/// Iterator over live entries of an [`LsmTree`].
///
/// Yields `Err` once if the disk index fails to decode a block, then stops.
pub struct TreeIter {
    inner: Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>,
    slot: ErrorSlot,
    done: bool,
}

impl Iterator for TreeIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.inner.next();
        if let Some(e) = self.slot.lock().take() {
            self.done = true;
            return Some(Err(EngineError::Index(e)));
        }
        match item {
            Some(kv) => Some(Ok(kv)),
            None => {
                self.done = true;
                None
            }
        }
    }
}
