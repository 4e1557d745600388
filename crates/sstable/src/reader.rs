use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use memtable::{in_range, Comparator, SharedComparator};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::block::{checked_payload, decompress, BlockView};
use crate::format::{block_file_name, decode_pointer, Footer, BLOCK_INDEX_FILE, FOOTER_BYTES};

/// Location of one data block.
#[derive(Debug, Clone)]
struct BlockRef {
    first_key: Vec<u8>,
    offset: u32,
    file_id: u16,
}

/// Everything an open index and its iterators share. Dropping the last
/// handle unmaps the block files.
struct Shared {
    dir: PathBuf,
    order: SharedComparator,
    blocks: Vec<BlockRef>,
    files: Vec<Mmap>,
    compressed: bool,
    total_keys: u64,
}

/// Bytes of one decoded block body.
enum BlockData {
    /// Body lies in a mapped file at `start..end`.
    Mapped { file: usize, start: usize, end: usize },
    /// Body was decompressed into memory.
    Owned(Vec<u8>),
}

impl Shared {
    /// Byte range of block `i` inside its file. A block ends where the next
    /// one starts, or at the end of the file when the next block lives in
    /// another file.
    fn block_range(&self, i: usize) -> Result<(usize, usize, usize)> {
        let b = &self.blocks[i];
        let file = b.file_id as usize;
        let Some(map) = self.files.get(file) else {
            bail!("block {i} points to missing block file {file}");
        };
        let start = b.offset as usize;
        let end = match self.blocks.get(i + 1) {
            Some(next) if next.file_id == b.file_id => next.offset as usize,
            _ => map.len(),
        };
        if start >= end || end > map.len() {
            bail!("block {i} has invalid bounds {start}..{end} in file {file}");
        }
        Ok((file, start, end))
    }

    fn load(&self, i: usize) -> Result<BlockData> {
        let (file, start, end) = self.block_range(i)?;
        let payload = checked_payload(&self.files[file][start..end])
            .with_context(|| format!("block {i} in {}", self.dir.display()))?;
        if self.compressed {
            Ok(BlockData::Owned(decompress(payload)?))
        } else {
            // Default blocks are read in place; drop the 4-byte CRC trailer.
            Ok(BlockData::Mapped {
                file,
                start,
                end: end - 4,
            })
        }
    }

    fn body<'a>(&'a self, data: &'a BlockData) -> &'a [u8] {
        match data {
            BlockData::Mapped { file, start, end } => &self.files[*file][*start..*end],
            BlockData::Owned(bytes) => bytes,
        }
    }

    /// Greatest block whose first key is `<= key`, or `None` when `key`
    /// sorts before every block.
    fn block_for(&self, key: &[u8]) -> Option<usize> {
        let n = self
            .blocks
            .partition_point(|b| self.order.compare(&b.first_key, key) != Ordering::Greater);
        n.checked_sub(1)
    }

    /// Greatest block whose first key is `< key`.
    fn block_before(&self, key: &[u8]) -> Option<usize> {
        let n = self
            .blocks
            .partition_point(|b| self.order.compare(&b.first_key, key) == Ordering::Less);
        n.checked_sub(1)
    }
}

/// Read-only, memory-mapped disk index.
///
/// On [`open`](DiskIndex::open) the block index is decoded into memory and
/// every block file is mapped. Point lookups touch one block; range scans
/// walk blocks lazily. Iterators hold their own reference to the mapped
/// files, so an index can be replaced (and its directory deleted) while
/// scans are still running.
#[derive(Clone)]
pub struct DiskIndex {
    shared: Arc<Shared>,
}

impl DiskIndex {
    /// Opens the disk index stored in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the block index is missing or corrupt, a block file is
    /// missing, or `compressed` does not match the flag the index was
    /// written with.
    pub fn open(dir: &Path, order: SharedComparator, compressed: bool) -> Result<Self> {
        let index_path = dir.join(BLOCK_INDEX_FILE);
        let raw = fs::read(&index_path)
            .with_context(|| format!("read block index {}", index_path.display()))?;
        let footer = Footer::read_from(&raw)?;
        if footer.compressed != compressed {
            bail!(
                "compression mismatch for {}: index written with compressed={}, opened with compressed={}",
                dir.display(),
                footer.compressed,
                compressed
            );
        }

        let payload = checked_payload(&raw[..raw.len() - FOOTER_BYTES])
            .with_context(|| format!("block index {}", index_path.display()))?;
        let view = BlockView::parse(payload)?;
        let mut blocks = Vec::with_capacity(view.len());
        for i in 0..view.len() {
            let (offset, file_id) = decode_pointer(view.value(i))?;
            if u32::from(file_id) >= footer.block_files {
                bail!("block {i} points to file {file_id} but only {} exist", footer.block_files);
            }
            blocks.push(BlockRef {
                first_key: view.key(i).to_vec(),
                offset,
                file_id,
            });
        }

        let mut files = Vec::with_capacity(footer.block_files as usize);
        for n in 0..footer.block_files {
            let path = dir.join(block_file_name(n));
            let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
            // Block files are immutable once written and only ever mapped read-only.
            let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?;
            files.push(map);
        }

        debug!(
            dir = %dir.display(),
            blocks = blocks.len(),
            keys = footer.total_keys,
            "disk index opened"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                dir: dir.to_path_buf(),
                order,
                blocks,
                files,
                compressed,
                total_keys: footer.total_keys,
            }),
        })
    }

    /// Directory this index was opened from.
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn comparator(&self) -> &SharedComparator {
        &self.shared.order
    }

    /// Total number of keys stored.
    #[must_use]
    pub fn num_keys(&self) -> u64 {
        self.shared.total_keys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.total_keys == 0
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.shared.blocks.len()
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.shared.compressed
    }

    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the block holding `key` fails its checksum or
    /// cannot be decoded.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let s = &self.shared;
        let Some(block) = s.block_for(key) else {
            return Ok(None);
        };
        let data = s.load(block)?;
        let view = BlockView::parse(s.body(&data))?;
        Ok(view.find(key, s.order.as_ref()).map(|i| view.value(i).to_vec()))
    }

    /// Lazy scan over `[from, to)` in the requested direction. `None` bounds
    /// are open.
    pub fn range_lookup(&self, from: Option<&[u8]>, to: Option<&[u8]>, ascending: bool) -> RangeIter {
        RangeIter::new(
            self.shared.clone(),
            from.map(<[u8]>::to_vec),
            to.map(<[u8]>::to_vec),
            ascending,
        )
    }

    /// Lazy scan over every key starting with `prefix`.
    pub fn prefix_lookup(&self, prefix: &[u8], ascending: bool) -> RangeIter {
        let range = self.shared.order.prefix_to_range(prefix);
        self.range_lookup(Some(&range.from), range.to.as_deref(), ascending)
    }

    /// Smallest entry, if any.
    pub fn first_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.range_lookup(None, None, true).next().transpose()
    }

    /// Largest entry, if any.
    pub fn last_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.range_lookup(None, None, false).next().transpose()
    }
}

impl std::fmt::Debug for DiskIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskIndex")
            .field("dir", &self.shared.dir)
            .field("blocks", &self.shared.blocks.len())
            .field("keys", &self.shared.total_keys)
            .field("compressed", &self.shared.compressed)
            .finish()
    }
}

/// Single-pass iterator over a key range of a [`DiskIndex`].
///
/// Yields `Err` once if a block fails to decode and then stops.
pub struct RangeIter {
    shared: Arc<Shared>,
    from: Option<Vec<u8>>,
    to: Option<Vec<u8>>,
    ascending: bool,
    /// Block currently being read.
    block: usize,
    data: Option<BlockData>,
    /// Next position inside the current block (descending: one past it).
    pos: usize,
    done: bool,
}

impl RangeIter {
    fn new(shared: Arc<Shared>, from: Option<Vec<u8>>, to: Option<Vec<u8>>, ascending: bool) -> Self {
        let empty_range = match (&from, &to) {
            (Some(f), Some(t)) => shared.order.compare(f, t) != Ordering::Less,
            _ => false,
        };
        let mut iter = Self {
            shared,
            from,
            to,
            ascending,
            block: 0,
            data: None,
            pos: 0,
            done: empty_range,
        };
        if !iter.done && iter.shared.blocks.is_empty() {
            iter.done = true;
        }
        iter
    }

    /// Positions the iterator on its first block. Returns `false` when the
    /// range is empty.
    fn seek(&mut self) -> Result<bool> {
        let s = self.shared.clone();
        if self.ascending {
            let block = match &self.from {
                Some(from) => s.block_for(from).unwrap_or(0),
                None => 0,
            };
            let data = s.load(block)?;
            let view = BlockView::parse(s.body(&data))?;
            self.pos = match &self.from {
                Some(from) => view.lower_bound(from, s.order.as_ref()),
                None => 0,
            };
            self.block = block;
            self.data = Some(data);
        } else {
            let block = match &self.to {
                Some(to) => match s.block_before(to) {
                    Some(b) => b,
                    None => return Ok(false),
                },
                None => s.blocks.len() - 1,
            };
            let data = s.load(block)?;
            let view = BlockView::parse(s.body(&data))?;
            self.pos = match &self.to {
                Some(to) => view.lower_bound(to, s.order.as_ref()),
                None => view.len(),
            };
            self.block = block;
            self.data = Some(data);
        }
        Ok(true)
    }

    fn step(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.data.is_none() && !self.seek()? {
            return Ok(None);
        }
        let s = self.shared.clone();
        loop {
            let Some(data) = &self.data else {
                return Ok(None);
            };
            let view = BlockView::parse(s.body(data))?;

            if self.ascending {
                if self.pos < view.len() {
                    let key = view.key(self.pos);
                    if !in_range(s.order.as_ref(), key, None, self.to.as_deref()) {
                        return Ok(None);
                    }
                    let item = (key.to_vec(), view.value(self.pos).to_vec());
                    self.pos += 1;
                    return Ok(Some(item));
                }
                if self.block + 1 >= s.blocks.len() {
                    return Ok(None);
                }
                self.block += 1;
                self.pos = 0;
                self.data = Some(s.load(self.block)?);
            } else {
                if self.pos > 0 {
                    let key = view.key(self.pos - 1);
                    if !in_range(s.order.as_ref(), key, self.from.as_deref(), None) {
                        return Ok(None);
                    }
                    let item = (key.to_vec(), view.value(self.pos - 1).to_vec());
                    self.pos -= 1;
                    return Ok(Some(item));
                }
                if self.block == 0 {
                    return Ok(None);
                }
                self.block -= 1;
                let data = s.load(self.block)?;
                self.pos = BlockView::parse(s.body(&data))?.len();
                self.data = Some(data);
            }
        }
    }
}

impl Iterator for RangeIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
