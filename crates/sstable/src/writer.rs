use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::block::encode_block;
use crate::format::{block_file_name, encode_pointer, Footer, BLOCK_INDEX_FILE};

/// Layout parameters for a new disk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Maximum number of entries per data block.
    pub max_entries_per_block: usize,
    /// A block file is closed once the next block would push it past this size.
    pub max_block_file_size: u64,
    /// LZ4-compress data blocks.
    pub compressed: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_entries_per_block: 16,
            max_block_file_size: 64 * 1024 * 1024,
            compressed: false,
        }
    }
}

/// What a finished write produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteSummary {
    pub num_keys: u64,
    pub num_blocks: usize,
    pub block_files: u32,
}

/// Block file currently being filled.
struct OpenBlockFile {
    out: BufWriter<File>,
    len: u64,
}

impl OpenBlockFile {
    fn create(dir: &Path, id: u32) -> Result<Self> {
        let path = dir.join(block_file_name(id));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("create block file {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            len: 0,
        })
    }

    fn finish(self) -> Result<()> {
        let file = self.out.into_inner().context("flush block file")?;
        file.sync_all()?;
        Ok(())
    }
}

/// Writes sorted key/value streams into a new disk index directory.
///
/// The writer is stateless: everything happens inside
/// [`write`](DiskIndexWriter::write). It does not rename anything; callers
/// that need crash safety write into a temporary directory and rename it
/// into place once this returns.
pub struct DiskIndexWriter {}

impl DiskIndexWriter {
    /// Writes `entries` (sorted by the index comparator, no duplicates, no
    /// tombstones) into `dir`.
    ///
    /// # Directory layout
    ///
    /// ```text
    /// dir/blockfile_0.idx   data blocks
    /// dir/blockfile_1.idx   ... a new file whenever the current one is full
    /// dir/blockindex.idx    first key of each block -> [offset u32][file_id u16], then footer
    /// ```
    ///
    /// An empty stream produces a block index with no blocks and no block
    /// files, which opens as an empty index.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, if `max_entries_per_block` is zero,
    /// or if a single block does not fit the `u32` offset space.
    pub fn write<I>(dir: &Path, entries: I, opts: &WriterOptions) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        if opts.max_entries_per_block == 0 {
            bail!("max_entries_per_block must be positive");
        }
        fs::create_dir_all(dir).with_context(|| format!("create index dir {}", dir.display()))?;

        let mut summary = WriteSummary::default();
        let mut index: Vec<(Vec<u8>, [u8; 6])> = Vec::new();
        let mut current: Option<OpenBlockFile> = None;
        let mut pending: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(opts.max_entries_per_block);

        let mut flush_block = |pending: &mut Vec<(Vec<u8>, Vec<u8>)>,
                               current: &mut Option<OpenBlockFile>,
                               summary: &mut WriteSummary|
         -> Result<()> {
            let Some((first_key, _)) = pending.first() else {
                return Ok(());
            };
            let first_key = first_key.clone();
            let block = encode_block(pending.as_slice(), opts.compressed);
            let block_len = block.len() as u64;

            let full = current
                .as_ref()
                .is_some_and(|f| f.len > 0 && f.len + block_len > opts.max_block_file_size);
            if full {
                if let Some(done) = current.take() {
                    done.finish()?;
                }
            }
            if current.is_none() {
                *current = Some(OpenBlockFile::create(dir, summary.block_files)?);
                summary.block_files += 1;
            }
            let Some(file) = current.as_mut() else {
                bail!("no open block file");
            };

            let offset = u32::try_from(file.len).context("block offset exceeds u32")?;
            let file_id = u16::try_from(summary.block_files - 1).context("too many block files")?;
            file.out.write_all(&block)?;
            file.len += block_len;

            index.push((first_key, encode_pointer(offset, file_id)));
            summary.num_keys += pending.len() as u64;
            summary.num_blocks += 1;
            pending.clear();
            Ok(())
        };

        for (key, value) in entries {
            pending.push((key, value));
            if pending.len() == opts.max_entries_per_block {
                flush_block(&mut pending, &mut current, &mut summary)?;
            }
        }
        flush_block(&mut pending, &mut current, &mut summary)?;
        if let Some(done) = current.take() {
            done.finish()?;
        }

        // The block index is one default-format block plus the footer.
        let index_path = dir.join(BLOCK_INDEX_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&index_path)
            .with_context(|| format!("create block index {}", index_path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(&encode_block(index.as_slice(), false))?;
        Footer {
            total_keys: summary.num_keys,
            block_files: summary.block_files,
            compressed: opts.compressed,
        }
        .write_to(&mut out)?;
        out.flush()?;
        out.into_inner().context("flush block index")?.sync_all()?;

        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }

        debug!(
            dir = %dir.display(),
            keys = summary.num_keys,
            blocks = summary.num_blocks,
            files = summary.block_files,
            "disk index written"
        );
        Ok(summary)
    }
}
