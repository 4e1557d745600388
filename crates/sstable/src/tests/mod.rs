mod writer_tests;

use anyhow::Result;
use memtable::LexicographicComparator;
use std::path::Path;

use crate::*;

/// `count` entries `key00000 -> val00000`, sorted.
pub(crate) fn numbered(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..count)
        .map(|i| (format!("key{i:05}").into_bytes(), format!("val{i:05}").into_bytes()))
        .collect()
}

pub(crate) fn write_and_open(
    dir: &Path,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    opts: &WriterOptions,
) -> Result<DiskIndex> {
    DiskIndexWriter::write(dir, entries, opts)?;
    DiskIndex::open(dir, LexicographicComparator::shared(), opts.compressed)
}
