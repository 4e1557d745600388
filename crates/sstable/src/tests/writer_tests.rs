use super::numbered;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn write_creates_block_index_and_files() -> Result<()> {
    let dir = tempdir()?;
    let idx = dir.path().join("IX0V1SEQ1.idx");

    let summary = DiskIndexWriter::write(&idx, numbered(40), &WriterOptions::default())?;
    assert_eq!(summary.num_keys, 40);
    assert_eq!(summary.num_blocks, 3); // 16 + 16 + 8
    assert_eq!(summary.block_files, 1);

    assert!(idx.join(BLOCK_INDEX_FILE).exists());
    assert!(idx.join(block_file_name(0)).exists());
    assert!(!idx.join(block_file_name(1)).exists());
    Ok(())
}

#[test]
fn footer_records_totals_and_magic() -> Result<()> {
    let dir = tempdir()?;
    let opts = WriterOptions {
        compressed: true,
        ..WriterOptions::default()
    };
    DiskIndexWriter::write(dir.path(), numbered(5), &opts)?;

    let raw = std::fs::read(dir.path().join(BLOCK_INDEX_FILE))?;
    let magic = u32::from_le_bytes(raw[raw.len() - 4..].try_into()?);
    assert_eq!(magic, BLOCK_INDEX_MAGIC);

    let footer = Footer::read_from(&raw)?;
    assert_eq!(
        footer,
        Footer {
            total_keys: 5,
            block_files: 1,
            compressed: true
        }
    );
    Ok(())
}

#[test]
fn small_file_limit_rolls_over_to_new_files() -> Result<()> {
    let dir = tempdir()?;
    let opts = WriterOptions {
        max_entries_per_block: 4,
        max_block_file_size: 64,
        compressed: false,
    };
    let summary = DiskIndexWriter::write(dir.path(), numbered(20), &opts)?;

    // Every block is larger than 64 bytes, so each one gets its own file.
    assert_eq!(summary.num_blocks, 5);
    assert_eq!(summary.block_files, 5);
    for n in 0..5 {
        assert!(dir.path().join(block_file_name(n)).exists());
    }
    Ok(())
}

#[test]
fn empty_stream_writes_empty_index() -> Result<()> {
    let dir = tempdir()?;
    let summary = DiskIndexWriter::write(dir.path(), Vec::new(), &WriterOptions::default())?;
    assert_eq!(summary, WriteSummary::default());
    assert!(dir.path().join(BLOCK_INDEX_FILE).exists());
    assert!(!dir.path().join(block_file_name(0)).exists());
    Ok(())
}

#[test]
fn zero_entries_per_block_is_rejected() {
    let dir = tempdir().unwrap();
    let opts = WriterOptions {
        max_entries_per_block: 0,
        ..WriterOptions::default()
    };
    assert!(DiskIndexWriter::write(dir.path(), numbered(3), &opts).is_err());
}
