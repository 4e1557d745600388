use super::snapshot_dirs;
use crate::*;
use anyhow::Result;
use sstable::{WriterOptions, BLOCK_INDEX_FILE};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn lex(n: usize) -> Vec<SharedComparator> {
    vec![LexicographicComparator::shared(); n]
}

fn opts() -> WriterOptions {
    WriterOptions {
        max_entries_per_block: 4,
        ..WriterOptions::default()
    }
}

fn create(dir: &Path, indices: usize) -> Result<LsmDatabase> {
    Ok(LsmDatabase::create(0, "db", dir, &lex(indices), opts(), Lsn::NONE)?)
}

fn load(dir: &Path, indices: usize) -> crate::Result<LsmDatabase> {
    LsmDatabase::load(0, "db", dir, &lex(indices), opts())
}

fn checkpoint(db: &LsmDatabase, lsn: Lsn) -> Result<()> {
    let ids = db.create_snapshot();
    db.write_snapshot(lsn, &ids)?;
    db.link_snapshot(lsn, &ids)?;
    Ok(())
}

// -------------------- Snapshot directory names --------------------

#[test]
fn snapshot_dir_names_round_trip() {
    let name = snapshot_dir_name(3, Lsn::new(2, 1042));
    assert_eq!(name, "IX3V2SEQ1042.idx");
    assert_eq!(parse_snapshot_dir_name(&name), Some((3, Lsn::new(2, 1042))));
}

#[test]
fn foreign_names_are_not_snapshots() {
    for name in [
        "IX1V1SEQ1",
        "IX1V1SEQ1.idx.tmp",
        "IXV1SEQ1.idx",
        "IX1V1SEQ.idx",
        "IX+1V1SEQ1.idx",
        "ix1v1seq1.idx",
        ".currentSnapshot0",
        "blockindex.idx",
    ] {
        assert_eq!(parse_snapshot_dir_name(name), None, "{name}");
    }
}

// -------------------- Modifications --------------------

#[test]
fn apply_is_all_or_nothing() -> Result<()> {
    let dir = tempdir()?;
    let db = create(dir.path(), 2)?;

    let mut group = RecordGroup::new(0);
    group.insert(0, b"k".to_vec(), b"v".to_vec()).insert(5, b"k".to_vec(), b"v".to_vec());
    let err = db.apply(group).unwrap_err();
    assert!(matches!(err, EngineError::NoSuchIndex { database: 0, index: 5 }));
    assert_eq!(db.index(0)?.lookup(b"k", None)?, None);

    let mut group = RecordGroup::new(0);
    group.insert(0, b"k".to_vec(), b"zero".to_vec()).insert(1, b"k".to_vec(), b"one".to_vec());
    db.apply(group)?;
    assert_eq!(db.index(0)?.lookup(b"k", None)?.as_deref(), Some(&b"zero"[..]));
    assert_eq!(db.index(1)?.lookup(b"k", None)?.as_deref(), Some(&b"one"[..]));
    Ok(())
}

// -------------------- Snapshots on disk --------------------

#[test]
fn checkpoint_replaces_older_snapshot_dirs() -> Result<()> {
    let dir = tempdir()?;
    let db = create(dir.path(), 2)?;
    let mut group = RecordGroup::new(0);
    group.insert(0, b"a".to_vec(), b"1".to_vec()).insert(1, b"b".to_vec(), b"2".to_vec());
    db.apply(group)?;

    checkpoint(&db, Lsn::new(1, 5))?;
    assert_eq!(snapshot_dirs(dir.path()), vec!["IX0V1SEQ5.idx", "IX1V1SEQ5.idx"]);
    assert_eq!(db.ondisk_lsn(), Lsn::new(1, 5));

    let mut group = RecordGroup::new(0);
    group.insert(0, b"c".to_vec(), b"3".to_vec());
    db.apply(group)?;
    checkpoint(&db, Lsn::new(1, 9))?;
    assert_eq!(snapshot_dirs(dir.path()), vec!["IX0V1SEQ9.idx", "IX1V1SEQ9.idx"]);

    let reloaded = load(dir.path(), 2)?;
    assert_eq!(reloaded.ondisk_lsn(), Lsn::new(1, 9));
    assert_eq!(reloaded.index(0)?.lookup(b"a", None)?.as_deref(), Some(&b"1"[..]));
    assert_eq!(reloaded.index(0)?.lookup(b"c", None)?.as_deref(), Some(&b"3"[..]));
    assert_eq!(reloaded.index(1)?.lookup(b"b", None)?.as_deref(), Some(&b"2"[..]));
    Ok(())
}

#[test]
fn snapshot_must_be_newer_than_ondisk() -> Result<()> {
    let dir = tempdir()?;
    let db = create(dir.path(), 1)?;
    checkpoint(&db, Lsn::new(1, 5))?;
    let ids = db.create_snapshot();
    let err = db.write_snapshot(Lsn::new(1, 5), &ids).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
    Ok(())
}

#[test]
fn load_picks_newest_snapshot_per_index() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path(), 1)?;
        let mut group = RecordGroup::new(0);
        group.insert(0, b"k".to_vec(), b"new".to_vec());
        db.apply(group)?;
        let ids = db.create_snapshot();
        db.write_snapshot(Lsn::new(2, 1), &ids)?;
    }
    // an older leftover that a crash kept from being deleted
    sstable::DiskIndexWriter::write(
        &dir.path().join("IX0V1SEQ99.idx"),
        vec![(b"k".to_vec(), b"old".to_vec())],
        &opts(),
    )?;

    let db = load(dir.path(), 1)?;
    assert_eq!(db.ondisk_lsn(), Lsn::new(2, 1));
    assert_eq!(db.index(0)?.lookup(b"k", None)?.as_deref(), Some(&b"new"[..]));
    Ok(())
}

#[test]
fn indices_at_different_lsns_are_a_consistency_violation() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path(), 2)?;
        checkpoint(&db, Lsn::new(1, 4))?;
    }
    fs::rename(
        dir.path().join("IX1V1SEQ4.idx"),
        dir.path().join("IX1V1SEQ3.idx"),
    )?;

    let err = load(dir.path(), 2).unwrap_err();
    assert!(matches!(err, EngineError::ConsistencyViolation(_)));
    Ok(())
}

#[test]
fn interrupted_snapshot_is_discarded() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path(), 1)?;
        let ids = db.create_snapshot();
        db.prepare_snapshot(Lsn::new(1, 3), &ids)?;
        // crash before commit
    }
    assert!(dir.path().join(".currentSnapshot0").exists());

    let db = load(dir.path(), 1)?;
    assert!(!dir.path().join(".currentSnapshot0").exists());
    assert_eq!(db.ondisk_lsn(), Lsn::NONE);
    Ok(())
}

#[test]
fn create_at_existing_checkpoint_writes_empty_indices() -> Result<()> {
    let dir = tempdir()?;
    let lsn = Lsn::new(1, 17);
    let db = LsmDatabase::create(4, "late", dir.path(), &lex(2), opts(), lsn)?;
    assert_eq!(db.ondisk_lsn(), lsn);
    assert_eq!(snapshot_dirs(dir.path()), vec!["IX0V1SEQ17.idx", "IX1V1SEQ17.idx"]);

    let reloaded = LsmDatabase::load(4, "late", dir.path(), &lex(2), opts())?;
    assert_eq!(reloaded.ondisk_lsn(), lsn);
    assert_eq!(reloaded.index(1)?.first_entry(None)?, None);
    Ok(())
}

#[test]
fn latest_snapshot_files_lists_every_file() -> Result<()> {
    let dir = tempdir()?;
    let db = create(dir.path(), 2)?;
    assert!(db.latest_snapshot_files(1024)?.is_empty());

    let mut group = RecordGroup::new(0);
    for i in 0..10u8 {
        group.insert(0, vec![i], vec![i; 8]);
    }
    db.apply(group)?;
    checkpoint(&db, Lsn::new(1, 1))?;

    let files = db.latest_snapshot_files(4096)?;
    let index_files: Vec<_> = files
        .iter()
        .filter(|f| f.path.file_name().map_or(false, |n| n == BLOCK_INDEX_FILE))
        .collect();
    assert_eq!(index_files.len(), 2);
    for f in &files {
        assert_eq!(f.chunk_size, 4096);
        assert_eq!(f.length, fs::metadata(&f.path)?.len());
        assert!(f.path.starts_with(dir.path()));
    }
    Ok(())
}

#[test]
fn unknown_index_is_reported() -> Result<()> {
    let dir = tempdir()?;
    let db = create(dir.path(), 1)?;
    assert!(matches!(
        db.index(1),
        Err(EngineError::NoSuchIndex { database: 0, index: 1 })
    ));
    assert!(db.create_snapshot_of(&[0, 3]).is_err());
    Ok(())
}
