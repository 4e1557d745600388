use super::*;
use anyhow::Result;
use config::Durability;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn start(dir: &Path, durability: Durability) -> Result<DiskLogger> {
    Ok(DiskLogger::start(dir, Lsn::FIRST, durability, 0)?)
}

fn append(logger: &DiskLogger, payload: &[u8]) -> Result<Lsn> {
    Ok(logger.append(PayloadType::Insert, payload.to_vec())?.wait()?)
}

fn replay_all(dir: &Path) -> Result<(Vec<LogEntry>, ReplayOutcome)> {
    let mut entries = Vec::new();
    let outcome = replay(dir, |e| {
        entries.push(e);
        Ok::<_, WalError>(())
    })?;
    Ok((entries, outcome))
}

fn payloads(entries: &[LogEntry]) -> Vec<Vec<u8>> {
    entries.iter().map(|e| e.payload.clone()).collect()
}

fn only_segment(dir: &Path) -> Result<std::path::PathBuf> {
    let segs = list_segments(dir)?;
    assert_eq!(segs.len(), 1);
    Ok(segs[0].path.clone())
}

// -------------------- Lsn --------------------

#[test]
fn lsn_orders_by_view_then_sequence() {
    assert!(Lsn::new(1, 100) < Lsn::new(2, 1));
    assert!(Lsn::new(2, 1) < Lsn::new(2, 2));
    assert_eq!(Lsn::new(3, 7).next(), Lsn::new(3, 8));
    assert_eq!(Lsn::new(3, 0).prev(), Lsn::new(3, 0));
    assert_eq!(Lsn::new(1, 42).to_string(), "1:42");
    assert!(Lsn::NONE < Lsn::FIRST);
}

// -------------------- Framing --------------------

#[test]
fn frame_roundtrip_in_memory() -> Result<()> {
    let entry = LogEntry {
        lsn: Lsn::new(4, 9),
        payload_type: PayloadType::SnapshotConfig,
        payload: vec![0, 0xFF, 7],
    };
    let mut buf = Vec::new();
    entry.encode_into(&mut buf)?;
    assert_eq!(buf.len(), entry.encoded_len());

    let mut body = Vec::new();
    let mut rdr = Cursor::new(buf);
    match read_frame(&mut rdr, &mut body)? {
        Frame::Entry(got) => assert_eq!(got, entry),
        other => panic!("unexpected frame {other:?}"),
    }
    assert!(matches!(read_frame(&mut rdr, &mut body)?, Frame::End));
    Ok(())
}

#[test]
fn frame_with_bad_crc_is_damaged() -> Result<()> {
    let entry = LogEntry {
        lsn: Lsn::FIRST,
        payload_type: PayloadType::Insert,
        payload: b"hello".to_vec(),
    };
    let mut buf = Vec::new();
    entry.encode_into(&mut buf)?;
    let last = buf.len() - 1;
    buf[last] ^= 0x01;
    let len = buf.len() as u64;
    assert!(matches!(
        read_frame(&mut Cursor::new(buf), &mut Vec::new())?,
        Frame::Damaged { len: Some(n) } if n == len
    ));
    Ok(())
}

#[test]
fn frame_with_unknown_type_is_damaged() -> Result<()> {
    let entry = LogEntry {
        lsn: Lsn::FIRST,
        payload_type: PayloadType::Insert,
        payload: Vec::new(),
    };
    let mut buf = Vec::new();
    entry.encode_into(&mut buf)?;
    // patch the type byte and fix up the CRC
    buf[20] = 9;
    let crc = crc32fast::hash(&buf[8..]);
    buf[4..8].copy_from_slice(&crc.to_le_bytes());
    assert!(matches!(
        read_frame(&mut Cursor::new(buf), &mut Vec::new())?,
        Frame::Damaged { len: Some(_) }
    ));
    Ok(())
}

#[test]
fn record_len_too_small_is_damaged() -> Result<()> {
    let buf = 3u32.to_le_bytes().to_vec();
    assert!(matches!(
        read_frame(&mut Cursor::new(buf), &mut Vec::new())?,
        Frame::Damaged { len: None }
    ));
    Ok(())
}

#[test]
fn frame_cut_short_is_torn() -> Result<()> {
    let entry = LogEntry {
        lsn: Lsn::FIRST,
        payload_type: PayloadType::Insert,
        payload: b"hello".to_vec(),
    };
    let mut buf = Vec::new();
    entry.encode_into(&mut buf)?;
    for cut in [2, 6, buf.len() - 1] {
        assert!(
            matches!(read_frame(&mut Cursor::new(&buf[..cut]), &mut Vec::new())?, Frame::Torn),
            "cut at {cut}"
        );
    }
    Ok(())
}

// -------------------- Segment names --------------------

#[test]
fn segment_names_roundtrip() {
    let name = segment_file_name(Lsn::new(2, 17));
    assert_eq!(name, "2.17.dbl");
    assert_eq!(parse_segment_name(&name), Some(Lsn::new(2, 17)));
    assert_eq!(parse_segment_name("2.17.log"), None);
    assert_eq!(parse_segment_name("x.17.dbl"), None);
    assert_eq!(parse_segment_name("17.dbl"), None);
}

#[test]
fn segments_sort_numerically() -> Result<()> {
    let dir = tempdir()?;
    for name in ["1.10.dbl", "1.9.dbl", "2.1.dbl", "notes.txt"] {
        fs::write(dir.path().join(name), b"")?;
    }
    let firsts: Vec<Lsn> = list_segments(dir.path())?.iter().map(|s| s.first).collect();
    assert_eq!(firsts, vec![Lsn::new(1, 9), Lsn::new(1, 10), Lsn::new(2, 1)]);
    Ok(())
}

#[test]
fn missing_directory_has_no_segments() -> Result<()> {
    let dir = tempdir()?;
    assert!(list_segments(&dir.path().join("nope"))?.is_empty());
    let (entries, outcome) = replay_all(&dir.path().join("nope"))?;
    assert!(entries.is_empty());
    assert_eq!(outcome.last_lsn, None);
    Ok(())
}

// -------------------- Basic write & replay --------------------

#[test]
fn write_and_replay() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    assert_eq!(append(&logger, b"one")?, Lsn::new(1, 1));
    assert_eq!(append(&logger, b"two")?, Lsn::new(1, 2));
    assert_eq!(append(&logger, b"")?, Lsn::new(1, 3));
    logger.shutdown()?;

    let (entries, outcome) = replay_all(dir.path())?;
    assert_eq!(payloads(&entries), vec![b"one".to_vec(), b"two".to_vec(), Vec::new()]);
    assert_eq!(outcome.last_lsn, Some(Lsn::new(1, 3)));
    assert_eq!(outcome.entries, 3);
    assert!(outcome.torn_tail.is_none());
    Ok(())
}

#[test]
fn empty_log_replays_nothing() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    logger.shutdown()?;

    // the first segment is created eagerly
    assert!(dir.path().join("1.1.dbl").exists());
    let (entries, outcome) = replay_all(dir.path())?;
    assert!(entries.is_empty());
    assert_eq!(outcome, ReplayOutcome::default());
    Ok(())
}

#[test]
fn replay_is_repeatable() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    for i in 0..10u8 {
        append(&logger, &[i])?;
    }
    logger.shutdown()?;

    let (first, _) = replay_all(dir.path())?;
    let (second, _) = replay_all(dir.path())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn visitor_error_stops_replay() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    for i in 0..5u8 {
        append(&logger, &[i])?;
    }
    logger.shutdown()?;

    let mut seen = 0;
    let err = replay(dir.path(), |e| {
        seen += 1;
        if e.lsn == Lsn::new(1, 3) {
            return Err(anyhow::anyhow!("bad payload"));
        }
        Ok(())
    })
    .unwrap_err();
    assert_eq!(seen, 3);
    assert!(err.to_string().contains("bad payload"));
    Ok(())
}

#[test]
fn restart_continues_in_a_new_segment() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"a")?;
    append(&logger, b"b")?;
    logger.shutdown()?;

    let (_, outcome) = replay_all(dir.path())?;
    let next = outcome.last_lsn.map_or(Lsn::FIRST, Lsn::next);
    let logger = DiskLogger::start(dir.path(), next, Durability::SyncPerWrite, 0)?;
    assert_eq!(append(&logger, b"c")?, Lsn::new(1, 3));
    logger.shutdown()?;

    assert!(dir.path().join("1.3.dbl").exists());
    let (entries, _) = replay_all(dir.path())?;
    assert_eq!(payloads(&entries), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    Ok(())
}

// -------------------- Truncated tail tolerance --------------------

#[test]
fn truncated_tail_ends_replay() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"keep-1")?;
    append(&logger, b"keep-2")?;
    append(&logger, b"torn")?;
    logger.shutdown()?;

    let path = only_segment(dir.path())?;
    let len = fs::metadata(&path)?.len();
    let file = fs::OpenOptions::new().write(true).open(&path)?;
    file.set_len(len - 3)?;
    drop(file);

    let (entries, outcome) = replay_all(dir.path())?;
    assert_eq!(payloads(&entries), vec![b"keep-1".to_vec(), b"keep-2".to_vec()]);
    assert_eq!(outcome.last_lsn, Some(Lsn::new(1, 2)));
    let (torn_path, offset) = outcome.torn_tail.clone().expect("torn tail");
    assert_eq!(torn_path, path);
    assert_eq!(offset, 2 * (HEADER_BYTES as u64 + 6));
    Ok(())
}

#[test]
fn truncate_tail_then_resume_appending() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"x")?;
    append(&logger, b"y")?;
    logger.shutdown()?;

    // garbage after the last good record, as left by a crash mid-write
    let path = only_segment(dir.path())?;
    let mut bytes = fs::read(&path)?;
    bytes.extend_from_slice(&[0x30, 0, 0, 0, 1, 2, 3]);
    fs::write(&path, bytes)?;

    let (_, outcome) = replay_all(dir.path())?;
    assert!(outcome.torn_tail.is_some());
    outcome.truncate_tail()?;

    let logger = DiskLogger::start(dir.path(), Lsn::new(1, 3), Durability::SyncPerWrite, 0)?;
    append(&logger, b"z")?;
    logger.shutdown()?;

    let (entries, outcome) = replay_all(dir.path())?;
    assert_eq!(payloads(&entries), vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
    assert!(outcome.torn_tail.is_none());
    Ok(())
}

#[test]
fn torn_tail_before_empty_segment_is_still_a_tail() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"x")?;
    logger.shutdown()?;

    let path = only_segment(dir.path())?;
    let mut bytes = fs::read(&path)?;
    bytes.extend_from_slice(&[9, 9]);
    fs::write(&path, bytes)?;
    fs::write(dir.path().join("1.2.dbl"), b"")?;

    let (entries, outcome) = replay_all(dir.path())?;
    assert_eq!(entries.len(), 1);
    assert_eq!(outcome.torn_tail.map(|(p, _)| p), Some(path));
    Ok(())
}

// -------------------- Corruption detection --------------------

#[test]
fn corruption_in_earlier_segment_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"first")?;
    append(&logger, b"second")?;
    logger.switch_segment()?;
    append(&logger, b"third")?;
    logger.shutdown()?;

    let first = dir.path().join("1.1.dbl");
    let mut bytes = fs::read(&first)?;
    bytes[10] ^= 0xFF;
    fs::write(&first, bytes)?;

    let err = replay_all(dir.path()).unwrap_err();
    match err.downcast_ref::<WalError>() {
        Some(WalError::Corrupt { path, offset }) => {
            assert_eq!(path, &first);
            assert_eq!(*offset, 0);
        }
        other => panic!("expected corruption, got {other:?}"),
    }
    Ok(())
}

#[test]
fn crc_mismatch_mid_segment_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"aaaa")?;
    append(&logger, b"bbbb")?;
    append(&logger, b"cccc")?;
    logger.shutdown()?;

    let path = only_segment(dir.path())?;
    let mut bytes = fs::read(&path)?;
    let second = HEADER_BYTES + 4;
    bytes[second + HEADER_BYTES] ^= 0xFF;
    fs::write(&path, bytes)?;

    // acknowledged entries follow the damaged one, so it is not a tail
    let err = replay_all(dir.path()).unwrap_err();
    match err.downcast_ref::<WalError>() {
        Some(WalError::Corrupt { path: p, offset }) => {
            assert_eq!(p, &path);
            assert_eq!(*offset, second as u64);
        }
        other => panic!("expected corruption, got {other:?}"),
    }
    Ok(())
}

#[test]
fn crc_mismatch_in_last_frame_is_tail() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"aaaa")?;
    append(&logger, b"bbbb")?;
    logger.shutdown()?;

    let path = only_segment(dir.path())?;
    let mut bytes = fs::read(&path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes)?;

    let (entries, outcome) = replay_all(dir.path())?;
    assert_eq!(payloads(&entries), vec![b"aaaa".to_vec()]);
    assert_eq!(outcome.torn_tail, Some((path, (HEADER_BYTES + 4) as u64)));
    Ok(())
}

#[test]
fn zeroed_tail_is_a_tail() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"x")?;
    logger.shutdown()?;

    let path = only_segment(dir.path())?;
    let clean = fs::metadata(&path)?.len();
    let mut bytes = fs::read(&path)?;
    bytes.extend_from_slice(&[0u8; 64]);
    fs::write(&path, bytes)?;

    let (entries, outcome) = replay_all(dir.path())?;
    assert_eq!(entries.len(), 1);
    assert_eq!(outcome.torn_tail, Some((path, clean)));
    Ok(())
}

#[test]
fn bad_length_with_data_after_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"x")?;
    append(&logger, b"y")?;
    logger.shutdown()?;

    let path = only_segment(dir.path())?;
    let mut bytes = fs::read(&path)?;
    let second = HEADER_BYTES + 1;
    bytes[second..second + 4].copy_from_slice(&1u32.to_le_bytes());
    fs::write(&path, bytes)?;

    let err = replay_all(dir.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WalError>(),
        Some(WalError::Corrupt { offset, .. }) if *offset == second as u64
    ));
    Ok(())
}

// -------------------- Durability modes --------------------

#[test]
fn sync_per_write_advances_durable_lsn() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    assert_eq!(logger.durable_lsn(), Lsn::new(1, 0));
    let lsn = append(&logger, b"v")?;
    assert_eq!(logger.durable_lsn(), lsn);
    logger.shutdown()?;
    Ok(())
}

#[test]
fn group_commit_completes_whole_batch() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(
        dir.path(),
        Durability::Group {
            window: Duration::from_secs(60),
            max_batch: 4,
        },
    )?;
    let handles: Vec<SyncHandle> = (0..4u8)
        .map(|i| logger.append(PayloadType::Insert, vec![i]))
        .collect::<Result<_, _>>()?;
    let lsns: Vec<Lsn> = handles.into_iter().map(SyncHandle::wait).collect::<Result<_, _>>()?;
    assert_eq!(lsns, (1..=4).map(|s| Lsn::new(1, s)).collect::<Vec<_>>());
    assert_eq!(logger.durable_lsn(), Lsn::new(1, 4));
    logger.shutdown()?;
    Ok(())
}

#[test]
fn group_commit_flushes_when_window_expires() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(
        dir.path(),
        Durability::Group {
            window: Duration::from_millis(5),
            max_batch: 1000,
        },
    )?;
    assert_eq!(append(&logger, b"lonely")?, Lsn::new(1, 1));
    assert_eq!(logger.durable_lsn(), Lsn::new(1, 1));
    logger.shutdown()?;
    Ok(())
}

#[test]
fn pseudo_sync_acknowledges_before_fsync() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(
        dir.path(),
        Durability::PseudoSync {
            window: Duration::from_secs(60),
        },
    )?;
    let lsn = append(&logger, b"fast")?;
    assert_eq!(lsn, Lsn::new(1, 1));
    // the window has not expired yet
    assert!(logger.durable_lsn() < lsn);
    assert_eq!(logger.sync()?, lsn);
    assert_eq!(logger.durable_lsn(), lsn);
    logger.shutdown()?;
    Ok(())
}

#[test]
fn shutdown_syncs_pseudo_sync_entries() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(
        dir.path(),
        Durability::PseudoSync {
            window: Duration::from_secs(60),
        },
    )?;
    for i in 0..20u8 {
        append(&logger, &[i])?;
    }
    logger.shutdown()?;
    assert_eq!(logger.durable_lsn(), Lsn::new(1, 20));
    assert_eq!(replay_all(dir.path())?.0.len(), 20);
    Ok(())
}

// -------------------- Segment switching --------------------

#[test]
fn switch_segment_starts_new_file() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"a")?;
    append(&logger, b"b")?;
    assert!(logger.bytes_since_switch() > 0);

    assert_eq!(logger.switch_segment()?, Lsn::new(1, 2));
    assert_eq!(logger.bytes_since_switch(), 0);
    append(&logger, b"c")?;
    logger.shutdown()?;

    let firsts: Vec<Lsn> = list_segments(dir.path())?.iter().map(|s| s.first).collect();
    assert_eq!(firsts, vec![Lsn::new(1, 1), Lsn::new(1, 3)]);
    Ok(())
}

#[test]
fn switching_an_empty_segment_keeps_it() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    append(&logger, b"a")?;
    logger.switch_segment()?;
    assert_eq!(logger.switch_segment()?, Lsn::new(1, 1));
    logger.shutdown()?;
    assert_eq!(list_segments(dir.path())?.len(), 2);
    Ok(())
}

// -------------------- Range reads --------------------

#[test]
fn read_range_spans_segments() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    for i in 1..=9u8 {
        append(&logger, &[i])?;
        if i % 3 == 0 {
            logger.switch_segment()?;
        }
    }
    logger.shutdown()?;

    let got = read_range(dir.path(), Lsn::new(1, 2), Lsn::new(1, 7))?;
    let seqs: Vec<u64> = got.iter().map(|e| e.lsn.seq).collect();
    assert_eq!(seqs, vec![2, 3, 4, 5, 6, 7]);
    assert_eq!(got[0].payload, vec![2]);

    assert_eq!(read_range(dir.path(), Lsn::new(1, 9), Lsn::new(1, 100))?.len(), 1);
    assert!(read_range(dir.path(), Lsn::new(1, 10), Lsn::new(1, 100))?.is_empty());
    assert!(read_range(dir.path(), Lsn::new(1, 5), Lsn::new(1, 4))?.is_empty());
    Ok(())
}

// -------------------- Cleanup --------------------

#[test]
fn delete_segments_covered_by_checkpoint() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    for i in 1..=6u8 {
        append(&logger, &[i])?;
        if i % 2 == 0 {
            logger.switch_segment()?;
        }
    }
    logger.shutdown()?;
    // segments: 1.1 (1-2), 1.3 (3-4), 1.5 (5-6), 1.7 (empty)
    assert_eq!(list_segments(dir.path())?.len(), 4);

    // 1.3 still holds 4, which is not covered yet
    assert_eq!(delete_segments_before(dir.path(), Lsn::new(1, 3))?, 1);
    assert_eq!(delete_segments_before(dir.path(), Lsn::new(1, 4))?, 1);
    let firsts: Vec<Lsn> = list_segments(dir.path())?.iter().map(|s| s.first).collect();
    assert_eq!(firsts, vec![Lsn::new(1, 5), Lsn::new(1, 7)]);

    // the newest segment always survives
    assert_eq!(delete_segments_before(dir.path(), Lsn::new(1, 100))?, 1);
    assert_eq!(list_segments(dir.path())?.len(), 1);
    Ok(())
}

// -------------------- Lifecycle --------------------

#[test]
fn append_after_shutdown_is_closed() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(dir.path(), Durability::SyncPerWrite)?;
    logger.shutdown()?;
    // idempotent
    logger.shutdown()?;
    assert!(matches!(
        logger.append(PayloadType::Insert, b"late".to_vec()),
        Err(WalError::Closed)
    ));
    assert!(matches!(logger.sync(), Err(WalError::Closed)));
    Ok(())
}

#[test]
fn failed_log_rejects_pseudo_sync_appends() -> Result<()> {
    let base = tempdir()?;
    let dir = base.path().join("log");
    let logger = start(
        &dir,
        Durability::PseudoSync {
            window: Duration::from_secs(60),
        },
    )?;
    append(&logger, b"before")?;

    // the next segment cannot be created where the directory was
    fs::remove_dir_all(&dir)?;
    fs::write(&dir, b"")?;
    assert!(matches!(logger.switch_segment(), Err(WalError::Io(_))));

    // acknowledged writes would be lost, so appends fail up front
    assert!(matches!(
        logger.append(PayloadType::Insert, b"after".to_vec()),
        Err(WalError::Io(_))
    ));
    assert!(matches!(logger.sync(), Err(WalError::Io(_))));
    assert_eq!(logger.last_written_lsn(), Lsn::new(1, 1));
    Ok(())
}

#[test]
fn last_written_runs_ahead_of_durable_in_pseudo_sync() -> Result<()> {
    let dir = tempdir()?;
    let logger = start(
        dir.path(),
        Durability::PseudoSync {
            window: Duration::from_secs(60),
        },
    )?;
    assert_eq!(logger.last_written_lsn(), Lsn::new(1, 0));
    let lsn = append(&logger, b"v")?;
    assert_eq!(logger.last_written_lsn(), lsn);
    assert!(logger.durable_lsn() < lsn);
    logger.shutdown()?;
    Ok(())
}

// -------------------- Stress tests --------------------

#[test]
fn concurrent_appenders_get_dense_increasing_lsns() -> Result<()> {
    let dir = tempdir()?;
    let logger = Arc::new(start(
        dir.path(),
        Durability::Group {
            window: Duration::from_millis(1),
            max_batch: 32,
        },
    )?);

    let mut joins = Vec::new();
    for t in 0..4u8 {
        let logger = logger.clone();
        joins.push(thread::spawn(move || -> Result<Vec<Lsn>> {
            let mut lsns = Vec::new();
            for i in 0..250u16 {
                let mut payload = vec![t];
                payload.extend_from_slice(&i.to_le_bytes());
                lsns.push(append(&logger, &payload)?);
            }
            Ok(lsns)
        }));
    }
    let mut all = Vec::new();
    for j in joins {
        let lsns = j.join().expect("appender panicked")?;
        // per-thread order is preserved
        assert!(lsns.windows(2).all(|w| w[0] < w[1]));
        all.extend(lsns);
    }
    logger.shutdown()?;

    all.sort();
    assert_eq!(all, (1..=1000).map(|s| Lsn::new(1, s)).collect::<Vec<_>>());

    let (entries, _) = replay_all(dir.path())?;
    assert!(entries.windows(2).all(|w| w[0].lsn.next() == w[1].lsn));
    Ok(())
}
