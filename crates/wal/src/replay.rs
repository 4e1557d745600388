use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::entry::{read_frame, Frame, LogEntry};
use crate::segment::{list_segments, Segment};
use crate::{Lsn, WalError};

/// What a full replay saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// LSN of the last valid entry, if any.
    pub last_lsn: Option<Lsn>,
    /// Number of entries handed to the visitor.
    pub entries: u64,
    /// Segment and byte offset of a torn tail. Everything from the offset on
    /// must be cut off before the log is appended to again.
    pub torn_tail: Option<(PathBuf, u64)>,
}

impl ReplayOutcome {
    /// Truncates the torn tail, if there is one.
    pub fn truncate_tail(&self) -> Result<(), WalError> {
        if let Some((path, offset)) = &self.torn_tail {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(*offset)?;
            file.sync_all()?;
            warn!(path = %path.display(), offset, "truncated torn log tail");
        }
        Ok(())
    }
}

/// Walks every valid entry of every segment in LSN order.
fn scan<F>(segments: &[Segment], mut on_entry: F) -> Result<Option<(PathBuf, u64)>, WalError>
where
    F: FnMut(LogEntry) -> Result<bool, WalError>,
{
    let mut body = Vec::with_capacity(256);
    for (i, seg) in segments.iter().enumerate() {
        let mut rdr = BufReader::new(File::open(&seg.path)?);
        let mut offset = 0u64;
        loop {
            match read_frame(&mut rdr, &mut body)? {
                Frame::Entry(entry) => {
                    offset += entry.encoded_len() as u64;
                    if !on_entry(entry)? {
                        return Ok(None);
                    }
                }
                Frame::End => break,
                Frame::Torn => {
                    // Only the end of the log may be torn; later segments
                    // that hold data mean the damage was already there.
                    if later_segments_hold_data(&segments[i + 1..])? {
                        return Err(corrupt(seg, offset));
                    }
                    return Ok(Some((seg.path.clone(), offset)));
                }
                Frame::Damaged { len } => {
                    // A whole frame that fails validation is a tail only when
                    // nothing was written after it.
                    let seg_len = rdr.get_ref().metadata()?.len();
                    let data_follows = match len {
                        Some(n) => offset + n < seg_len,
                        None => !rest_is_zeroed(&seg.path, offset + 4)?,
                    };
                    if data_follows || later_segments_hold_data(&segments[i + 1..])? {
                        return Err(corrupt(seg, offset));
                    }
                    return Ok(Some((seg.path.clone(), offset)));
                }
            }
        }
    }
    Ok(None)
}

fn corrupt(seg: &Segment, offset: u64) -> WalError {
    WalError::Corrupt {
        path: seg.path.clone(),
        offset,
    }
}

/// Whether every byte of `path` from `from` on is zero. Preallocated or
/// partially flushed pages read back as zeros after a crash.
fn rest_is_zeroed(path: &Path, from: u64) -> Result<bool, WalError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut buf = [0u8; 4096];
    loop {
        match file.read(&mut buf)? {
            0 => return Ok(true),
            n if buf[..n].iter().any(|&b| b != 0) => return Ok(false),
            _ => {}
        }
    }
}

fn later_segments_hold_data(rest: &[Segment]) -> Result<bool, WalError> {
    for seg in rest {
        if fs::metadata(&seg.path)?.len() > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Replays the log in `dir`, calling `visit` for each entry in LSN order.
///
/// # Termination
///
/// - **Clean end of the last segment** -> `Ok` with no torn tail.
/// - **Entry cut short at the end of the log** -> `Ok`, with the offset
///   recorded in [`ReplayOutcome::torn_tail`].
/// - **Complete entry that fails its checksum as the very last frame** ->
///   also a torn tail.
/// - **Damaged entry with data after it**, in its own segment or a later
///   one -> `Err(WalError::Corrupt)`.
/// - **Visitor error** -> returned as is, replay stops.
pub fn replay<P, F, E>(dir: P, mut visit: F) -> Result<ReplayOutcome, E>
where
    P: AsRef<Path>,
    F: FnMut(LogEntry) -> Result<(), E>,
    E: From<WalError>,
{
    let dir = dir.as_ref();
    let segments = list_segments(dir)?;
    let mut outcome = ReplayOutcome::default();
    let mut visit_err: Option<E> = None;

    let torn = scan(&segments, |entry| {
        let lsn = entry.lsn;
        if let Err(e) = visit(entry) {
            visit_err = Some(e);
            return Ok(false);
        }
        outcome.last_lsn = Some(lsn);
        outcome.entries += 1;
        Ok(true)
    })?;
    if let Some(e) = visit_err {
        return Err(e);
    }
    outcome.torn_tail = torn;

    info!(
        dir = %dir.display(),
        segments = segments.len(),
        entries = outcome.entries,
        last = ?outcome.last_lsn,
        torn = outcome.torn_tail.is_some(),
        "log replayed"
    );
    Ok(outcome)
}

/// Returns every entry with `from <= lsn <= to`, in LSN order.
///
/// Segments that end before `from` are not read. A torn tail ends the
/// range quietly.
pub fn read_range<P: AsRef<Path>>(dir: P, from: Lsn, to: Lsn) -> Result<Vec<LogEntry>, WalError> {
    let mut segments = list_segments(dir.as_ref())?;
    if from > to {
        return Ok(Vec::new());
    }
    // Keep the segment that contains `from` and everything after it.
    let start = segments
        .iter()
        .rposition(|s| s.first <= from)
        .unwrap_or(0);
    segments.drain(..start);

    let mut out = Vec::new();
    scan(&segments, |entry| {
        if entry.lsn > to {
            return Ok(false);
        }
        if entry.lsn >= from {
            out.push(entry);
        }
        Ok(true)
    })?;
    debug!(%from, %to, count = out.len(), "read log range");
    Ok(out)
}

/// Deletes every segment whose entries all have an LSN `<= upto`. The newest
/// segment is never deleted. Returns the number of files removed.
pub fn delete_segments_before<P: AsRef<Path>>(dir: P, upto: Lsn) -> Result<usize, WalError> {
    let segments = list_segments(dir.as_ref())?;
    let mut removed = 0;
    for pair in segments.windows(2) {
        // A segment ends right before the first entry of its successor.
        if pair[1].first <= upto.next() {
            fs::remove_file(&pair[0].path)?;
            removed += 1;
        } else {
            break;
        }
    }
    if removed > 0 {
        info!(dir = %dir.as_ref().display(), %upto, removed, "deleted covered log segments");
    }
    Ok(removed)
}
