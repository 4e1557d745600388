use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::entry::LogEntry;
use crate::{Lsn, WalError};

/// Extension of log segment files.
pub const SEGMENT_EXTENSION: &str = "dbl";

/// File name of the segment whose first entry is `first`.
pub fn segment_file_name(first: Lsn) -> String {
    format!("{}.{}.{}", first.view, first.seq, SEGMENT_EXTENSION)
}

/// Parses `<view>.<seq>.dbl`.
pub fn parse_segment_name(name: &str) -> Option<Lsn> {
    let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    let (view, seq) = stem.split_once('.')?;
    Some(Lsn::new(view.parse().ok()?, seq.parse().ok()?))
}

/// A log segment on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// LSN the segment is named after (its first entry, if any).
    pub first: Lsn,
    pub path: PathBuf,
}

/// Lists all segments in `dir`, sorted by (view, seq). A missing directory
/// has no segments.
pub fn list_segments(dir: &Path) -> Result<Vec<Segment>, WalError> {
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for ent in rd {
        let ent = ent?;
        let name = ent.file_name();
        let Some(first) = name.to_str().and_then(parse_segment_name) else {
            continue;
        };
        out.push(Segment {
            first,
            path: ent.path(),
        });
    }
    out.sort_by_key(|s| s.first);
    Ok(out)
}

/// Append handle for the active segment.
///
/// Frames are built in a reusable buffer and written with a single
/// `write_all`, like every other record in the log.
pub struct SegmentWriter {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
    len: u64,
}

impl SegmentWriter {
    /// Opens (or creates) the segment that starts at `first`.
    pub fn open(dir: &Path, first: Lsn) -> Result<Self, WalError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(segment_file_name(first));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
        Ok(Self {
            file,
            path,
            buf: Vec::with_capacity(256),
            len,
        })
    }

    pub fn append(&mut self, entry: &LogEntry) -> Result<(), WalError> {
        entry.encode_into(&mut self.buf)?;
        self.file.write_all(&self.buf)?;
        self.len += self.buf.len() as u64;
        Ok(())
    }

    /// Forces appended data to disk.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
