//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for the storage engine.
//!
//! Every record group is serialized into a [`LogEntry`] and handed to the
//! [`DiskLogger`] **before** it touches any in-memory tree. On restart the
//! segments are replayed in LSN order to rebuild the overlays, so no
//! acknowledged write is lost (pseudo-sync mode excepted, see
//! [`config::Durability::PseudoSync`]).
//!
//! ## Segments
//!
//! The log is a directory of segment files named `<view>.<seq>.dbl` after the
//! LSN of their first entry. A checkpoint switches to a fresh segment so
//! segments wholly covered by on-disk indices can be deleted.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][view: u32 LE][seq: u64 LE][type: u8][payload]
//! ```
//!
//! `record_len` includes the 4-byte CRC but **not** itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use config::Durability;
//! use wal::{DiskLogger, Lsn, PayloadType};
//!
//! let logger = DiskLogger::start("db/log", Lsn::FIRST, Durability::SyncPerWrite, 0).unwrap();
//! let lsn = logger
//!     .append(PayloadType::Insert, b"payload".to_vec())
//!     .unwrap()
//!     .wait()
//!     .unwrap();
//! logger.shutdown().unwrap();
//!
//! wal::replay("db/log", |entry| {
//!     println!("{} {:?}", entry.lsn, entry.payload);
//!     Ok::<_, wal::WalError>(())
//! })
//! .unwrap();
//! # let _ = lsn;
//! ```

use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod entry;
mod logger;
mod lsn;
mod replay;
mod segment;

pub use entry::{read_frame, Frame, LogEntry, PayloadType, HEADER_BYTES, MAX_RECORD_BYTES};
pub use logger::{DiskLogger, SyncHandle};
pub use lsn::Lsn;
pub use replay::{delete_segments_before, read_range, replay, ReplayOutcome};
pub use segment::{list_segments, parse_segment_name, segment_file_name, Segment, SEGMENT_EXTENSION};

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record that is not the tail of the log failed validation.
    #[error("corrupt log entry in {} at offset {offset}", path.display())]
    Corrupt { path: PathBuf, offset: u64 },

    /// The logger has been shut down (or its writer thread is gone).
    #[error("log is closed")]
    Closed,
}

#[cfg(test)]
mod tests;
