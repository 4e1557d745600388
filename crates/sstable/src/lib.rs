//! # SSTable - immutable block-indexed disk index
//!
//! Every index of a database is backed by one immutable disk index: a
//! directory of memory-mapped block files plus a small block index. A disk
//! index is written once by a checkpoint (see [`DiskIndexWriter`]) and is
//! never modified afterwards, only replaced by the next one.
//!
//! ## Directory layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ blockfile_0.idx, blockfile_1.idx, ...                          │
//! │                                                               │
//! │ data blocks, back to back; each holds up to                   │
//! │ `max_entries_per_block` sorted entries and ends in a CRC32.   │
//! │ A new file starts when the next block would push a            │
//! │ non-empty file past `max_block_file_size`.                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ blockindex.idx                                                 │
//! │                                                               │
//! │ one default block: first key of every data block ->           │
//! │ offset (u32) | file_id (u16)                                  │
//! │ footer: total_keys (u64) | block_files (u32)                  │
//! │         compressed (u8) | magic (u32) "BIX1"                  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Block bodies are described in
//! [`block`]. With compression enabled every data block is stored
//! LZ4-compressed; the flag is recorded in the footer and must match on
//! open.

pub mod block;
mod format;
mod reader;
mod writer;

pub use format::{block_file_name, Footer, BLOCK_INDEX_FILE, BLOCK_INDEX_MAGIC, FOOTER_BYTES};
pub use reader::{DiskIndex, RangeIter};
pub use writer::{DiskIndexWriter, WriteSummary, WriterOptions};

#[cfg(test)]
mod tests;
