//! Disk index file names and the block-index footer.
//!
//! ## Footer (17 bytes, end of `blockindex.idx`)
//!
//! ```text
//! [total_keys: u64 LE][block_files: u32 LE][compressed: u8][magic: u32 LE = "BIX1"]
//! ```

use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Write;

/// Magic number closing every block index (ASCII "BIX1").
pub const BLOCK_INDEX_MAGIC: u32 = 0x4249_5831;

/// Footer size: 8 (`total_keys`) + 4 (`block_files`) + 1 (`compressed`) + 4 (`magic`).
pub const FOOTER_BYTES: usize = 8 + 4 + 1 + 4;

/// Name of the block index inside a disk index directory.
pub const BLOCK_INDEX_FILE: &str = "blockindex.idx";

/// Size of a block-index value: `[offset: u32][file_id: u16]`.
pub const BLOCK_POINTER_BYTES: usize = 4 + 2;

/// Name of the `n`-th block file inside a disk index directory.
pub fn block_file_name(n: u32) -> String {
    format!("blockfile_{n}.idx")
}

/// Parsed block-index footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub total_keys: u64,
    pub block_files: u32,
    pub compressed: bool,
}

impl Footer {
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u64::<LittleEndian>(self.total_keys)?;
        w.write_u32::<LittleEndian>(self.block_files)?;
        w.write_u8(u8::from(self.compressed))?;
        w.write_u32::<LittleEndian>(BLOCK_INDEX_MAGIC)?;
        Ok(())
    }

    /// Reads the footer from the tail of `buf`.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < FOOTER_BYTES {
            bail!("block index too small for footer ({} bytes)", buf.len());
        }
        let tail = &buf[buf.len() - FOOTER_BYTES..];
        let magic = LittleEndian::read_u32(&tail[13..17]);
        if magic != BLOCK_INDEX_MAGIC {
            bail!("unknown block index magic: {:#x}", magic);
        }
        let compressed = match tail[12] {
            0 => false,
            1 => true,
            other => bail!("invalid compression flag {other} in block index footer"),
        };
        Ok(Self {
            total_keys: LittleEndian::read_u64(&tail[0..8]),
            block_files: LittleEndian::read_u32(&tail[8..12]),
            compressed,
        })
    }
}

/// Encodes a block pointer value.
pub fn encode_pointer(offset: u32, file_id: u16) -> [u8; BLOCK_POINTER_BYTES] {
    let mut out = [0u8; BLOCK_POINTER_BYTES];
    LittleEndian::write_u32(&mut out[0..4], offset);
    LittleEndian::write_u16(&mut out[4..6], file_id);
    out
}

/// Decodes a block pointer value into `(offset, file_id)`.
pub fn decode_pointer(value: &[u8]) -> Result<(u32, u16)> {
    if value.len() != BLOCK_POINTER_BYTES {
        bail!("corrupt block pointer: {} bytes", value.len());
    }
    Ok((
        LittleEndian::read_u32(&value[0..4]),
        LittleEndian::read_u16(&value[4..6]),
    ))
}
