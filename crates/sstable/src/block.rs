//! Block encoding.
//!
//! ## Default block
//!
//! ```text
//! [count: u32]
//! [key offsets: (count + 1) x u32]     relative to the start of the keys area
//! [value offsets: (count + 1) x u32]   relative to the start of the values area
//! [keys][values]
//! [crc32: u32]                         over everything above
//! ```
//!
//! Offsets carry one extra entry so that entry `i` spans
//! `offsets[i]..offsets[i + 1]` without a separate length table.
//!
//! ## Compressed block
//!
//! ```text
//! [raw_len: u32][lz4 block of a default block body][crc32: u32]
//! ```
//!
//! The CRC covers `raw_len` and the compressed bytes.

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use memtable::Comparator;
use std::cmp::Ordering;

/// Upper bound accepted for a decompressed block (256 MiB). Prevents huge
/// allocations on corrupt headers.
const MAX_RAW_BLOCK_BYTES: usize = 256 * 1024 * 1024;

fn crc(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Serializes sorted `(key, value)` pairs into a default block body
/// (without checksum).
pub fn encode_body<K: AsRef<[u8]>, V: AsRef<[u8]>>(entries: &[(K, V)]) -> Vec<u8> {
    let count = entries.len();
    let keys_len: usize = entries.iter().map(|(k, _)| k.as_ref().len()).sum();
    let vals_len: usize = entries.iter().map(|(_, v)| v.as_ref().len()).sum();
    let mut out = Vec::with_capacity(4 + 8 * (count + 1) + keys_len + vals_len + 4);

    out.extend_from_slice(&(count as u32).to_le_bytes());
    let mut off = 0u32;
    out.extend_from_slice(&off.to_le_bytes());
    for (k, _) in entries {
        off += k.as_ref().len() as u32;
        out.extend_from_slice(&off.to_le_bytes());
    }
    let mut off = 0u32;
    out.extend_from_slice(&off.to_le_bytes());
    for (_, v) in entries {
        off += v.as_ref().len() as u32;
        out.extend_from_slice(&off.to_le_bytes());
    }
    for (k, _) in entries {
        out.extend_from_slice(k.as_ref());
    }
    for (_, v) in entries {
        out.extend_from_slice(v.as_ref());
    }
    out
}

/// Encodes a complete on-disk block, compressed or not.
pub fn encode_block<K: AsRef<[u8]>, V: AsRef<[u8]>>(entries: &[(K, V)], compressed: bool) -> Vec<u8> {
    let body = encode_body(entries);
    let mut out = if compressed {
        let packed = lz4_flex::block::compress(&body);
        let mut out = Vec::with_capacity(4 + packed.len() + 4);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&packed);
        out
    } else {
        body
    };
    let sum = crc(&out);
    out.extend_from_slice(&sum.to_le_bytes());
    out
}

/// Verifies the trailing checksum of an on-disk block and returns the bytes
/// it protects.
pub fn checked_payload(raw: &[u8]) -> Result<&[u8]> {
    if raw.len() < 4 {
        bail!("block too small: {} bytes", raw.len());
    }
    let (payload, tail) = raw.split_at(raw.len() - 4);
    let expected = LittleEndian::read_u32(tail);
    let actual = crc(payload);
    if expected != actual {
        bail!(
            "block CRC32 mismatch: expected {:#010x}, got {:#010x} (data corruption)",
            expected,
            actual
        );
    }
    Ok(payload)
}

/// Decompresses a verified compressed payload into a default block body.
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < 4 {
        bail!("compressed block too small");
    }
    let raw_len = LittleEndian::read_u32(&payload[0..4]) as usize;
    if raw_len > MAX_RAW_BLOCK_BYTES {
        bail!("corrupt block: raw length {raw_len} exceeds maximum {MAX_RAW_BLOCK_BYTES}");
    }
    lz4_flex::block::decompress(&payload[4..], raw_len).context("lz4 decompression failed")
}

/// Read-only view over a default block body.
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a> {
    body: &'a [u8],
    count: usize,
    keys_start: usize,
    vals_start: usize,
}

impl<'a> BlockView<'a> {
    /// Parses the header of `body` and checks that every offset lies inside it.
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        if body.len() < 4 {
            bail!("block body too small");
        }
        let count = LittleEndian::read_u32(&body[0..4]) as usize;
        let header = 4usize
            .checked_add(count.saturating_add(1).saturating_mul(8))
            .filter(|h| *h <= body.len())
            .context("corrupt block: offset table exceeds block")?;
        let mut view = Self {
            body,
            count,
            keys_start: header,
            vals_start: 0,
        };
        let keys_len = view.key_offset(count) as usize;
        view.vals_start = header + keys_len;
        let vals_len = view.val_offset(count) as usize;
        if view.vals_start + vals_len > body.len() {
            bail!("corrupt block: data exceeds block");
        }
        Ok(view)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn key_offset(&self, i: usize) -> u32 {
        let at = 4 + 4 * i;
        LittleEndian::read_u32(&self.body[at..at + 4])
    }

    fn val_offset(&self, i: usize) -> u32 {
        let at = 4 + 4 * (self.count + 1) + 4 * i;
        LittleEndian::read_u32(&self.body[at..at + 4])
    }

    /// Key at position `i`. Offsets that are out of order yield an empty
    /// slice instead of panicking.
    pub fn key(&self, i: usize) -> &'a [u8] {
        let (s, e) = (self.key_offset(i) as usize, self.key_offset(i + 1) as usize);
        self.body
            .get(self.keys_start + s..self.keys_start + e)
            .unwrap_or_default()
    }

    pub fn value(&self, i: usize) -> &'a [u8] {
        let (s, e) = (self.val_offset(i) as usize, self.val_offset(i + 1) as usize);
        self.body
            .get(self.vals_start + s..self.vals_start + e)
            .unwrap_or_default()
    }

    /// First position whose key is `>= key`.
    pub fn lower_bound(&self, key: &[u8], order: &dyn Comparator) -> usize {
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if order.compare(self.key(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Binary search for an exact key.
    pub fn find(&self, key: &[u8], order: &dyn Comparator) -> Option<usize> {
        let pos = self.lower_bound(key, order);
        (pos < self.count && order.compare(self.key(pos), key) == Ordering::Equal).then_some(pos)
    }
}
