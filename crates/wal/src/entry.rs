//! Log entry framing.
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][view: u32 LE][seq: u64 LE][type: u8][payload]
//! ```
//!
//! `record_len` counts the CRC and everything after it, but not itself. The
//! CRC covers `view` through the end of the payload.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{self, Read};

use crate::{Lsn, WalError};

/// Fixed bytes in front of the payload: len + crc + view + seq + type.
pub const HEADER_BYTES: usize = 4 + 4 + 4 + 8 + 1;

/// Largest record accepted on read (64 MiB). Anything bigger is treated as
/// garbage.
pub const MAX_RECORD_BYTES: u32 = 64 * 1024 * 1024;

/// What a log entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    /// A serialized record group.
    Insert = 0,
    /// A persistent snapshot definition.
    SnapshotConfig = 1,
}

impl TryFrom<u8> for PayloadType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(PayloadType::Insert),
            1 => Ok(PayloadType::SnapshotConfig),
            other => Err(other),
        }
    }
}

/// A single entry of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub lsn: Lsn,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Serializes the entry into `buf` (cleared first).
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), WalError> {
        buf.clear();
        buf.extend_from_slice(&[0u8; 8]);
        buf.write_u32::<LittleEndian>(self.lsn.view)?;
        buf.write_u64::<LittleEndian>(self.lsn.seq)?;
        buf.write_u8(self.payload_type as u8)?;
        buf.extend_from_slice(&self.payload);

        let body = &buf[8..];
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        let record_len = body.len() as u64 + 4;
        if record_len > u64::from(MAX_RECORD_BYTES) {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "log entry too large",
            )));
        }
        buf[0..4].copy_from_slice(&(record_len as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Size of the encoded entry in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_BYTES + self.payload.len()
    }
}

/// Result of reading one frame from a segment.
#[derive(Debug)]
pub enum Frame {
    /// A complete, checksummed entry.
    Entry(LogEntry),
    /// Clean end of the segment.
    End,
    /// The segment ends inside this frame.
    Torn,
    /// The frame fails validation: bad length, CRC mismatch, or unknown
    /// payload type. `len` is the full frame length when the length prefix
    /// is usable, so the caller can tell whether data follows it.
    Damaged { len: Option<u64> },
}

/// Reads the next frame from `r`.
///
/// I/O errors other than an unexpected EOF are returned as `Err`. A frame
/// cut short by the end of the input is [`Frame::Torn`]; a frame that is
/// present but invalid is [`Frame::Damaged`]. Whether either one is a torn
/// tail or real corruption depends on what follows, which only the caller
/// knows.
pub fn read_frame<R: Read>(r: &mut R, body: &mut Vec<u8>) -> Result<Frame, WalError> {
    // A partial length prefix is a torn write, not a clean end.
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match r.read(&mut len_buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Torn),
    }
    let record_len = u32::from_le_bytes(len_buf);
    if record_len < 4 + 13 || record_len > MAX_RECORD_BYTES {
        return Ok(Frame::Damaged { len: None });
    }
    let frame_len = Some(4 + u64::from(record_len));

    let crc = match r.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Torn),
        Err(e) => return Err(e.into()),
    };

    body.clear();
    body.resize((record_len - 4) as usize, 0);
    match r.read_exact(body) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Torn),
        Err(e) => return Err(e.into()),
    }

    let mut hasher = Crc32::new();
    hasher.update(body);
    if hasher.finalize() != crc {
        return Ok(Frame::Damaged { len: frame_len });
    }

    let mut br = &body[..];
    let view = br.read_u32::<LittleEndian>()?;
    let seq = br.read_u64::<LittleEndian>()?;
    let Ok(payload_type) = PayloadType::try_from(br.read_u8()?) else {
        return Ok(Frame::Damaged { len: frame_len });
    };
    Ok(Frame::Entry(LogEntry {
        lsn: Lsn::new(view, seq),
        payload_type,
        payload: br.to_vec(),
    }))
}
