//! Record groups, the unit of atomic modification.
//!
//! ```text
//! [database_id: u32][count: u32]
//! count x [index_id: u32][key_len: u32][key][present: u8]([value_len: u32][value])?
//! ```
//!
//! All integers little endian. `present = 0` marks a delete.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

use crate::error::{EngineError, Result};

/// One insert or delete against one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index_id: u32,
    pub key: Vec<u8>,
    /// `None` deletes the key.
    pub value: Option<Vec<u8>>,
}

/// Modifications to one or more indices of one database, applied together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordGroup {
    pub database_id: u32,
    pub records: Vec<Record>,
}

impl RecordGroup {
    pub fn new(database_id: u32) -> Self {
        Self {
            database_id,
            records: Vec::new(),
        }
    }

    pub fn insert(&mut self, index_id: u32, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.records.push(Record {
            index_id,
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn delete(&mut self, index_id: u32, key: impl Into<Vec<u8>>) -> &mut Self {
        self.records.push(Record {
            index_id,
            key: key.into(),
            value: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Size of the serialized group in bytes.
    pub fn encoded_len(&self) -> usize {
        8 + self
            .records
            .iter()
            .map(|r| 4 + 4 + r.key.len() + 1 + r.value.as_ref().map_or(0, |v| 4 + v.len()))
            .sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        // writes into a Vec cannot fail
        let _ = self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u32::<LittleEndian>(self.database_id)?;
        buf.write_u32::<LittleEndian>(self.records.len() as u32)?;
        for r in &self.records {
            buf.write_u32::<LittleEndian>(r.index_id)?;
            buf.write_u32::<LittleEndian>(r.key.len() as u32)?;
            buf.extend_from_slice(&r.key);
            match &r.value {
                Some(v) => {
                    buf.write_u8(1)?;
                    buf.write_u32::<LittleEndian>(v.len() as u32)?;
                    buf.extend_from_slice(v);
                }
                None => buf.write_u8(0)?,
            }
        }
        Ok(())
    }

    /// Parses a serialized group. Any malformed input is
    /// [`EngineError::CorruptEntry`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| EngineError::CorruptEntry(format!("record group: {what}"));
        let mut rdr = payload;

        let database_id = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated header"))?;
        let count = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated header"))?;

        // each record needs at least 9 bytes
        if count as usize > rdr.len() / 9 {
            return Err(corrupt("record count exceeds payload"));
        }
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let index_id = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated record"))?;
            let key = read_bytes(&mut rdr).ok_or_else(|| corrupt("truncated key"))?;
            let value = match rdr.read_u8().map_err(|_| corrupt("truncated record"))? {
                0 => None,
                1 => Some(read_bytes(&mut rdr).ok_or_else(|| corrupt("truncated value"))?),
                other => return Err(corrupt(&format!("bad presence flag {other}"))),
            };
            records.push(Record { index_id, key, value });
        }
        if !rdr.is_empty() {
            return Err(corrupt("trailing bytes"));
        }
        Ok(Self {
            database_id,
            records,
        })
    }
}

fn read_bytes(rdr: &mut &[u8]) -> Option<Vec<u8>> {
    let len = rdr.read_u32::<LittleEndian>().ok()? as usize;
    if len > rdr.len() {
        return None;
    }
    let mut out = vec![0u8; len];
    rdr.read_exact(&mut out).ok()?;
    Some(out)
}
