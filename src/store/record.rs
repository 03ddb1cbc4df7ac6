/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Record grammar of the append-only log.
//!
//! ```text
//! record    := tag byte + payload
//! tag=0x01  := SET    ; payload = u32-le key-len, key, u32-le val-len, val
//! tag=0x02  := DEL    ; payload = u32-le key-len, key
//! tag=0x03  := FLUSH  ; no payload
//! tag=0x04  := TX_END ; no payload, terminates a batch
//! ```

use std::io::{Read, Write};

use crate::codec::{SumReader, SumWriter};
use crate::error::{CodecError, StoreError};

use super::Tree;

pub(crate) const TAG_SET: u8 = 0x01;
pub(crate) const TAG_DEL: u8 = 0x02;
pub(crate) const TAG_FLUSH: u8 = 0x03;
pub(crate) const TAG_TX_END: u8 = 0x04;

/// One mutation of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    Set(Vec<u8>, Vec<u8>),
    Del(Vec<u8>),
    Flush,
}

impl Record {
    pub fn write<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        match self {
            Record::Set(key, value) => {
                w.write_u8(TAG_SET)?;
                write_blob(w, key)?;
                write_blob(w, value)
            }
            Record::Del(key) => {
                w.write_u8(TAG_DEL)?;
                write_blob(w, key)
            }
            Record::Flush => w.write_u8(TAG_FLUSH),
        }
    }

    /// Applies the record to an in-memory tree.
    pub fn apply(self, tree: &mut Tree) {
        match self {
            Record::Set(key, value) => {
                tree.insert(key, value);
            }
            Record::Del(key) => {
                tree.remove(&key);
            }
            Record::Flush => tree.clear(),
        }
    }
}

fn write_blob<W: Write>(w: &mut SumWriter<W>, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(bytes.len()).map_err(|_| CodecError::InvalidLength)?;
    w.write_u32(len)?;
    w.write_fixed(bytes)
}

fn read_blob<R: Read>(r: &mut SumReader<R>) -> Result<Vec<u8>, CodecError> {
    let len = r.read_u32()? as usize;
    r.read_vec(len)
}

/// Encodes a batch of records terminated by `TX_END`.
pub(crate) fn encode_batch<'a, I>(records: I) -> Result<Vec<u8>, CodecError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut w = SumWriter::new(Vec::new());
    for record in records {
        record.write(&mut w)?;
    }
    w.write_u8(TAG_TX_END)?;
    Ok(w.into_inner())
}

/// Result of replaying a log.
pub(crate) struct Replay {
    pub tree: Tree,
    /// Offset just past the last `TX_END`. Everything after it is a torn batch.
    pub valid_len: u64,
    pub batches: u64,
}

/// Replays a log. Batches are applied only once their `TX_END` is seen; a short read stops the
/// replay at the last complete batch. An unknown tag is fatal.
pub(crate) fn replay<R: Read>(reader: R) -> Result<Replay, StoreError> {
    let mut r = SumReader::new(reader);
    let mut tree = Tree::new();
    let mut pending = Vec::new();
    let mut valid_len = 0;
    let mut batches = 0;

    loop {
        match read_record(&mut r) {
            Ok(Some(record)) => pending.push(record),
            Ok(None) => {
                for record in pending.drain(..) {
                    record.apply(&mut tree);
                }
                valid_len = r.read_count();
                batches += 1;
            }
            Err(StoreError::Codec(CodecError::InvalidLength)) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(Replay { tree, valid_len, batches })
}

/// Reads one record. `Ok(None)` is a `TX_END`.
fn read_record<R: Read>(r: &mut SumReader<R>) -> Result<Option<Record>, StoreError> {
    let tag = r.read_u8()?;
    let record = match tag {
        TAG_SET => {
            let key = read_blob(r)?;
            let value = read_blob(r)?;
            Record::Set(key, value)
        }
        TAG_DEL => Record::Del(read_blob(r)?),
        TAG_FLUSH => Record::Flush,
        TAG_TX_END => return Ok(None),
        _ => return Err(StoreError::InvalidDatabase(tag)),
    };
    Ok(Some(record))
}
