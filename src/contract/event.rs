/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Events appended to a block's log stream.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::codec::{type_read_all, type_write_all, Decode, Encode, SumReader, SumWriter, Value};
use crate::error::CodecError;
use crate::types::{Address, Amount};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A contract method was invoked. Result is a [MethodCallEvent].
    CallHistory = 1,
    /// Block rewards were minted. Result is a [RewardEvent].
    Reward = 2,
}

impl TryFrom<u8> for EventKind {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(EventKind::CallHistory),
            2 => Ok(EventKind::Reward),
            _ => Err(CodecError::InvalidTypeTag(tag)),
        }
    }
}

/// Event as it appears in receipts and in the block log. `index` is the position of the event in
/// the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub index: u16,
    pub kind: EventKind,
    pub result: Vec<u8>,
}

impl Encode for Event {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_u16(self.index)?;
        w.write_u8(self.kind as u8)?;
        w.write_bytes(&self.result)
    }
}

impl Decode for Event {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        let index = r.read_u16()?;
        let kind = EventKind::try_from(r.read_u8()?)?;
        let result = r.read_bytes()?;
        Ok(Self { index, kind, result })
    }
}

/// Record of one `Exec`: caller, callee, method and typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCallEvent {
    pub from: Address,
    pub to: Address,
    pub method: String,
    pub args: Vec<Value>,
}

impl Encode for MethodCallEvent {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write(&self.from)?;
        w.write(&self.to)?;
        w.write_string(&self.method)?;
        w.write_bytes(&type_write_all(&self.args)?)
    }
}

impl Decode for MethodCallEvent {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        let from = r.read()?;
        let to = r.read()?;
        let method = r.read_string()?;
        let args = type_read_all(&r.read_bytes()?)?;
        Ok(Self { from, to, method, args })
    }
}

/// Amounts minted by the reward hooks of one reward round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardEvent {
    pub height: u32,
    pub minted: BTreeMap<Address, Amount>,
}

impl RewardEvent {
    pub fn total(&self) -> Amount {
        self.minted.values().cloned().sum()
    }
}

impl Encode for RewardEvent {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_u32(self.height)?;
        w.write(&self.minted)
    }
}

impl Decode for RewardEvent {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self { height: r.read_u32()?, minted: r.read()? })
    }
}
