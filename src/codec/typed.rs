/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed mode: a self-describing encoding that prefixes every value with a one-byte [ValueKind] tag.
//!
//! Fixed-width values (hash, signature, address, public key) are written as length-prefixed byte strings
//! and their length is checked on read. Slices and typed arrays carry a `u8` element count, so at most
//! 255 elements can be encoded.

use std::io::{Read, Write};

use num_bigint::BigUint;

use super::sum::{SumReader, SumWriter};
use crate::error::CodecError;
use crate::types::{Address, Amount, Hash, PublicKey, Signature};

/// The closed set of typed-mode tags. It doubles as the argument kind in method descriptors.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
    Bytes = 5,
    String = 6,
    Bool = 7,
    Hash = 8,
    Signature = 9,
    Address = 10,
    PublicKey = 11,
    Amount = 12,
    BigInt = 13,
    Slice = 14,
    AddressArray = 15,
    AmountArray = 16,
}

impl TryFrom<u8> for ValueKind {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => ValueKind::U8,
            2 => ValueKind::U16,
            3 => ValueKind::U32,
            4 => ValueKind::U64,
            5 => ValueKind::Bytes,
            6 => ValueKind::String,
            7 => ValueKind::Bool,
            8 => ValueKind::Hash,
            9 => ValueKind::Signature,
            10 => ValueKind::Address,
            11 => ValueKind::PublicKey,
            12 => ValueKind::Amount,
            13 => ValueKind::BigInt,
            14 => ValueKind::Slice,
            15 => ValueKind::AddressArray,
            16 => ValueKind::AmountArray,
            _ => return Err(CodecError::InvalidTypeTag(tag)),
        })
    }
}

/// A dynamically typed value of a method argument list or result list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
    String(String),
    Bool(bool),
    Hash(Hash),
    Signature(Signature),
    Address(Address),
    PublicKey(PublicKey),
    Amount(Amount),
    /// Non-negative big integer. Only the magnitude is carried on the wire.
    BigInt(BigUint),
    Slice(Vec<Value>),
    AddressArray(Vec<Address>),
    AmountArray(Vec<Amount>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::U8(_) => ValueKind::U8,
            Value::U16(_) => ValueKind::U16,
            Value::U32(_) => ValueKind::U32,
            Value::U64(_) => ValueKind::U64,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::String(_) => ValueKind::String,
            Value::Bool(_) => ValueKind::Bool,
            Value::Hash(_) => ValueKind::Hash,
            Value::Signature(_) => ValueKind::Signature,
            Value::Address(_) => ValueKind::Address,
            Value::PublicKey(_) => ValueKind::PublicKey,
            Value::Amount(_) => ValueKind::Amount,
            Value::BigInt(_) => ValueKind::BigInt,
            Value::Slice(_) => ValueKind::Slice,
            Value::AddressArray(_) => ValueKind::AddressArray,
            Value::AmountArray(_) => ValueKind::AmountArray,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<Hash> {
        match self {
            Value::Hash(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_amount(&self) -> Option<&Amount> {
        match self {
            Value::Amount(a) => Some(a),
            _ => None,
        }
    }

    /// Any unsigned integer variant widened to u64.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(v) => Some(*v as u64),
            Value::U16(v) => Some(*v as u64),
            Value::U32(v) => Some(*v as u64),
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_address_array(&self) -> Option<&[Address]> {
        match self {
            Value::AddressArray(a) => Some(a),
            _ => None,
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Hash> for Value {
    fn from(v: Hash) -> Self {
        Value::Hash(v)
    }
}

impl From<Address> for Value {
    fn from(v: Address) -> Self {
        Value::Address(v)
    }
}

impl From<Amount> for Value {
    fn from(v: Amount) -> Self {
        Value::Amount(v)
    }
}

impl From<Vec<Address>> for Value {
    fn from(v: Vec<Address>) -> Self {
        Value::AddressArray(v)
    }
}

impl From<Vec<Amount>> for Value {
    fn from(v: Vec<Amount>) -> Self {
        Value::AmountArray(v)
    }
}

fn write_count<W: Write>(w: &mut SumWriter<W>, len: usize) -> Result<(), CodecError> {
    let count = u8::try_from(len).map_err(|_| CodecError::SliceTooLong(len))?;
    w.write_u8(count)
}

fn read_fixed<R: Read, const N: usize>(r: &mut SumReader<R>) -> Result<[u8; N], CodecError> {
    let bytes = r.read_bytes()?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CodecError::InvalidFixedLength { expected: N, actual })
}

/// Writes one tagged value.
pub fn type_write<W: Write>(w: &mut SumWriter<W>, value: &Value) -> Result<(), CodecError> {
    w.write_u8(value.kind() as u8)?;
    match value {
        Value::U8(v) => w.write_u8(*v),
        Value::U16(v) => w.write_u16(*v),
        Value::U32(v) => w.write_u32(*v),
        Value::U64(v) => w.write_u64(*v),
        Value::Bytes(v) => w.write_bytes(v),
        Value::String(v) => w.write_string(v),
        Value::Bool(v) => w.write_bool(*v),
        Value::Hash(v) => w.write_bytes(&v.0),
        Value::Signature(v) => w.write_bytes(&v.0),
        Value::Address(v) => w.write_bytes(&v.0),
        Value::PublicKey(v) => w.write_bytes(&v.0),
        Value::Amount(v) => w.write_amount(v),
        Value::BigInt(v) => w.write_bytes(&Amount::from_big(v.clone()).to_bytes()),
        Value::Slice(items) => {
            write_count(w, items.len())?;
            items.iter().try_for_each(|item| type_write(w, item))
        }
        Value::AddressArray(items) => {
            write_count(w, items.len())?;
            items.iter().try_for_each(|a| w.write_fixed(&a.0))
        }
        Value::AmountArray(items) => {
            write_count(w, items.len())?;
            items.iter().try_for_each(|a| w.write_amount(a))
        }
    }
}

/// Deepest slice nesting accepted on read.
pub const MAX_NESTING: usize = 16;

/// Reads one tagged value.
pub fn type_read<R: Read>(r: &mut SumReader<R>) -> Result<Value, CodecError> {
    read_nested(r, 0)
}

fn read_nested<R: Read>(r: &mut SumReader<R>, depth: usize) -> Result<Value, CodecError> {
    let kind = ValueKind::try_from(r.read_u8()?)?;
    Ok(match kind {
        ValueKind::U8 => Value::U8(r.read_u8()?),
        ValueKind::U16 => Value::U16(r.read_u16()?),
        ValueKind::U32 => Value::U32(r.read_u32()?),
        ValueKind::U64 => Value::U64(r.read_u64()?),
        ValueKind::Bytes => Value::Bytes(r.read_bytes()?),
        ValueKind::String => Value::String(r.read_string()?),
        ValueKind::Bool => Value::Bool(r.read_bool()?),
        ValueKind::Hash => Value::Hash(Hash(read_fixed(r)?)),
        ValueKind::Signature => Value::Signature(Signature(read_fixed(r)?)),
        ValueKind::Address => Value::Address(Address(read_fixed(r)?)),
        ValueKind::PublicKey => Value::PublicKey(PublicKey(read_fixed(r)?)),
        ValueKind::Amount => Value::Amount(r.read_amount()?),
        ValueKind::BigInt => Value::BigInt(BigUint::from_bytes_be(&r.read_bytes()?)),
        ValueKind::Slice => {
            if depth >= MAX_NESTING {
                return Err(CodecError::NestingTooDeep(MAX_NESTING));
            }
            let count = r.read_u8()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_nested(r, depth + 1)?);
            }
            Value::Slice(items)
        }
        ValueKind::AddressArray => {
            let count = r.read_u8()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(Address(r.read_array()?));
            }
            Value::AddressArray(items)
        }
        ValueKind::AmountArray => {
            let count = r.read_u8()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(r.read_amount()?);
            }
            Value::AmountArray(items)
        }
    })
}

/// Encodes a value list back to back.
pub fn type_write_all(values: &[Value]) -> Result<Vec<u8>, CodecError> {
    let mut w = SumWriter::new(Vec::new());
    for value in values {
        type_write(&mut w, value)?;
    }
    Ok(w.into_inner())
}

/// Decodes tagged values until the input is exhausted.
pub fn type_read_all(bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
    let mut r = SumReader::new(bytes);
    let mut values = Vec::new();
    while r.remaining() > 0 {
        values.push(type_read(&mut r)?);
    }
    Ok(values)
}
