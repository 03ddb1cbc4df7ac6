/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Sum mode: readers and writers that accumulate a running byte count.
//!
//! ```text
//! u8/u16/u32/u64  little-endian, fixed width
//! bool            one byte, 0 or 1
//! bytes           len < 254      : [len as u8] ++ bytes
//!                 len < 65536    : [254] ++ len as u16 ++ bytes
//!                 otherwise      : [255] ++ len as u32 ++ bytes
//! string          UTF-8 bytes under the bytes prefix
//! amount          big-endian magnitude under the bytes prefix (zero is empty)
//! big u64         a u64 written like an amount; wider magnitudes are rejected on read
//! address, hash   raw fixed-width bytes, no prefix
//! ```

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::CodecError;
use crate::types::{Address, Amount, Hash, PublicKey, Signature};

/// Upper bound on the buffer reserved ahead of a length-prefixed read.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Writer that counts the bytes written through it.
pub struct SumWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> SumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes raw bytes without any prefix.
    pub fn write_fixed(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.write_fixed(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), CodecError> {
        self.write_fixed(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.write_fixed(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), CodecError> {
        self.write_fixed(&v.to_le_bytes())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), CodecError> {
        self.write_u8(v as u8)
    }

    /// Writes a byte string under the compact length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = bytes.len();
        if len < 254 {
            self.write_u8(len as u8)?;
        } else if len < 65536 {
            self.write_u8(254)?;
            self.write_u16(len as u16)?;
        } else {
            let len = u32::try_from(len).map_err(|_| CodecError::InvalidLength)?;
            self.write_u8(255)?;
            self.write_u32(len)?;
        }
        self.write_fixed(bytes)
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_bytes(s.as_bytes())
    }

    pub fn write_amount(&mut self, amount: &Amount) -> Result<(), CodecError> {
        self.write_bytes(&amount.to_bytes())
    }

    /// Writes a u64 in big-int form.
    pub fn write_big_u64(&mut self, v: u64) -> Result<(), CodecError> {
        self.write_amount(&Amount::from_raw(v))
    }

    pub fn write<T: Encode + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.encode(self)
    }
}

/// Reader that counts the bytes read through it and reports short reads as [CodecError::InvalidLength].
pub struct SumReader<R: Read> {
    inner: R,
    read: u64,
}

impl<R: Read> SumReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, read: 0 }
    }

    /// Number of bytes read so far.
    pub fn read_count(&self) -> u64 {
        self.read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fills `buf` completely. Partial reads are retried; a zero-byte read with bytes still
    /// outstanding is a short read.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(CodecError::InvalidLength),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.read += buf.len() as u64;
        Ok(())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut buf = [0u8; N];
        self.read_full(&mut buf)?;
        Ok(buf)
    }

    /// Reads exactly `len` bytes. The length comes from untrusted input, so the buffer grows with the
    /// bytes actually read instead of being allocated up front.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(CodecError::InvalidLength);
        }
        self.read += len as u64;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(CodecError::InvalidBool(b)),
        }
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = match self.read_u8()? {
            254 => self.read_u16()? as usize,
            255 => self.read_u32()? as usize,
            n => n as usize,
        };
        self.read_vec(len)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        String::from_utf8(self.read_bytes()?).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_amount(&mut self) -> Result<Amount, CodecError> {
        Ok(Amount::from_bytes(&self.read_bytes()?))
    }

    /// Reads a big-int that must fit in a u64.
    pub fn read_big_u64(&mut self) -> Result<u64, CodecError> {
        let amount = self.read_amount()?;
        amount.to_u64().ok_or(CodecError::IntegerOverflow)
    }

    pub fn read<T: Decode>(&mut self) -> Result<T, CodecError> {
        T::decode(self)
    }
}

impl SumReader<&[u8]> {
    /// Bytes not yet consumed from the underlying slice.
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }
}

/// Canonical sum-mode encoding of a type.
pub trait Encode {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError>;

    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = SumWriter::new(Vec::new());
        self.encode(&mut w)?;
        Ok(w.into_inner())
    }
}

/// Canonical sum-mode decoding of a type.
pub trait Decode: Sized {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = SumReader::new(bytes);
        Self::decode(&mut r)
    }
}

macro_rules! int_codec {
    ($t:ty, $w:ident, $r:ident) => {
        impl Encode for $t {
            fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
                w.$w(*self)
            }
        }
        impl Decode for $t {
            fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
                r.$r()
            }
        }
    };
}

int_codec!(u8, write_u8, read_u8);
int_codec!(u16, write_u16, read_u16);
int_codec!(u32, write_u32, read_u32);
int_codec!(u64, write_u64, read_u64);
int_codec!(bool, write_bool, read_bool);

impl Encode for [u8] {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_bytes(self)
    }
}

impl Encode for Vec<u8> {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_bytes(self)
    }
}

impl Decode for Vec<u8> {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        r.read_bytes()
    }
}

impl Encode for str {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_string(self)
    }
}

impl Encode for String {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_string(self)
    }
}

impl Decode for String {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        r.read_string()
    }
}

impl Encode for Amount {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_amount(self)
    }
}

impl Decode for Amount {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        r.read_amount()
    }
}

macro_rules! fixed_codec {
    ($t:ty) => {
        impl Encode for $t {
            fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
                w.write_fixed(&self.0)
            }
        }
        impl Decode for $t {
            fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
                Ok(Self(r.read_array()?))
            }
        }
    };
}

fixed_codec!(Address);
fixed_codec!(Hash);
fixed_codec!(Signature);
fixed_codec!(PublicKey);

/// Writes a list with a u32 element count.
pub fn write_list<W: Write, T: Encode>(w: &mut SumWriter<W>, items: &[T]) -> Result<(), CodecError> {
    let len = u32::try_from(items.len()).map_err(|_| CodecError::InvalidLength)?;
    w.write_u32(len)?;
    for item in items {
        item.encode(w)?;
    }
    Ok(())
}

/// Reads a list written by [write_list].
pub fn read_list<R: Read, T: Decode>(r: &mut SumReader<R>) -> Result<Vec<T>, CodecError> {
    let len = r.read_u32()? as usize;
    // the count comes from untrusted bytes, so the capacity is capped
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        items.push(T::decode(r)?);
    }
    Ok(items)
}

/// Maps are written as a u32 entry count followed by the entries in key order.
impl<K: Encode + Ord, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        let len = u32::try_from(self.len()).map_err(|_| CodecError::InvalidLength)?;
        w.write_u32(len)?;
        for (k, v) in self {
            k.encode(w)?;
            v.encode(w)?;
        }
        Ok(())
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        let len = r.read_u32()?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let k = K::decode(r)?;
            map.insert(k, V::decode(r)?);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A reader that hands out at most one byte per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn length_prefix_boundaries() {
        for (len, prefix) in [(0usize, 1usize), (253, 1), (254, 3), (65535, 3), (65536, 5)] {
            let data = vec![0xabu8; len];
            let bytes = data.to_bytes().unwrap();
            assert_eq!(bytes.len(), len + prefix, "len {}", len);
            assert_eq!(Vec::<u8>::from_bytes(&bytes).unwrap(), data);
        }
        assert_eq!(vec![1u8; 254].to_bytes().unwrap()[..3], [254, 254, 0]);
    }

    #[test]
    fn primitives_are_little_endian() {
        let mut w = SumWriter::new(Vec::new());
        w.write_u16(0x0102).unwrap();
        w.write_u32(0x03040506).unwrap();
        w.write_u64(7).unwrap();
        w.write_bool(true).unwrap();
        assert_eq!(w.written(), 15);
        let bytes = w.into_inner();
        assert_eq!(bytes[..6], [0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);

        let mut r = SumReader::new(bytes.as_slice());
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert_eq!(r.read_u32().unwrap(), 0x03040506);
        assert_eq!(r.read_u64().unwrap(), 7);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_count(), 15);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn short_read_is_invalid_length() {
        let bytes = 42u64.to_bytes().unwrap();
        let mut r = SumReader::new(&bytes[..5]);
        assert!(matches!(r.read_u64(), Err(CodecError::InvalidLength)));

        let mut r = SumReader::new([10u8, 1, 2].as_slice());
        assert!(matches!(r.read_bytes(), Err(CodecError::InvalidLength)));
    }

    #[test]
    fn huge_length_prefix_fails_without_allocating() {
        // declares 4 GiB - 1 bytes but carries three
        let bytes = [255u8, 0xff, 0xff, 0xff, 0xff, 1, 2, 3];
        let mut r = SumReader::new(bytes.as_slice());
        assert!(matches!(r.read_bytes(), Err(CodecError::InvalidLength)));

        let mut r = SumReader::new(Trickle(&bytes));
        assert!(matches!(r.read_bytes(), Err(CodecError::InvalidLength)));
    }

    #[test]
    fn partial_reads_are_retried() {
        let bytes = "formulator".to_string().to_bytes().unwrap();
        let mut r = SumReader::new(Trickle(&bytes));
        assert_eq!(r.read_string().unwrap(), "formulator");
    }

    #[test]
    fn big_u64_is_length_prefixed_magnitude() {
        let mut w = SumWriter::new(Vec::new());
        w.write_big_u64(0).unwrap();
        w.write_big_u64(7).unwrap();
        w.write_big_u64(0x0102_0304).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes, vec![0, 1, 7, 4, 1, 2, 3, 4]);

        let mut r = SumReader::new(bytes.as_slice());
        assert_eq!(r.read_big_u64().unwrap(), 0);
        assert_eq!(r.read_big_u64().unwrap(), 7);
        assert_eq!(r.read_big_u64().unwrap(), 0x0102_0304);

        let wide = [9u8, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut r = SumReader::new(wide.as_slice());
        assert!(matches!(r.read_big_u64(), Err(CodecError::IntegerOverflow)));
    }

    #[test]
    fn invalid_bool() {
        assert!(matches!(bool::from_bytes(&[2]), Err(CodecError::InvalidBool(2))));
    }

    #[test]
    fn amount_and_fixed_values() {
        let amount = Amount::coin(1_900_000_000);
        assert_eq!(Amount::from_bytes(&amount.to_bytes()), amount);
        assert_eq!(Amount::zero().to_bytes().len(), 0);
        assert_eq!(<Amount as Encode>::to_bytes(&Amount::zero()).unwrap(), vec![0u8]);

        let addr = Address([9u8; 20]);
        let bytes = addr.to_bytes().unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(Address::from_bytes(&bytes).unwrap(), addr);
    }

    #[test]
    fn list_round_trip() {
        let items = vec![Address([1u8; 20]), Address([2u8; 20])];
        let mut w = SumWriter::new(Vec::new());
        write_list(&mut w, &items).unwrap();
        let bytes = w.into_inner();
        let mut r = SumReader::new(bytes.as_slice());
        assert_eq!(read_list::<_, Address>(&mut r).unwrap(), items);
    }

    #[test]
    fn map_entries_are_key_ordered() {
        let mut map = BTreeMap::new();
        map.insert(Address([2u8; 20]), Amount::coin(2));
        map.insert(Address([1u8; 20]), Amount::coin(1));
        let bytes = map.to_bytes().unwrap();
        assert_eq!(bytes[..4], 2u32.to_le_bytes());
        assert_eq!(bytes[4..24], [1u8; 20]);
        assert_eq!(BTreeMap::<Address, Amount>::from_bytes(&bytes).unwrap(), map);
    }
}
