/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks, transactions and the receipts produced by applying them.

use std::io::{Read, Write};

use crate::codec::{read_list, type_read_all, type_write_all, write_list, Decode, Encode, SumReader, SumWriter, Value};
use crate::contract::event::Event;
use crate::error::CodecError;
use crate::types::{keccak256, Address, Amount, Hash, Signature};

/// Block header. Fields are encoded in declaration order. `chain_id` goes on the wire as a big-int.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub chain_id: u64,
    pub version: u16,
    pub height: u32,
    pub prev_hash: Hash,
    pub context_hash: Hash,
    /// Number of ranks skipped because they failed to produce in time.
    pub timeout_count: u32,
    pub timestamp: u64,
    pub generator: Address,
    pub generator_signature: Signature,
    pub body_hash: Hash,
}

impl Header {
    fn encode_fields<W: Write>(&self, w: &mut SumWriter<W>, with_signature: bool) -> Result<(), CodecError> {
        w.write_big_u64(self.chain_id)?;
        w.write_u16(self.version)?;
        w.write_u32(self.height)?;
        w.write(&self.prev_hash)?;
        w.write(&self.context_hash)?;
        w.write_u32(self.timeout_count)?;
        w.write_u64(self.timestamp)?;
        w.write(&self.generator)?;
        if with_signature {
            w.write(&self.generator_signature)?;
        }
        w.write(&self.body_hash)
    }

    /// Keccak of the header without the generator signature. This is what the generator signs and what
    /// the next block points to.
    pub fn hash(&self) -> Result<Hash, CodecError> {
        let mut w = SumWriter::new(Vec::new());
        self.encode_fields(&mut w, false)?;
        Ok(keccak256(&w.into_inner()))
    }
}

impl Encode for Header {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        self.encode_fields(w, true)
    }
}

impl Decode for Header {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self {
            chain_id: r.read_big_u64()?,
            version: r.read_u16()?,
            height: r.read_u32()?,
            prev_hash: r.read()?,
            context_hash: r.read()?,
            timeout_count: r.read_u32()?,
            timestamp: r.read_u64()?,
            generator: r.read()?,
            generator_signature: r.read()?,
            body_hash: r.read()?,
        })
    }
}

/// A call of a contract method. `to == Address::ZERO` addresses the chain's own admin methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub chain_id: u64,
    /// Milliseconds.
    pub timestamp: u64,
    pub seq: u64,
    pub to: Address,
    pub method: String,
    pub args: Vec<Value>,
    /// Replay protection by account sequence instead of by hash and time window.
    pub use_seq: bool,
    pub is_ether_type: bool,
    pub vm_type: u8,
    pub gas_price: Amount,
}

impl Transaction {
    pub fn hash(&self) -> Result<Hash, CodecError> {
        Ok(keccak256(&self.to_bytes()?))
    }
}

impl Encode for Transaction {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_big_u64(self.chain_id)?;
        w.write_u64(self.timestamp)?;
        w.write_u64(self.seq)?;
        w.write(&self.to)?;
        w.write_string(&self.method)?;
        w.write_bytes(&type_write_all(&self.args)?)?;
        w.write_bool(self.use_seq)?;
        w.write_bool(self.is_ether_type)?;
        w.write_u8(self.vm_type)?;
        w.write_amount(&self.gas_price)
    }
}

impl Decode for Transaction {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self {
            chain_id: r.read_big_u64()?,
            timestamp: r.read_u64()?,
            seq: r.read_u64()?,
            to: r.read()?,
            method: r.read_string()?,
            args: type_read_all(&r.read_bytes()?)?,
            use_seq: r.read_bool()?,
            is_ether_type: r.read_bool()?,
            vm_type: r.read_u8()?,
            gas_price: r.read_amount()?,
        })
    }
}

/// A transaction with its signer. The signature is carried as is; signer recovery happens before a
/// transaction reaches the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedTx {
    pub tx: Transaction,
    pub signer: Address,
    pub signature: Signature,
}

impl SignedTx {
    pub fn new(tx: Transaction, signer: Address) -> Self {
        Self { tx, signer, signature: Signature::default() }
    }

    /// Identity used for replay protection: the transaction hash bound to its signer.
    pub fn hash(&self) -> Result<Hash, CodecError> {
        let mut w = SumWriter::new(Vec::new());
        w.write(&self.tx.hash()?)?;
        w.write(&self.signer)?;
        Ok(keccak256(&w.into_inner()))
    }
}

impl Encode for SignedTx {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write(&self.tx)?;
        w.write(&self.signer)?;
        w.write(&self.signature)
    }
}

impl Decode for SignedTx {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self { tx: r.read()?, signer: r.read()?, signature: r.read()? })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub body: Vec<SignedTx>,
}

impl Block {
    /// Keccak of the encoded transaction list.
    pub fn body_hash(body: &[SignedTx]) -> Result<Hash, CodecError> {
        let mut w = SumWriter::new(Vec::new());
        write_list(&mut w, body)?;
        Ok(keccak256(&w.into_inner()))
    }
}

impl Encode for Block {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write(&self.header)?;
        write_list(w, &self.body)
    }
}

impl Decode for Block {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self { header: r.read()?, body: read_list(r)? })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    /// Rejected before execution: bad sequence, replay, stale timestamp or unpaid fee.
    Rejected = 1,
    /// Execution returned an error. Its state changes were discarded.
    Failed = 2,
}

/// Outcome of one transaction of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_index: u32,
    pub tx_hash: Hash,
    pub status: ExitStatus,
    pub returns: Vec<Value>,
    /// Events of the fee charge and, if it succeeded, of the execution. Empty for a rejected transaction.
    pub events: Vec<Event>,
    pub error: Option<String>,
}

/// What subscribers receive for every applied block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLog {
    pub height: u32,
    pub hash: Hash,
    pub receipts: Vec<Receipt>,
    /// Every event of the block in emission order, including reward events.
    pub events: Vec<Event>,
}
