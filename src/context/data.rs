/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! One layer of a [Context](super::Context).
//!
//! Every map holds the deltas written while the layer was on top. `None` values are deletions, so a
//! layer can shadow data that exists below it. Events are carried by the layer that emitted them but
//! are not part of the layer hash.

use std::collections::BTreeMap;
use std::io::Write;

use crate::codec::{Encode, SumWriter};
use crate::contract::event::Event;
use crate::error::CodecError;
use crate::types::{keccak256, Address, Hash, PublicHash};

/// Key of a contract or account data entry: owning address plus contract-defined key bytes.
pub type DataKey = (Address, Vec<u8>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextData {
    pub contract_data: BTreeMap<DataKey, Option<Vec<u8>>>,
    pub account_data: BTreeMap<DataKey, Option<Vec<u8>>>,
    /// Per-account transaction sequence.
    pub account_seqs: BTreeMap<Address, u64>,
    /// The context-wide generation sequence behind `NextSeq`.
    pub seq: Option<u64>,
    pub admins: BTreeMap<Address, bool>,
    /// Generators with their public hash. `None` marks a removed generator.
    pub generators: BTreeMap<Address, Option<PublicHash>>,
    pub main_token: Option<Address>,
    /// Hashes of non-sequenced transactions seen, with the timestamp they carried.
    pub tx_hashes: BTreeMap<Hash, u64>,
    pub events: Vec<Event>,
}

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a child layer into this one. Entries of the child win.
    pub fn fold(&mut self, child: ContextData) {
        self.contract_data.extend(child.contract_data);
        self.account_data.extend(child.account_data);
        self.account_seqs.extend(child.account_seqs);
        if child.seq.is_some() {
            self.seq = child.seq;
        }
        self.admins.extend(child.admins);
        self.generators.extend(child.generators);
        if child.main_token.is_some() {
            self.main_token = child.main_token;
        }
        self.tx_hashes.extend(child.tx_hashes);
        self.events.extend(child.events);
    }

    pub fn is_empty(&self) -> bool {
        *self == ContextData::default()
    }

    /// Generators registered in this layer.
    pub fn created_generators(&self) -> Vec<(Address, PublicHash)> {
        self.generators
            .iter()
            .filter_map(|(addr, ph)| ph.map(|ph| (*addr, ph)))
            .collect()
    }

    /// Generators removed in this layer.
    pub fn deleted_generators(&self) -> Vec<Address> {
        self.generators
            .iter()
            .filter(|(_, ph)| ph.is_none())
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Canonical encoding of the layer: block environment, then every map in key order. Events are
    /// excluded.
    pub fn encode_canonical<W: Write>(&self, env: &BlockEnv, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        env.encode(w)?;
        write_data_map(w, &self.contract_data)?;
        write_data_map(w, &self.account_data)?;

        write_len(w, self.account_seqs.len())?;
        for (addr, seq) in &self.account_seqs {
            w.write(addr)?;
            w.write_u64(*seq)?;
        }

        match self.seq {
            Some(seq) => {
                w.write_bool(true)?;
                w.write_u64(seq)?;
            }
            None => w.write_bool(false)?,
        }

        write_len(w, self.admins.len())?;
        for (addr, is_admin) in &self.admins {
            w.write(addr)?;
            w.write_bool(*is_admin)?;
        }

        write_len(w, self.generators.len())?;
        for (addr, ph) in &self.generators {
            w.write(addr)?;
            match ph {
                Some(ph) => {
                    w.write_bool(true)?;
                    w.write(ph)?;
                }
                None => w.write_bool(false)?,
            }
        }

        match &self.main_token {
            Some(addr) => {
                w.write_bool(true)?;
                w.write(addr)?;
            }
            None => w.write_bool(false)?,
        }

        write_len(w, self.tx_hashes.len())?;
        for (hash, timestamp) in &self.tx_hashes {
            w.write(hash)?;
            w.write_u64(*timestamp)?;
        }
        Ok(())
    }

    /// Keccak of [ContextData::encode_canonical].
    pub fn hash(&self, env: &BlockEnv) -> Result<Hash, CodecError> {
        let mut w = SumWriter::new(Vec::new());
        self.encode_canonical(env, &mut w)?;
        Ok(keccak256(&w.into_inner()))
    }
}

fn write_len<W: Write>(w: &mut SumWriter<W>, len: usize) -> Result<(), CodecError> {
    w.write_u32(u32::try_from(len).map_err(|_| CodecError::InvalidLength)?)
}

fn write_data_map<W: Write>(
    w: &mut SumWriter<W>,
    map: &BTreeMap<DataKey, Option<Vec<u8>>>,
) -> Result<(), CodecError> {
    write_len(w, map.len())?;
    for ((addr, key), value) in map {
        w.write(addr)?;
        w.write_bytes(key)?;
        match value {
            Some(value) => {
                w.write_bool(true)?;
                w.write_bytes(value)?;
            }
            None => w.write_bool(false)?,
        }
    }
    Ok(())
}

/// Block the context is building.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockEnv {
    pub chain_id: u64,
    pub target_height: u32,
    pub prev_hash: Hash,
    pub timestamp: u64,
}

impl Encode for BlockEnv {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_u64(self.chain_id)?;
        w.write_u32(self.target_height)?;
        w.write(&self.prev_hash)?;
        w.write_u64(self.timestamp)
    }
}
