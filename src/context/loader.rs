/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state underneath a [Context](super::Context) and its layout in the keyed store.
//!
//! Every chain key starts with a one-byte prefix:
//!
//! | Prefix | Key suffix | Value |
//! |---|---|---|
//! | 0x01 | contract address, key | contract data |
//! | 0x02 | account address, key | account data |
//! | 0x03 | account address | account sequence (u64) |
//! | 0x04 | address | admin marker |
//! | 0x05 | address | generator public hash |
//! | 0x06 | | main token address |
//! | 0x07 | | height (u32) |
//! | 0x08 | | last block hash |
//! | 0x09 | | last block timestamp (u64) |
//! | 0x0a | | chain id (u64) |
//! | 0x0b | | consensus save blob |
//! | 0x0c | height (u32 big-endian) | encoded block header |
//! | 0x0d | | context sequence (u64) |
//! | 0x0e | transaction hash | transaction timestamp (u64) |
//! | 0x0f | transaction timestamp (u64 big-endian), hash | empty; expiry index of 0x0e |

use crate::codec::Decode;
use crate::error::StoreError;
use crate::store::{ReadTx, StoreRead, WriteTx};
use crate::types::{Address, Hash, PublicHash};

use super::data::ContextData;

pub mod keys {
    use crate::types::{Address, Hash};

    pub const CONTRACT_DATA: u8 = 0x01;
    pub const ACCOUNT_DATA: u8 = 0x02;
    pub const ACCOUNT_SEQ: u8 = 0x03;
    pub const ADMIN: u8 = 0x04;
    pub const GENERATOR: u8 = 0x05;
    pub const MAIN_TOKEN: u8 = 0x06;
    pub const HEIGHT: u8 = 0x07;
    pub const LAST_HASH: u8 = 0x08;
    pub const LAST_TIMESTAMP: u8 = 0x09;
    pub const CHAIN_ID: u8 = 0x0a;
    pub const CONSENSUS: u8 = 0x0b;
    pub const HEADER: u8 = 0x0c;
    pub const SEQ: u8 = 0x0d;
    pub const TX_HASH: u8 = 0x0e;
    pub const TX_TIME: u8 = 0x0f;

    fn with_address(prefix: u8, addr: &Address, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 20 + suffix.len());
        key.push(prefix);
        key.extend_from_slice(addr.as_bytes());
        key.extend_from_slice(suffix);
        key
    }

    pub fn contract_data(cont: &Address, key: &[u8]) -> Vec<u8> {
        with_address(CONTRACT_DATA, cont, key)
    }

    pub fn account_data(addr: &Address, key: &[u8]) -> Vec<u8> {
        with_address(ACCOUNT_DATA, addr, key)
    }

    pub fn account_seq(addr: &Address) -> Vec<u8> {
        with_address(ACCOUNT_SEQ, addr, &[])
    }

    pub fn admin(addr: &Address) -> Vec<u8> {
        with_address(ADMIN, addr, &[])
    }

    pub fn generator(addr: &Address) -> Vec<u8> {
        with_address(GENERATOR, addr, &[])
    }

    /// Big-endian so that headers iterate in height order.
    pub fn header(height: u32) -> Vec<u8> {
        let mut key = vec![HEADER];
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    pub fn tx_hash(hash: &Hash) -> Vec<u8> {
        let mut key = vec![TX_HASH];
        key.extend_from_slice(hash.as_bytes());
        key
    }

    /// Big-endian timestamp first so that entries iterate oldest first.
    pub fn tx_time(timestamp: u64, hash: &Hash) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 8 + 32);
        key.push(TX_TIME);
        key.extend_from_slice(&timestamp.to_be_bytes());
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

/// Read access to the state below the bottom layer of a context.
pub trait StateLoader {
    fn chain_id(&self) -> u64;
    /// Height of the last applied block.
    fn height(&self) -> u32;
    fn last_hash(&self) -> Hash;
    fn last_timestamp(&self) -> u64;
    fn contract_data(&self, cont: &Address, key: &[u8]) -> Option<Vec<u8>>;
    fn account_data(&self, addr: &Address, key: &[u8]) -> Option<Vec<u8>>;
    fn account_seq(&self, addr: &Address) -> u64;
    fn seq(&self) -> u64;
    fn is_admin(&self, addr: &Address) -> bool;
    fn generator(&self, addr: &Address) -> Option<PublicHash>;
    fn main_token(&self) -> Option<Address>;
    fn tx_seen(&self, hash: &Hash) -> bool;
}

/// [StateLoader] over a read transaction of the keyed store.
pub struct StoreLoader<'s> {
    tx: ReadTx<'s>,
}

impl<'s> StoreLoader<'s> {
    pub fn new(tx: ReadTx<'s>) -> Self {
        Self { tx }
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tx.get(key).ok()
    }

    fn get_decoded<T: Decode>(&self, key: &[u8]) -> Option<T> {
        self.get(key).and_then(|bytes| T::from_bytes(&bytes).ok())
    }

    /// Whether genesis has been committed.
    pub fn is_initialized(&self) -> bool {
        self.tx.contains(&[keys::HEIGHT])
    }

    pub fn consensus_blob(&self) -> Option<Vec<u8>> {
        self.get(&[keys::CONSENSUS])
    }

    pub fn header_bytes(&self, height: u32) -> Option<Vec<u8>> {
        self.get(&keys::header(height))
    }
}

impl StateLoader for StoreLoader<'_> {
    fn chain_id(&self) -> u64 {
        self.get_decoded(&[keys::CHAIN_ID]).unwrap_or_default()
    }

    fn height(&self) -> u32 {
        self.get_decoded(&[keys::HEIGHT]).unwrap_or_default()
    }

    fn last_hash(&self) -> Hash {
        self.get_decoded(&[keys::LAST_HASH]).unwrap_or_default()
    }

    fn last_timestamp(&self) -> u64 {
        self.get_decoded(&[keys::LAST_TIMESTAMP]).unwrap_or_default()
    }

    fn contract_data(&self, cont: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.get(&keys::contract_data(cont, key))
    }

    fn account_data(&self, addr: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.get(&keys::account_data(addr, key))
    }

    fn account_seq(&self, addr: &Address) -> u64 {
        self.get_decoded(&keys::account_seq(addr)).unwrap_or_default()
    }

    fn seq(&self) -> u64 {
        self.get_decoded(&[keys::SEQ]).unwrap_or_default()
    }

    fn is_admin(&self, addr: &Address) -> bool {
        self.tx.contains(&keys::admin(addr))
    }

    fn generator(&self, addr: &Address) -> Option<PublicHash> {
        self.get_decoded(&keys::generator(addr))
    }

    fn main_token(&self) -> Option<Address> {
        self.get_decoded(&[keys::MAIN_TOKEN])
    }

    fn tx_seen(&self, hash: &Hash) -> bool {
        self.tx.contains(&keys::tx_hash(hash))
    }
}

/// Writes the deltas of a context layer into a write transaction.
pub fn write_context_data(tx: &mut WriteTx<'_>, data: &ContextData) {
    fn put(tx: &mut WriteTx<'_>, key: Vec<u8>, value: Option<&Vec<u8>>) {
        match value {
            Some(value) => tx.set(&key, value.clone()),
            None => tx.delete(&key),
        }
    }

    for ((cont, key), value) in &data.contract_data {
        put(tx, keys::contract_data(cont, key), value.as_ref());
    }
    for ((addr, key), value) in &data.account_data {
        put(tx, keys::account_data(addr, key), value.as_ref());
    }
    for (addr, seq) in &data.account_seqs {
        tx.set(&keys::account_seq(addr), seq.to_le_bytes().to_vec());
    }
    if let Some(seq) = data.seq {
        tx.set(&[keys::SEQ], seq.to_le_bytes().to_vec());
    }
    for (addr, is_admin) in &data.admins {
        if *is_admin {
            tx.set(&keys::admin(addr), vec![1]);
        } else {
            tx.delete(&keys::admin(addr));
        }
    }
    for (addr, ph) in &data.generators {
        match ph {
            Some(ph) => tx.set(&keys::generator(addr), ph.as_bytes().to_vec()),
            None => tx.delete(&keys::generator(addr)),
        }
    }
    if let Some(main_token) = &data.main_token {
        tx.set(&[keys::MAIN_TOKEN], main_token.as_bytes().to_vec());
    }
    for (hash, timestamp) in &data.tx_hashes {
        tx.set(&keys::tx_hash(hash), timestamp.to_le_bytes().to_vec());
        tx.set(&keys::tx_time(*timestamp, hash), Vec::new());
    }
}

/// Deletes the replay entries of transactions stamped before `cutoff`. It iterates, so it has to run
/// before any other write of `tx`. Returns the number of entries removed.
pub fn prune_tx_hashes(tx: &mut WriteTx<'_>, cutoff: u64) -> Result<usize, StoreError> {
    let end = keys::tx_time(cutoff, &Hash::ZERO);
    let mut expired = Vec::new();
    tx.ascend_range(&[keys::TX_TIME], &end, |key, _| {
        expired.push(key.to_vec());
        true
    })?;
    for key in &expired {
        let mut hash_key = vec![keys::TX_HASH];
        hash_key.extend_from_slice(&key[9..]);
        tx.delete(&hash_key);
        tx.delete(key);
    }
    Ok(expired.len())
}

/// Writes the chain head: height, hash and timestamp of the last applied block.
pub fn write_head(tx: &mut WriteTx<'_>, height: u32, hash: &Hash, timestamp: u64, header: Vec<u8>) {
    tx.set(&[keys::HEIGHT], height.to_le_bytes().to_vec());
    tx.set(&[keys::LAST_HASH], hash.as_bytes().to_vec());
    tx.set(&[keys::LAST_TIMESTAMP], timestamp.to_le_bytes().to_vec());
    tx.set(&keys::header(height), header);
}

pub fn write_chain_id(tx: &mut WriteTx<'_>, chain_id: u64) {
    tx.set(&[keys::CHAIN_ID], chain_id.to_le_bytes().to_vec());
}

pub fn write_consensus(tx: &mut WriteTx<'_>, blob: Vec<u8>) {
    tx.set(&[keys::CONSENSUS], blob);
}
