/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Layered state used during block execution.
//!
//! A [Context] is a non-empty stack of [ContextData] layers over a [StateLoader]:
//! - reads walk the stack top-down and fall through to the loader,
//! - writes always go to the top layer,
//! - [Context::snapshot] pushes a layer, [Context::commit] folds it into its parent and
//!   [Context::revert] discards it.
//!
//! The hash of a context is the hash of its top layer, so two contexts that applied the same
//! sequence of writes over the same loader have the same hash.

pub mod contract_context;
pub use contract_context::ContractContext;

pub mod data;
pub use data::{BlockEnv, ContextData};

pub mod loader;
pub use loader::{StateLoader, StoreLoader};

use crate::contract::event::{Event, EventKind};
use crate::error::{CodecError, ContractError};
use crate::params::{ForkFlag, ForkRules};
use crate::types::{Address, Hash, PublicHash};

pub struct Context<'a> {
    loader: &'a dyn StateLoader,
    env: BlockEnv,
    rules: ForkRules,
    layers: Vec<ContextData>,
}

impl<'a> Context<'a> {
    /// A context with one empty layer whose block environment is the loader's last block.
    pub fn new(loader: &'a dyn StateLoader) -> Self {
        let env = BlockEnv {
            chain_id: loader.chain_id(),
            target_height: loader.height(),
            prev_hash: loader.last_hash(),
            timestamp: loader.last_timestamp(),
        };
        Self { loader, env, rules: ForkRules::default(), layers: vec![ContextData::new()] }
    }

    /// Moves the context on to the next block: pushes a fresh layer and advances the target height,
    /// previous hash and timestamp.
    pub fn next_context(&mut self, last_hash: Hash, timestamp: u64) {
        self.layers.push(ContextData::new());
        self.env.target_height += 1;
        self.env.prev_hash = last_hash;
        self.env.timestamp = timestamp;
    }

    pub fn set_chain_id(&mut self, chain_id: u64) {
        self.env.chain_id = chain_id;
    }

    pub fn set_fork_rules(&mut self, rules: ForkRules) {
        self.rules = rules;
    }

    /// Whether `flag` is active for the block being built.
    pub fn is_fork_active(&self, flag: ForkFlag) -> bool {
        self.rules.is_active(flag, self.env.target_height)
    }

    pub fn env(&self) -> &BlockEnv {
        &self.env
    }

    pub fn chain_id(&self) -> u64 {
        self.env.chain_id
    }

    pub fn target_height(&self) -> u32 {
        self.env.target_height
    }

    pub fn prev_hash(&self) -> Hash {
        self.env.prev_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.env.timestamp
    }

    /* ↓↓↓ Layer stack ↓↓↓ */

    /// Pushes a layer and returns the snapshot id to pass to [Context::commit] or [Context::revert].
    pub fn snapshot(&mut self) -> usize {
        let sn = self.layers.len();
        self.layers.push(ContextData::new());
        sn
    }

    /// Folds every layer pushed since `sn` into the layer below it.
    pub fn commit(&mut self, sn: usize) {
        while self.layers.len() > sn.max(1) {
            if let Some(top) = self.layers.pop() {
                if let Some(parent) = self.layers.last_mut() {
                    parent.fold(top);
                }
            }
        }
    }

    /// Discards every layer pushed since `sn`.
    pub fn revert(&mut self, sn: usize) {
        self.layers.truncate(sn.max(1));
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn top(&self) -> &ContextData {
        // the stack is never empty
        &self.layers[self.layers.len() - 1]
    }

    fn top_mut(&mut self) -> &mut ContextData {
        let last = self.layers.len() - 1;
        &mut self.layers[last]
    }

    /// Keccak of the canonical encoding of the top layer.
    pub fn hash(&self) -> Result<Hash, CodecError> {
        self.top().hash(&self.env)
    }

    /// Folds all layers into one and releases the loader.
    pub fn into_data(self) -> ContextData {
        let mut layers = self.layers.into_iter();
        let mut data = layers.next().unwrap_or_default();
        for layer in layers {
            data.fold(layer);
        }
        data
    }

    fn find<T>(&self, f: impl Fn(&ContextData) -> Option<T>) -> Option<T> {
        self.layers.iter().rev().find_map(f)
    }

    /* ↓↓↓ Data namespaces ↓↓↓ */

    pub fn contract_data(&self, cont: &Address, key: &[u8]) -> Option<Vec<u8>> {
        let k = (*cont, key.to_vec());
        match self.find(|l| l.contract_data.get(&k).cloned()) {
            Some(value) => value,
            None => self.loader.contract_data(cont, key),
        }
    }

    /// Writes under the contract's namespace. An empty value deletes the key.
    pub fn set_contract_data(&mut self, cont: &Address, key: &[u8], value: Vec<u8>) {
        let value = (!value.is_empty()).then_some(value);
        self.top_mut().contract_data.insert((*cont, key.to_vec()), value);
    }

    pub fn account_data(&self, addr: &Address, key: &[u8]) -> Option<Vec<u8>> {
        let k = (*addr, key.to_vec());
        match self.find(|l| l.account_data.get(&k).cloned()) {
            Some(value) => value,
            None => self.loader.account_data(addr, key),
        }
    }

    /// Writes under the account's namespace. An empty value deletes the key.
    pub fn set_account_data(&mut self, addr: &Address, key: &[u8], value: Vec<u8>) {
        let value = (!value.is_empty()).then_some(value);
        self.top_mut().account_data.insert((*addr, key.to_vec()), value);
    }

    pub fn account_seq(&self, addr: &Address) -> u64 {
        self.find(|l| l.account_seqs.get(addr).copied())
            .unwrap_or_else(|| self.loader.account_seq(addr))
    }

    pub fn set_account_seq(&mut self, addr: &Address, seq: u64) {
        self.top_mut().account_seqs.insert(*addr, seq);
    }

    /* ↓↓↓ Generation sequence ↓↓↓ */

    pub fn seq(&self) -> u64 {
        self.find(|l| l.seq).unwrap_or_else(|| self.loader.seq())
    }

    /// Increments the context sequence and returns the new value.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.seq() + 1;
        self.top_mut().seq = Some(seq);
        seq
    }

    /* ↓↓↓ Chain roles ↓↓↓ */

    pub fn is_admin(&self, addr: &Address) -> bool {
        self.find(|l| l.admins.get(addr).copied())
            .unwrap_or_else(|| self.loader.is_admin(addr))
    }

    pub fn set_admin(&mut self, addr: &Address, is_admin: bool) {
        self.top_mut().admins.insert(*addr, is_admin);
    }

    pub fn generator(&self, addr: &Address) -> Option<PublicHash> {
        match self.find(|l| l.generators.get(addr).copied()) {
            Some(ph) => ph,
            None => self.loader.generator(addr),
        }
    }

    pub fn is_generator(&self, addr: &Address) -> bool {
        self.generator(addr).is_some()
    }

    /// Registers (`Some`) or removes (`None`) a generator.
    pub fn set_generator(&mut self, addr: &Address, public_hash: Option<PublicHash>) {
        self.top_mut().generators.insert(*addr, public_hash);
    }

    pub fn main_token(&self) -> Option<Address> {
        self.find(|l| l.main_token).or_else(|| self.loader.main_token())
    }

    pub fn set_main_token(&mut self, addr: &Address) {
        self.top_mut().main_token = Some(*addr);
    }

    /* ↓↓↓ Replay protection ↓↓↓ */

    pub fn tx_seen(&self, hash: &Hash) -> bool {
        self.layers.iter().any(|l| l.tx_hashes.contains_key(hash)) || self.loader.tx_seen(hash)
    }

    pub fn mark_tx(&mut self, hash: &Hash, timestamp: u64) {
        self.top_mut().tx_hashes.insert(*hash, timestamp);
    }

    /* ↓↓↓ Events ↓↓↓ */

    pub fn event_count(&self) -> usize {
        self.layers.iter().map(|l| l.events.len()).sum()
    }

    /// Appends an event to the top layer and returns its index in the block. Indexes are u16, so a
    /// block holds at most 65536 events.
    pub fn emit_event(&mut self, kind: EventKind, result: Vec<u8>) -> Result<u16, ContractError> {
        let count = self.event_count();
        let index = u16::try_from(count).map_err(|_| ContractError::EventLimit(count))?;
        self.top_mut().events.push(Event { index, kind, result });
        Ok(index)
    }

    /// Events from index `start` onwards, in emission order.
    pub fn events_since(&self, start: usize) -> Vec<Event> {
        self.layers.iter().flat_map(|l| l.events.iter()).skip(start).cloned().collect()
    }
}

/// A context can itself be the loader of another context. The folded view of all its layers is
/// what the child sees.
impl StateLoader for Context<'_> {
    fn chain_id(&self) -> u64 {
        self.env.chain_id
    }

    fn height(&self) -> u32 {
        self.env.target_height
    }

    fn last_hash(&self) -> Hash {
        self.env.prev_hash
    }

    fn last_timestamp(&self) -> u64 {
        self.env.timestamp
    }

    fn contract_data(&self, cont: &Address, key: &[u8]) -> Option<Vec<u8>> {
        Context::contract_data(self, cont, key)
    }

    fn account_data(&self, addr: &Address, key: &[u8]) -> Option<Vec<u8>> {
        Context::account_data(self, addr, key)
    }

    fn account_seq(&self, addr: &Address) -> u64 {
        Context::account_seq(self, addr)
    }

    fn seq(&self) -> u64 {
        Context::seq(self)
    }

    fn is_admin(&self, addr: &Address) -> bool {
        Context::is_admin(self, addr)
    }

    fn generator(&self, addr: &Address) -> Option<PublicHash> {
        Context::generator(self, addr)
    }

    fn main_token(&self) -> Option<Address> {
        Context::main_token(self)
    }

    fn tx_seen(&self, hash: &Hash) -> bool {
        Context::tx_seen(self, hash)
    }
}

/// Loader of an empty chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyLoader {
    pub chain_id: u64,
}

impl StateLoader for EmptyLoader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn height(&self) -> u32 {
        0
    }

    fn last_hash(&self) -> Hash {
        Hash::ZERO
    }

    fn last_timestamp(&self) -> u64 {
        0
    }

    fn contract_data(&self, _: &Address, _: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn account_data(&self, _: &Address, _: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn account_seq(&self, _: &Address) -> u64 {
        0
    }

    fn seq(&self) -> u64 {
        0
    }

    fn is_admin(&self, _: &Address) -> bool {
        false
    }

    fn generator(&self, _: &Address) -> Option<PublicHash> {
        None
    }

    fn main_token(&self) -> Option<Address> {
        None
    }

    fn tx_seen(&self, _: &Hash) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn reads_walk_layers_top_down() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        ctx.set_contract_data(&addr(1), b"k", b"base".to_vec());

        let sn = ctx.snapshot();
        assert_eq!(ctx.contract_data(&addr(1), b"k"), Some(b"base".to_vec()));
        ctx.set_contract_data(&addr(1), b"k", vec![]);
        assert_eq!(ctx.contract_data(&addr(1), b"k"), None);
        ctx.revert(sn);
        assert_eq!(ctx.contract_data(&addr(1), b"k"), Some(b"base".to_vec()));

        let sn = ctx.snapshot();
        ctx.set_contract_data(&addr(1), b"k", b"child".to_vec());
        ctx.commit(sn);
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.contract_data(&addr(1), b"k"), Some(b"child".to_vec()));
    }

    #[test]
    fn namespaces_are_separate() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        ctx.set_contract_data(&addr(1), b"k", vec![1]);
        assert_eq!(ctx.contract_data(&addr(2), b"k"), None);
        assert_eq!(ctx.account_data(&addr(1), b"k"), None);
        ctx.set_account_data(&addr(1), b"k", vec![2]);
        assert_eq!(ctx.contract_data(&addr(1), b"k"), Some(vec![1]));
        assert_eq!(ctx.account_data(&addr(1), b"k"), Some(vec![2]));
    }

    #[test]
    fn next_seq_is_monotonic_across_layers() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        assert_eq!(ctx.next_seq(), 1);
        let sn = ctx.snapshot();
        assert_eq!(ctx.next_seq(), 2);
        ctx.commit(sn);
        let sn = ctx.snapshot();
        assert_eq!(ctx.next_seq(), 3);
        ctx.revert(sn);
        assert_eq!(ctx.next_seq(), 3);
    }

    #[test]
    fn reverted_layer_drops_events() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        ctx.emit_event(EventKind::CallHistory, vec![1]).unwrap();
        let sn = ctx.snapshot();
        assert_eq!(ctx.emit_event(EventKind::CallHistory, vec![2]).unwrap(), 1);
        ctx.revert(sn);
        assert_eq!(ctx.event_count(), 1);
        assert_eq!(ctx.emit_event(EventKind::CallHistory, vec![3]).unwrap(), 1);
        let events = ctx.events_since(0);
        assert_eq!(events.iter().map(|e| e.result[0]).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn event_indexes_never_repeat() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        for n in 0..=u16::MAX {
            assert_eq!(ctx.emit_event(EventKind::CallHistory, vec![]).unwrap(), n);
        }
        assert!(matches!(
            ctx.emit_event(EventKind::CallHistory, vec![]),
            Err(ContractError::EventLimit(65536))
        ));
        assert_eq!(ctx.event_count(), 65536);
    }

    #[test]
    fn next_context_advances_block_env() {
        let loader = EmptyLoader { chain_id: 7 };
        let mut ctx = Context::new(&loader);
        ctx.set_generator(&addr(1), Some(Hash([1u8; 32])));
        ctx.next_context(Hash([2u8; 32]), 1_000);
        assert_eq!(ctx.target_height(), 1);
        assert_eq!(ctx.prev_hash(), Hash([2u8; 32]));
        assert_eq!(ctx.timestamp(), 1_000);
        assert_eq!(ctx.chain_id(), 7);
        assert!(ctx.is_generator(&addr(1)));
        assert!(ctx.top().is_empty());
    }

    #[test]
    fn identical_writes_give_identical_hash() {
        let loader = EmptyLoader::default();
        let run = |order: &[u8]| {
            let mut ctx = Context::new(&loader);
            ctx.next_context(Hash::ZERO, 10);
            for b in order {
                ctx.set_account_data(&addr(*b), b"x", vec![*b]);
            }
            ctx.hash().unwrap()
        };
        assert_eq!(run(&[1, 2, 3]), run(&[3, 1, 2]));
        assert_ne!(run(&[1, 2]), run(&[1, 2, 3]));
    }

    #[test]
    fn child_context_sees_parent_state() {
        let loader = EmptyLoader::default();
        let mut parent = Context::new(&loader);
        parent.set_admin(&addr(9), true);
        parent.set_main_token(&addr(4));
        let child = Context::new(&parent);
        assert!(child.is_admin(&addr(9)));
        assert_eq!(child.main_token(), Some(addr(4)));
    }
}
