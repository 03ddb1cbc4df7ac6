/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The capability handed to a running contract.

use crate::codec::Value;
use crate::contract::{interactor, ClassRegistry};
use crate::error::ContractError;
use crate::params::ForkFlag;
use crate::types::{Address, PublicHash};

use super::Context;

/// Per-call view of the [Context]: contract data is scoped to the running contract, and calls made
/// through [ContractContext::exec] carry the running contract as their caller.
pub struct ContractContext<'c, 'a> {
    ctx: &'c mut Context<'a>,
    registry: &'c ClassRegistry,
    cont: Address,
    from: Address,
    master: Address,
}

impl<'c, 'a> ContractContext<'c, 'a> {
    pub(crate) fn new(
        ctx: &'c mut Context<'a>,
        registry: &'c ClassRegistry,
        cont: Address,
        from: Address,
        master: Address,
    ) -> Self {
        Self { ctx, registry, cont, from, master }
    }

    /// Address of the running contract.
    pub fn cont(&self) -> Address {
        self.cont
    }

    /// The caller: an account for a transaction, the calling contract for a nested call, the zero
    /// address for the chain itself.
    pub fn from(&self) -> Address {
        self.from
    }

    /// Governing address of the running contract.
    pub fn master(&self) -> Address {
        self.master
    }

    pub fn contract_data(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.ctx.contract_data(&self.cont, key)
    }

    /// An empty value deletes the key.
    pub fn set_contract_data(&mut self, key: &[u8], value: Vec<u8>) {
        self.ctx.set_contract_data(&self.cont, key, value)
    }

    pub fn account_data(&self, addr: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.ctx.account_data(addr, key)
    }

    pub fn set_account_data(&mut self, addr: &Address, key: &[u8], value: Vec<u8>) {
        self.ctx.set_account_data(addr, key, value)
    }

    pub fn is_generator(&self, addr: &Address) -> bool {
        self.ctx.is_generator(addr)
    }

    pub fn is_admin(&self, addr: &Address) -> bool {
        self.ctx.is_admin(addr)
    }

    pub fn main_token(&self) -> Option<Address> {
        self.ctx.main_token()
    }

    pub fn target_height(&self) -> u32 {
        self.ctx.target_height()
    }

    /// Timestamp of the block being built.
    pub fn last_timestamp(&self) -> u64 {
        self.ctx.timestamp()
    }

    pub fn is_fork_active(&self, flag: ForkFlag) -> bool {
        self.ctx.is_fork_active(flag)
    }

    pub fn chain_id(&self) -> u64 {
        self.ctx.chain_id()
    }

    pub fn next_seq(&mut self) -> u64 {
        self.ctx.next_seq()
    }

    /// Calls `method` of `to` with the running contract as caller.
    pub fn exec(&mut self, to: &Address, method: &str, args: Vec<Value>) -> Result<Vec<Value>, ContractError> {
        interactor::exec(self.ctx, self.registry, self.cont, *to, method, &args)
    }

    pub(crate) fn set_admin(&mut self, addr: &Address, is_admin: bool) {
        self.ctx.set_admin(addr, is_admin)
    }

    pub(crate) fn set_generator(&mut self, addr: &Address, public_hash: Option<PublicHash>) {
        self.ctx.set_generator(addr, public_hash)
    }
}
