/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the interface between the runtime and native contracts.
//!
//! A contract is a stateless value implementing [Contract]; all of its state lives in the
//! [ContractContext] namespaces. Classes are registered in a [ClassRegistry](registry::ClassRegistry)
//! and rehydrated from the class id stored at deploy time. Each contract declares its externally
//! callable methods as a table of [Method] descriptors: the name, the kinds of the typed arguments,
//! and the handler. [dispatch] checks the arguments against the descriptor before calling the handler,
//! so an unknown method or a malformed argument list fails before any state is touched.

pub mod event;

pub mod interactor;
pub use interactor::exec;

pub mod registry;
pub use registry::{class_id, ClassRegistry, ContractInfo};

use std::collections::BTreeMap;

use crate::chain::block::Header;
use crate::codec::{Value, ValueKind};
use crate::context::ContractContext;
use crate::error::ContractError;
use crate::types::{Address, Amount, Hash};

/// Blocks produced per generator in the current reward window.
pub type GeneratorCounts = BTreeMap<Address, u32>;

/// Amounts minted per receiver.
pub type RewardMap = BTreeMap<Address, Amount>;

pub trait Contract {
    /// Runs once at deploy time with the deployer's argument bytes.
    fn on_create(&self, cc: &mut ContractContext, args: &[u8]) -> Result<(), ContractError>;

    /// Invokes an external method.
    fn call(&self, cc: &mut ContractContext, method: &str, args: &[Value]) -> Result<Vec<Value>, ContractError>;

    /// Whether the chain calls [Contract::on_reward] at the end of each reward window.
    fn has_reward_hook(&self) -> bool {
        false
    }

    /// Block-finalize hook. Returns the amounts minted.
    fn on_reward(
        &self,
        _cc: &mut ContractContext,
        _header: &Header,
        _counts: &GeneratorCounts,
    ) -> Result<RewardMap, ContractError> {
        Ok(RewardMap::new())
    }
}

/// A registrable contract class. The class id is derived from [ContractClass::CLASS_NAME].
pub trait ContractClass: Contract + Default + 'static {
    const CLASS_NAME: &'static str;
}

pub type Handler<C> = fn(&C, &mut ContractContext, Args) -> Result<Vec<Value>, ContractError>;

/// Descriptor of an external method.
pub struct Method<C: 'static> {
    pub name: &'static str,
    pub args: &'static [ValueKind],
    pub handler: Handler<C>,
}

/// Finds `method` in the descriptor table, checks the argument list and calls the handler.
pub fn dispatch<C>(
    contract: &C,
    methods: &[Method<C>],
    cc: &mut ContractContext,
    method: &str,
    args: &[Value],
) -> Result<Vec<Value>, ContractError> {
    let m = methods
        .iter()
        .find(|m| m.name == method)
        .ok_or_else(|| ContractError::MethodNotFound(method.to_string()))?;

    if args.len() != m.args.len() {
        return Err(ContractError::ArgumentCount {
            method: method.to_string(),
            expected: m.args.len(),
            actual: args.len(),
        });
    }
    if let Some(index) = args.iter().zip(m.args).position(|(v, k)| v.kind() != *k) {
        return Err(ContractError::InvalidArgument { method: method.to_string(), index });
    }

    (m.handler)(contract, cc, Args { method: m.name, values: args })
}

/// Positional access to an argument list already checked by [dispatch].
#[derive(Clone, Copy)]
pub struct Args<'v> {
    method: &'static str,
    values: &'v [Value],
}

impl<'v> Args<'v> {
    fn invalid(&self, index: usize) -> ContractError {
        ContractError::InvalidArgument { method: self.method.to_string(), index }
    }

    fn get(&self, index: usize) -> Result<&'v Value, ContractError> {
        self.values.get(index).ok_or_else(|| self.invalid(index))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn address(&self, index: usize) -> Result<Address, ContractError> {
        self.get(index)?.as_address().ok_or_else(|| self.invalid(index))
    }

    pub fn hash(&self, index: usize) -> Result<Hash, ContractError> {
        self.get(index)?.as_hash().ok_or_else(|| self.invalid(index))
    }

    pub fn amount(&self, index: usize) -> Result<Amount, ContractError> {
        self.get(index)?.as_amount().cloned().ok_or_else(|| self.invalid(index))
    }

    pub fn u64(&self, index: usize) -> Result<u64, ContractError> {
        self.get(index)?.as_u64().ok_or_else(|| self.invalid(index))
    }

    pub fn bool(&self, index: usize) -> Result<bool, ContractError> {
        self.get(index)?.as_bool().ok_or_else(|| self.invalid(index))
    }

    pub fn string(&self, index: usize) -> Result<&'v str, ContractError> {
        self.get(index)?.as_str().ok_or_else(|| self.invalid(index))
    }

    pub fn bytes(&self, index: usize) -> Result<&'v [u8], ContractError> {
        self.get(index)?.as_bytes().ok_or_else(|| self.invalid(index))
    }

    pub fn address_array(&self, index: usize) -> Result<&'v [Address], ContractError> {
        self.get(index)?.as_address_array().ok_or_else(|| self.invalid(index))
    }
}

/// Reads a single value out of a result list, e.g. the balance returned by `BalanceOf`.
pub fn single<T>(
    mut result: Vec<Value>,
    f: impl FnOnce(&Value) -> Option<T>,
) -> Result<T, ContractError> {
    match result.pop() {
        Some(value) if result.is_empty() => {
            f(&value).ok_or_else(|| anyhow::anyhow!("unexpected result type {:?}", value.kind()).into())
        }
        _ => Err(anyhow::anyhow!("expected exactly one result").into()),
    }
}
