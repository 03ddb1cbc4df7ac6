/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! System contracts deployed at genesis.
//!
//! - [token]: the main token, the fee currency and the mint source of rewards.
//! - [gateway]: a vault bridging the main token to external platforms.
//! - [formulator]: formulator tokens, staking and the reward engine.
//!
//! Contract data keys start with a one-byte tag owned by the contract. Values are raw: amounts are
//! their big-endian magnitude, counters are little-endian integers, and zero is stored as "absent".

pub mod formulator;
pub use formulator::Formulator;

pub mod gateway;
pub use gateway::Gateway;

pub mod token;
pub use token::Token;

use crate::codec::{Decode, Value};
use crate::context::ContractContext;
use crate::contract::{single, ClassRegistry};
use crate::error::ContractError;
use crate::types::{Address, Amount};

/// Registers the system contract classes and returns their ids as (token, gateway, formulator).
pub fn register_all(registry: &mut ClassRegistry) -> Result<(u64, u64, u64), ContractError> {
    Ok((
        registry.register::<Token>()?,
        registry.register::<Gateway>()?,
        registry.register::<Formulator>()?,
    ))
}

pub(crate) fn key(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut key = vec![tag];
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

pub(crate) fn load_amount(cc: &ContractContext, key: &[u8]) -> Amount {
    cc.contract_data(key).map(|b| Amount::from_bytes(&b)).unwrap_or_default()
}

pub(crate) fn store_amount(cc: &mut ContractContext, key: &[u8], amount: &Amount) {
    cc.set_contract_data(key, amount.to_bytes())
}

pub(crate) fn load_u32(cc: &ContractContext, key: &[u8]) -> u32 {
    cc.contract_data(key)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .unwrap_or_default()
}

pub(crate) fn store_u32(cc: &mut ContractContext, key: &[u8], value: u32) {
    let bytes = if value == 0 { Vec::new() } else { value.to_le_bytes().to_vec() };
    cc.set_contract_data(key, bytes)
}

pub(crate) fn load_address(cc: &ContractContext, key: &[u8]) -> Option<Address> {
    cc.contract_data(key).and_then(|b| Address::from_slice(&b))
}

pub(crate) fn load_decoded<T: Decode>(cc: &ContractContext, key: &[u8]) -> Result<Option<T>, ContractError> {
    match cc.contract_data(key) {
        Some(bytes) => Ok(Some(T::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

/// Moves `amount` of the main token from the running contract to `to`.
pub(crate) fn token_transfer(
    cc: &mut ContractContext,
    token: &Address,
    to: &Address,
    amount: &Amount,
) -> Result<(), ContractError> {
    cc.exec(token, "Transfer", vec![Value::Address(*to), Value::Amount(amount.clone())])?;
    Ok(())
}

/// Pulls `amount` from `owner` into the running contract. `owner` must have approved it.
pub(crate) fn token_pull(
    cc: &mut ContractContext,
    token: &Address,
    owner: &Address,
    amount: &Amount,
) -> Result<(), ContractError> {
    let this = cc.cont();
    cc.exec(
        token,
        "TransferFrom",
        vec![Value::Address(*owner), Value::Address(this), Value::Amount(amount.clone())],
    )?;
    Ok(())
}

pub(crate) fn token_amount(
    cc: &mut ContractContext,
    token: &Address,
    method: &str,
    args: Vec<Value>,
) -> Result<Amount, ContractError> {
    single(cc.exec(token, method, args)?, |v| v.as_amount().cloned())
}
