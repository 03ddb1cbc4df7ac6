/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cross-contract calls.
//!
//! Every call runs in its own context layer. The layer is folded into the caller's on success and
//! discarded on error, so a failed call leaves no observable state change, including the call-history
//! event it emitted.

use tracing::{debug, trace};

use crate::chain::block::Header;
use crate::codec::{Encode, Value};
use crate::context::{Context, ContractContext};
use crate::error::ContractError;
use crate::types::Address;

use super::event::{EventKind, MethodCallEvent};
use super::registry::ClassRegistry;
use super::{GeneratorCounts, RewardMap};

/// Calls `method` of the contract at `to` on behalf of `from`.
pub fn exec(
    ctx: &mut Context,
    registry: &ClassRegistry,
    from: Address,
    to: Address,
    method: &str,
    args: &[Value],
) -> Result<Vec<Value>, ContractError> {
    let sn = ctx.snapshot();
    match call(ctx, registry, from, to, method, args) {
        Ok(result) => {
            ctx.commit(sn);
            Ok(result)
        }
        Err(e) => {
            debug!(%from, %to, method, error = %e, "call reverted");
            ctx.revert(sn);
            Err(e)
        }
    }
}

fn call(
    ctx: &mut Context,
    registry: &ClassRegistry,
    from: Address,
    to: Address,
    method: &str,
    args: &[Value],
) -> Result<Vec<Value>, ContractError> {
    let (contract, info) = registry.load(ctx, &to)?;

    let event = MethodCallEvent { from, to, method: method.to_string(), args: args.to_vec() };
    ctx.emit_event(EventKind::CallHistory, event.to_bytes()?)?;
    trace!(%from, %to, method, depth = ctx.depth(), "call");

    let mut cc = ContractContext::new(ctx, registry, to, from, info.master);
    contract.call(&mut cc, method, args)
}

/// Runs the reward hook of the contract at `cont` with the chain as caller.
pub fn reward(
    ctx: &mut Context,
    registry: &ClassRegistry,
    cont: Address,
    header: &Header,
    counts: &GeneratorCounts,
) -> Result<RewardMap, ContractError> {
    let sn = ctx.snapshot();
    let result = registry.load(ctx, &cont).and_then(|(contract, info)| {
        let mut cc = ContractContext::new(ctx, registry, cont, Address::ZERO, info.master);
        contract.on_reward(&mut cc, header, counts)
    });
    match result {
        Ok(minted) => {
            ctx.commit(sn);
            Ok(minted)
        }
        Err(e) => {
            ctx.revert(sn);
            Err(e)
        }
    }
}
