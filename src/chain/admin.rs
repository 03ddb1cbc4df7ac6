/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods of the chain itself, addressed by transactions sent to the zero address.

use tracing::info;

use crate::codec::{Value, ValueKind};
use crate::context::{Context, ContractContext};
use crate::contract::{dispatch, Args, ClassRegistry, Method};
use crate::error::ContractError;
use crate::types::Address;

/// Admin-only chain methods:
/// - `SetAdmin(address, bool)` grants or revokes the admin role.
/// - `SetGenerator(address, public_hash, bool)` registers or removes a generator. The change reaches
///   the rank table when the block is applied.
#[derive(Debug, Default)]
pub struct ChainAdmin;

impl ChainAdmin {
    const METHODS: &'static [Method<ChainAdmin>] = &[
        Method { name: "SetAdmin", args: &[ValueKind::Address, ValueKind::Bool], handler: ChainAdmin::set_admin },
        Method {
            name: "SetGenerator",
            args: &[ValueKind::Address, ValueKind::Hash, ValueKind::Bool],
            handler: ChainAdmin::set_generator,
        },
    ];

    /// Runs a chain method in its own layer on behalf of `from`.
    pub fn call(
        ctx: &mut Context,
        registry: &ClassRegistry,
        from: Address,
        method: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, ContractError> {
        if !ctx.is_admin(&from) {
            return Err(ContractError::NotAllowed);
        }
        let sn = ctx.snapshot();
        let result = {
            let mut cc = ContractContext::new(ctx, registry, Address::ZERO, from, Address::ZERO);
            dispatch(&ChainAdmin, Self::METHODS, &mut cc, method, args)
        };
        match result {
            Ok(out) => {
                ctx.commit(sn);
                Ok(out)
            }
            Err(e) => {
                ctx.revert(sn);
                Err(e)
            }
        }
    }

    fn set_admin(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let addr = args.address(0)?;
        let is_admin = args.bool(1)?;
        if !is_admin && addr == cc.from() {
            // an admin cannot revoke itself
            return Err(ContractError::NotAllowed);
        }
        cc.set_admin(&addr, is_admin);
        info!(%addr, is_admin, "admin changed");
        Ok(vec![])
    }

    fn set_generator(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let addr = args.address(0)?;
        let public_hash = args.hash(1)?;
        if args.bool(2)? {
            cc.set_generator(&addr, Some(public_hash));
        } else if cc.is_generator(&addr) {
            cc.set_generator(&addr, None);
        } else {
            return Err(anyhow::anyhow!("{addr} is not a generator").into());
        }
        info!(%addr, added = args.bool(2)?, "generator changed");
        Ok(vec![])
    }
}
