/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A vault bridging the main token to external platforms.
//!
//! Inbound transfers are reported by the master and paid out of the vault balance, once per
//! (platform, external transaction id). Outbound transfers pull tokens from the caller into the vault
//! and are numbered by a running counter that off-chain relayers follow.

use tracing::debug;

use crate::codec::{Value, ValueKind};
use crate::context::ContractContext;
use crate::contract::{dispatch, Args, Contract, ContractClass, Method};
use crate::error::ContractError;
use crate::types::Address;

use super::{key, load_address, token_pull, token_transfer};

const TAG_TOKEN: u8 = 0x01;
const TAG_PROCESSED: u8 = 0x02;
const TAG_OUT_COUNT: u8 = 0x03;

#[derive(Debug, Default)]
pub struct Gateway;

impl ContractClass for Gateway {
    const CLASS_NAME: &'static str = "contracts.Gateway";
}

impl Gateway {
    const METHODS: &'static [Method<Gateway>] = &[
        Method {
            name: "TokenIn",
            args: &[ValueKind::String, ValueKind::Hash, ValueKind::Address, ValueKind::Amount],
            handler: Gateway::token_in,
        },
        Method {
            name: "TokenLeave",
            args: &[ValueKind::String, ValueKind::String, ValueKind::Amount],
            handler: Gateway::token_leave,
        },
        Method { name: "TokenOutCount", args: &[], handler: Gateway::token_out_count },
        Method { name: "IsProcessed", args: &[ValueKind::String, ValueKind::Hash], handler: Gateway::is_processed },
    ];

    fn token(cc: &ContractContext) -> Result<Address, ContractError> {
        load_address(cc, &[TAG_TOKEN]).ok_or_else(|| anyhow::anyhow!("gateway token is not set").into())
    }

    fn out_count(cc: &ContractContext) -> u64 {
        cc.contract_data(&[TAG_OUT_COUNT])
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
            .unwrap_or_default()
    }

    fn token_in(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        if cc.from() != cc.master() {
            return Err(ContractError::NotAllowed);
        }
        let platform = args.string(0)?;
        let txid = args.hash(1)?;
        let to = args.address(2)?;
        let amount = args.amount(3)?;

        let processed = key(TAG_PROCESSED, &[platform.as_bytes(), txid.as_bytes()]);
        if cc.contract_data(&processed).is_some() {
            return Err(ContractError::AlreadyProcessed);
        }
        cc.set_contract_data(&processed, vec![1]);

        let token = Self::token(cc)?;
        token_transfer(cc, &token, &to, &amount)?;
        debug!(platform, %txid, %to, %amount, "gateway token in");
        Ok(vec![])
    }

    fn token_leave(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let platform = args.string(0)?;
        let external = args.string(1)?;
        let amount = args.amount(2)?;
        if amount.is_zero() {
            return Err(ContractError::InvalidAmount);
        }

        let from = cc.from();
        let token = Self::token(cc)?;
        token_pull(cc, &token, &from, &amount)?;

        let seq = Self::out_count(cc) + 1;
        cc.set_contract_data(&[TAG_OUT_COUNT], seq.to_le_bytes().to_vec());
        debug!(platform, to = external, %from, %amount, seq, "gateway token leave");
        Ok(vec![Value::U64(seq)])
    }

    fn token_out_count(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::U64(Self::out_count(cc))])
    }

    fn is_processed(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let processed = key(TAG_PROCESSED, &[args.string(0)?.as_bytes(), args.hash(1)?.as_bytes()]);
        Ok(vec![Value::Bool(cc.contract_data(&processed).is_some())])
    }
}

impl Contract for Gateway {
    /// `args` is the raw address of the bridged token.
    fn on_create(&self, cc: &mut ContractContext, args: &[u8]) -> Result<(), ContractError> {
        let token = Address::from_slice(args).ok_or(ContractError::InvalidArgument {
            method: "OnCreate".to_string(),
            index: 0,
        })?;
        cc.set_contract_data(&[TAG_TOKEN], token.as_bytes().to_vec());
        Ok(())
    }

    fn call(&self, cc: &mut ContractContext, method: &str, args: &[Value]) -> Result<Vec<Value>, ContractError> {
        dispatch(self, Self::METHODS, cc, method, args)
    }
}
