/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Staking on Hypers.

use std::collections::BTreeMap;

use tracing::debug;

use crate::codec::{Decode, Encode, Value};
use crate::context::ContractContext;
use crate::contract::Args;
use crate::contracts::{key, load_amount, store_amount, token_pull, token_transfer};
use crate::error::ContractError;
use crate::types::{Address, Amount};

use super::{stakers, Formulator, STAKED_HYPERS, TAG_STACK_REWARD_MAP, TAG_STAKING_AMOUNT};

/// Amounts per address, persisted in key order.
pub(crate) type AmountMap = BTreeMap<Address, Amount>;

pub(crate) fn load_map(cc: &ContractContext, key: &[u8]) -> Result<AmountMap, ContractError> {
    match cc.contract_data(key) {
        Some(bytes) => Ok(AmountMap::from_bytes(&bytes)?),
        None => Ok(AmountMap::new()),
    }
}

/// An empty map deletes the key.
pub(crate) fn store_map(cc: &mut ContractContext, key: &[u8], map: &AmountMap) -> Result<(), ContractError> {
    let bytes = if map.is_empty() { Vec::new() } else { map.to_bytes()? };
    cc.set_contract_data(key, bytes);
    Ok(())
}

pub(crate) fn staking_amount_of(cc: &ContractContext, hyper: &Address, staker: &Address) -> Amount {
    load_amount(cc, &key(TAG_STAKING_AMOUNT, &[hyper.as_bytes(), staker.as_bytes()]))
}

/// Current stakes on `hyper`.
pub(crate) fn staking_amounts(cc: &ContractContext, hyper: &Address) -> AmountMap {
    stakers(hyper)
        .entries(cc)
        .into_iter()
        .map(|staker| {
            let amount = staking_amount_of(cc, hyper, &staker);
            (staker, amount)
        })
        .filter(|(_, amount)| !amount.is_zero())
        .collect()
}

impl Formulator {
    fn check_generator(cc: &ContractContext, hyper: &Address) -> Result<(), ContractError> {
        if cc.is_generator(hyper) {
            Ok(())
        } else {
            Err(ContractError::InvalidStakeGenerator)
        }
    }

    pub(super) fn stake(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let hyper = args.address(0)?;
        let amount = args.amount(1)?;
        Self::check_generator(cc, &hyper)?;
        if amount < Self::policy(cc)?.min_stake_amount {
            return Err(ContractError::InvalidStakeAmount);
        }

        let staker = cc.from();
        let token = Self::token(cc)?;
        token_pull(cc, &token, &staker, &amount)?;

        let staked = staking_amount_of(cc, &hyper, &staker) + amount.clone();
        store_amount(cc, &key(TAG_STAKING_AMOUNT, &[hyper.as_bytes(), staker.as_bytes()]), &staked);
        stakers(&hyper).insert(cc, &staker);
        STAKED_HYPERS.insert(cc, &hyper);
        debug!(%hyper, %staker, %amount, "staked");
        Ok(vec![])
    }

    /// Withdraws part of a stake. A partial withdrawal below the minimum stake is rejected; the full
    /// balance can always be withdrawn.
    pub(super) fn unstake(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let hyper = args.address(0)?;
        let amount = args.amount(1)?;
        Self::check_generator(cc, &hyper)?;

        let staker = cc.from();
        let staked = staking_amount_of(cc, &hyper, &staker);
        let remaining = staked.checked_sub(&amount).ok_or(ContractError::InvalidStakeAmount)?;
        if amount.is_zero() || (amount < Self::policy(cc)?.min_stake_amount && !remaining.is_zero()) {
            return Err(ContractError::InvalidStakeAmount);
        }

        store_amount(cc, &key(TAG_STAKING_AMOUNT, &[hyper.as_bytes(), staker.as_bytes()]), &remaining);
        if remaining.is_zero() {
            stakers(&hyper).remove(cc, &staker);
        }
        let token = Self::token(cc)?;
        token_transfer(cc, &token, &staker, &amount)?;
        debug!(%hyper, %staker, %amount, "unstaked");
        Ok(vec![])
    }

    pub(super) fn staking_amount(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Amount(staking_amount_of(cc, &args.address(0)?, &args.address(1)?))])
    }

    /// Returns the stakers of a Hyper and their amounts as two parallel arrays.
    pub(super) fn staking_amount_map(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let (addrs, amounts) = staking_amounts(cc, &args.address(0)?).into_iter().unzip();
        Ok(vec![Value::AddressArray(addrs), Value::AmountArray(amounts)])
    }

    /// Deferred staking reward of a Hyper.
    pub(super) fn stack_reward(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let stack = load_map(cc, &[TAG_STACK_REWARD_MAP])?;
        Ok(vec![Value::Amount(stack.get(&args.address(0)?).cloned().unwrap_or_default())])
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::Value;
    use crate::context::{Context, EmptyLoader};
    use crate::contract::exec;
    use crate::contracts::testing::{self, addr, balance, Deployed};
    use crate::error::ContractError;
    use crate::types::{Address, Amount, Hash};

    const HYPER: Address = Address([0x71; 20]);
    const STAKER: Address = Address([0x5a; 20]);

    fn setup(ctx: &mut Context) -> Deployed {
        let d = testing::deploy(ctx, vec![(STAKER, Amount::coin(1_000))], testing::formulator_policy());
        ctx.set_generator(&HYPER, Some(Hash([1u8; 32])));
        exec(ctx, &d.registry, STAKER, d.token, "Approve", &[Value::Address(d.formulator), Value::Amount(Amount::coin(1_000))])
            .unwrap();
        d
    }

    fn call(ctx: &mut Context, d: &Deployed, method: &str, args: &[Value]) -> Result<Vec<Value>, ContractError> {
        exec(ctx, &d.registry, STAKER, d.formulator, method, args)
    }

    fn stake_args(hyper: Address, coins: u64) -> [Value; 2] {
        [Value::Address(hyper), Value::Amount(Amount::coin(coins))]
    }

    #[test]
    fn stake_requires_generator_and_minimum() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);

        assert!(matches!(call(&mut ctx, &d, "Stake", &stake_args(addr(3), 100)), Err(ContractError::InvalidStakeGenerator)));
        assert!(matches!(call(&mut ctx, &d, "Stake", &stake_args(HYPER, 9)), Err(ContractError::InvalidStakeAmount)));
        call(&mut ctx, &d, "Stake", &stake_args(HYPER, 100)).unwrap();
        call(&mut ctx, &d, "Stake", &stake_args(HYPER, 20)).unwrap();

        assert_eq!(balance(&mut ctx, &d, &STAKER), Amount::coin(880));
        let out = call(&mut ctx, &d, "StakingAmount", &[Value::Address(HYPER), Value::Address(STAKER)]).unwrap();
        assert_eq!(out, vec![Value::Amount(Amount::coin(120))]);
        let out = call(&mut ctx, &d, "StakingAmountMap", &[Value::Address(HYPER)]).unwrap();
        assert_eq!(out, vec![Value::AddressArray(vec![STAKER]), Value::AmountArray(vec![Amount::coin(120)])]);
    }

    #[test]
    fn unstake_rules() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        call(&mut ctx, &d, "Stake", &stake_args(HYPER, 100)).unwrap();

        assert!(matches!(call(&mut ctx, &d, "Unstake", &stake_args(HYPER, 101)), Err(ContractError::InvalidStakeAmount)));
        assert!(matches!(call(&mut ctx, &d, "Unstake", &stake_args(HYPER, 5)), Err(ContractError::InvalidStakeAmount)));
        call(&mut ctx, &d, "Unstake", &stake_args(HYPER, 95)).unwrap();
        // the rest may go even though it is below the minimum
        call(&mut ctx, &d, "Unstake", &stake_args(HYPER, 5)).unwrap();

        assert_eq!(balance(&mut ctx, &d, &STAKER), Amount::coin(1_000));
        let out = call(&mut ctx, &d, "StakingAmountMap", &[Value::Address(HYPER)]).unwrap();
        assert_eq!(out, vec![Value::AddressArray(vec![]), Value::AmountArray(vec![])]);

        ctx.set_generator(&HYPER, None);
        assert!(matches!(call(&mut ctx, &d, "Unstake", &stake_args(HYPER, 5)), Err(ContractError::InvalidStakeGenerator)));
    }
}
