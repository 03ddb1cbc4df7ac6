/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block reward distribution.
//!
//! At the end of each reward window the chain hands the formulator contract the number of blocks each
//! generator produced. The reward of the window, `reward_per_block` per block plus the collected
//! transaction fees, is split by reward power:
//!
//! - a live formulator counts as having produced the average number of blocks, and its power is
//!   `amount x count x tier efficiency`,
//! - a Hyper's own power is `hyper_amount x count x hyper efficiency`,
//! - a Hyper's stakers add `cross amount x count x staking efficiency`, where the cross amount is the
//!   part of a stake held since the previous reward round.
//!
//! Formulator rewards go to the owner, minus the mining fee. Staking rewards are accumulated as the
//! Hyper's stack reward and paid to its stakers pro rata, minus the Hyper's commission.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::chain::block::Header;
use crate::codec::Value;
use crate::context::ContractContext;
use crate::contract::{GeneratorCounts, RewardMap};
use crate::contracts::{key, token_amount};
use crate::error::ContractError;
use crate::params::ForkFlag;
use crate::types::{Address, Amount};

use super::staking::{load_map, staking_amounts, store_map, AmountMap};
use super::{
    Formulator, FORMULATORS, STAKED_HYPERS, TAG_LAST_STAKING_AMOUNT_MAP, TAG_STACK_REWARD_MAP, TAG_STAKING_POWER_MAP,
};

/// Who is paid for a reward-power entry.
enum Receiver {
    Generator,
    Owner(Address),
}

/// `amount x count x efficiency / 1000`.
fn power(amount: &Amount, count: u32, efficiency_milli: u32) -> Amount {
    amount.mul_c(u64::from(count) * u64::from(efficiency_milli)).div_c(1000)
}

fn sum(map: &AmountMap) -> Amount {
    map.values().cloned().sum()
}

/// Mints through the main token and keeps account of what was minted.
struct Minter {
    token: Address,
    minted: RewardMap,
}

impl Minter {
    fn mint(&mut self, cc: &mut ContractContext, to: &Address, amount: Amount) -> Result<(), ContractError> {
        if amount.is_zero() {
            return Ok(());
        }
        cc.exec(&self.token, "Mint", vec![Value::Address(*to), Value::Amount(amount.clone())])?;
        *self.minted.entry(*to).or_default() += &amount;
        Ok(())
    }

    fn total(&self) -> Amount {
        self.minted.values().cloned().sum()
    }
}

/// Distributes the reward of the window ending at `header`. Returns the amounts minted.
pub fn distribute(cc: &mut ContractContext, header: &Header, counts: &GeneratorCounts) -> Result<RewardMap, ContractError> {
    let policy = Formulator::policy(cc)?;
    let rewards = Formulator::rewards(cc)?;
    let token = Formulator::token(cc)?;

    // normalize counts: every live formulator produced the average
    let count_sum: u32 = counts.values().fold(0u32, |acc, c| acc.saturating_add(*c));
    let mut normalized = counts.clone();
    let live = FORMULATORS.entries(cc);
    if !live.is_empty() {
        let per = count_sum / live.len() as u32;
        for id in &live {
            normalized.insert(*id, per);
        }
    }

    let mut stack = load_map(cc, &[TAG_STACK_REWARD_MAP])?;

    let mut reward_power: BTreeMap<Address, (Amount, Receiver)> = BTreeMap::new();
    let mut hypers: Vec<(Address, u32)> = Vec::new();
    for (addr, count) in &normalized {
        if let Some(record) = Formulator::record(cc, addr)? {
            let p = power(&record.amount, *count, rewards.efficiency(record.kind));
            reward_power.insert(*addr, (p, Receiver::Owner(record.owner)));
        } else if cc.is_generator(addr) {
            let p = power(&policy.hyper_amount, *count, rewards.hyper_efficiency_milli);
            reward_power.insert(*addr, (p, Receiver::Generator));
            hypers.push((*addr, *count));
        } else {
            stack.remove(addr);
        }
    }

    // staking power of each hyper, from stakes held across the round boundary
    let compounding = cc.is_fork_active(ForkFlag::StackRewardCompounding);
    let mut staking_power = AmountMap::new();
    for (hyper, count) in &hypers {
        let last = load_map(cc, &key(TAG_LAST_STAKING_AMOUNT_MAP, &[hyper.as_bytes()]))?;
        let current = staking_amounts(cc, hyper);
        let spm_key = key(TAG_STAKING_POWER_MAP, &[hyper.as_bytes()]);
        let mut spm = load_map(cc, &spm_key)?;

        let mut hyper_power = Amount::zero();
        for (staker, amount) in &current {
            let cross = match last.get(staker) {
                Some(prev) => std::cmp::min(prev, amount).clone(),
                None => continue,
            };
            if cross.is_zero() {
                continue;
            }
            hyper_power += &power(&cross, *count, rewards.staking_efficiency_milli);
            *spm.entry(*staker).or_default() += &cross;
        }

        if compounding {
            if let Some(deferred) = stack.get(hyper).filter(|s| !s.is_zero()) {
                let ratio = deferred.div(&sum(&spm));
                for p in spm.values_mut() {
                    let share = p.mul(&ratio);
                    hyper_power += &power(&share, *count, rewards.staking_efficiency_milli);
                    *p += &share;
                }
            }
        }

        store_map(cc, &spm_key, &spm)?;
        if !hyper_power.is_zero() {
            staking_power.insert(*hyper, hyper_power);
        }
    }

    // the fee pool is drained every window, whether or not anyone holds power
    let collected = token_amount(cc, &token, "CollectedFee", vec![])?;
    if !collected.is_zero() {
        cc.exec(&token, "SubCollectedFee", vec![Value::Amount(collected.clone())])?;
    }
    let total = rewards.reward_per_block.mul_c(u64::from(count_sum)) + collected;

    // mint by power; staking shares go to the stack
    let power_sum = reward_power.values().map(|(p, _)| p.clone()).sum::<Amount>() + sum(&staking_power);
    let mut minter = Minter { token, minted: RewardMap::new() };
    if !power_sum.is_zero() {
        let ratio = total.div(&power_sum);
        let fee_split = cc.is_fork_active(ForkFlag::MiningFeeSplit);
        for (addr, (p, receiver)) in &reward_power {
            let reward = p.mul(&ratio);
            match receiver {
                Receiver::Generator => minter.mint(cc, addr, reward)?,
                Receiver::Owner(owner) if fee_split => {
                    let fee = reward.mul_c(u64::from(rewards.mining_fee_milli)).div_c(1000);
                    let rest = reward.saturating_sub(&fee);
                    minter.mint(cc, &rewards.mining_fee_address, fee)?;
                    minter.mint(cc, owner, rest)?;
                }
                Receiver::Owner(owner) => minter.mint(cc, owner, reward)?,
            }
        }
        for (hyper, p) in &staking_power {
            *stack.entry(*hyper).or_default() += &p.mul(&ratio);
        }
    }
    if power_sum.is_zero() && !total.is_zero() {
        debug!(height = header.height, %total, "no reward power in window");
    }

    // pay the stakers of the hypers of this window
    for (hyper, _) in &hypers {
        let deferred = match stack.get(hyper) {
            Some(s) if !s.is_zero() => s.clone(),
            _ => continue,
        };
        let spm_key = key(TAG_STAKING_POWER_MAP, &[hyper.as_bytes()]);
        let spm = load_map(cc, &spm_key)?;
        let spm_sum = sum(&spm);
        if spm_sum.is_zero() {
            // no staker holds power: the stack is dropped unpaid
            stack.remove(hyper);
            store_map(cc, &spm_key, &AmountMap::new())?;
            debug!(%hyper, stack = %deferred, "stack reward dropped");
            continue;
        }

        let ratio = deferred.div(&spm_sum);
        let mut commission = Amount::zero();
        for (staker, p) in &spm {
            let share = p.mul(&ratio);
            let fee = share.mul_c(u64::from(rewards.commission_ratio_milli)).div_c(1000);
            minter.mint(cc, staker, share.saturating_sub(&fee))?;
            commission += &fee;
        }
        minter.mint(cc, hyper, commission)?;
        stack.remove(hyper);
        store_map(cc, &spm_key, &AmountMap::new())?;
        debug!(%hyper, stack = %deferred, stakers = spm.len(), "stack reward paid");
    }

    store_map(cc, &[TAG_STACK_REWARD_MAP], &stack)?;

    // stakes of this round are the reference of the next
    for hyper in STAKED_HYPERS.entries(cc) {
        let current = staking_amounts(cc, &hyper);
        store_map(cc, &key(TAG_LAST_STAKING_AMOUNT_MAP, &[hyper.as_bytes()]), &current)?;
        if current.is_empty() {
            STAKED_HYPERS.remove(cc, &hyper);
        }
    }

    let minted = minter.total();
    if minted > total {
        return Err(ContractError::RewardOverflow { minted: minted.to_string(), budget: total.to_string() });
    }

    info!(
        height = header.height,
        blocks = count_sum,
        total = %total,
        minted = %minted,
        receivers = minter.minted.len(),
        "block reward distributed"
    );
    Ok(minter.minted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encode;
    use crate::context::{Context, EmptyLoader};
    use crate::contract::{exec, interactor};
    use crate::contracts::testing::{self, addr, balance, Deployed, MASTER};
    use crate::params::ForkRules;
    use crate::types::Hash;

    const H1: Address = Address([0x71; 20]);
    const H2: Address = Address([0x72; 20]);
    const STAKER: Address = Address([0x5a; 20]);
    const OWNER: Address = Address([0x50; 20]);

    fn setup(ctx: &mut Context, reward_per_block: u64) -> Deployed {
        let d = testing::deploy(
            ctx,
            vec![(MASTER, Amount::coin(1_000_000)), (STAKER, Amount::coin(1_000))],
            testing::formulator_policy(),
        );
        let mut policy = testing::reward_policy();
        policy.reward_per_block = Amount::coin(reward_per_block);
        exec(ctx, &d.registry, MASTER, d.formulator, "SetRewardPolicy", &[Value::Bytes(policy.to_bytes().unwrap())])
            .unwrap();
        for who in [MASTER, STAKER] {
            let approve = [Value::Address(d.formulator), Value::Amount(Amount::coin(1_000_000))];
            exec(ctx, &d.registry, who, d.token, "Approve", &approve).unwrap();
        }
        ctx.set_generator(&H1, Some(Hash([1u8; 32])));
        ctx.set_generator(&H2, Some(Hash([2u8; 32])));
        d
    }

    fn run(ctx: &mut Context, d: &Deployed, counts: &[(Address, u32)]) -> RewardMap {
        let header = Header { height: ctx.target_height(), ..Default::default() };
        let counts: GeneratorCounts = counts.iter().copied().collect();
        interactor::reward(ctx, &d.registry, d.formulator, &header, &counts).unwrap()
    }

    fn next_block(ctx: &mut Context) {
        let ts = ctx.timestamp() + 1;
        ctx.next_context(ctx.prev_hash(), ts);
    }

    fn stake(ctx: &mut Context, d: &Deployed, hyper: Address, coins: u64) {
        let args = [Value::Address(hyper), Value::Amount(Amount::coin(coins))];
        exec(ctx, &d.registry, STAKER, d.formulator, "Stake", &args).unwrap();
    }

    #[test]
    fn stakers_share_hyper_rewards() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx, 150);

        // block N: stake, then the round records the reference amounts
        stake(&mut ctx, &d, H1, 100);
        stake(&mut ctx, &d, H2, 50);
        assert!(run(&mut ctx, &d, &[]).is_empty());
        let before = balance(&mut ctx, &d, &STAKER);

        // block N+1: each hyper produced one block
        next_block(&mut ctx);
        let minted = run(&mut ctx, &d, &[(H1, 1), (H2, 1)]);

        let base = Amount::coin(1_300_000);
        let ratio = Amount::coin(300).div(&(base.clone() + base.clone() + Amount::coin(70) + Amount::coin(35)));
        let paid = |staking_power: u64, stake: u64| {
            let stack = Amount::coin(staking_power).mul(&ratio);
            let share = Amount::coin(stake).mul(&stack.div(&Amount::coin(stake)));
            let commission = share.mul_c(50).div_c(1000);
            (share.saturating_sub(&commission), commission)
        };
        let (s1, c1) = paid(70, 100);
        let (s2, c2) = paid(35, 50);

        let to_staker = s1 + s2;
        assert_eq!(minted.get(&STAKER), Some(&to_staker));
        assert_eq!(balance(&mut ctx, &d, &STAKER), before + to_staker.clone());
        assert_eq!(minted.get(&H1), Some(&(base.mul(&ratio) + c1)));
        assert_eq!(minted.get(&H2), Some(&(base.mul(&ratio) + c2)));

        // roughly (70 + 35) / 2600105 of 300, less the 5% commission
        assert!(to_staker > Amount::from_raw(11_500_000_000_000_000));
        assert!(to_staker < Amount::from_raw(11_600_000_000_000_000));

        let total: Amount = minted.values().cloned().sum();
        assert!(total <= Amount::coin(300));
        let stack = exec(&mut ctx, &d.registry, addr(9), d.formulator, "StackReward", &[Value::Address(H1)]).unwrap();
        assert_eq!(stack, vec![Value::Amount(Amount::zero())]);
    }

    #[test]
    fn fresh_stake_earns_nothing_in_its_first_round() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx, 150);

        stake(&mut ctx, &d, H1, 100);
        let minted = run(&mut ctx, &d, &[(H1, 1)]);
        assert!(minted.get(&STAKER).is_none());
        let ratio = Amount::coin(150).div(&Amount::coin(1_300_000));
        assert_eq!(minted.get(&H1), Some(&Amount::coin(1_300_000).mul(&ratio)));

        // the next round sees the stake as held across the boundary
        next_block(&mut ctx);
        let minted = run(&mut ctx, &d, &[(H1, 1)]);
        assert!(minted.get(&STAKER).is_some());
    }

    #[test]
    fn formulator_owner_pays_mining_fee() {
        for (rules, fee_split) in [(ForkRules::default(), true), (ForkRules::none(), false)] {
            let loader = EmptyLoader::default();
            let mut ctx = Context::new(&loader);
            ctx.set_fork_rules(rules);
            let d = setup(&mut ctx, 1);
            exec(&mut ctx, &d.registry, MASTER, d.formulator, "CreateGenesisAlpha", &[Value::Address(OWNER)]).unwrap();
            // three coins of fees in the pool
            exec(&mut ctx, &d.registry, Address::ZERO, d.token, "ChargeFee", &[Value::Address(STAKER), Value::Amount(Amount::coin(3))])
                .unwrap();
            next_block(&mut ctx);

            let minted = run(&mut ctx, &d, &[(H1, 2)]);
            // alpha: 200000 x 2, hyper: 1000000 x 2 x 1.3
            let total = Amount::coin(5);
            let ratio = total.div(&Amount::coin(3_000_000));
            let reward = Amount::coin(400_000).mul(&ratio);
            let fee_address = testing::reward_policy().mining_fee_address;
            if fee_split {
                let fee = reward.mul_c(300).div_c(1000);
                assert_eq!(minted.get(&fee_address), Some(&fee));
                assert_eq!(minted.get(&OWNER), Some(&reward.saturating_sub(&fee)));
            } else {
                assert!(minted.get(&fee_address).is_none());
                assert_eq!(minted.get(&OWNER), Some(&reward));
            }
            assert_eq!(minted.get(&H1), Some(&Amount::coin(2_600_000).mul(&ratio)));
            let collected = exec(&mut ctx, &d.registry, addr(9), d.token, "CollectedFee", &[]).unwrap();
            assert_eq!(collected, vec![Value::Amount(Amount::zero())]);
            let total_minted: Amount = minted.values().cloned().sum();
            assert!(total_minted <= total);
        }
    }

    #[test]
    fn fee_pool_is_reset_without_power() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx, 1);
        exec(&mut ctx, &d.registry, Address::ZERO, d.token, "ChargeFee", &[Value::Address(STAKER), Value::Amount(Amount::coin(3))])
            .unwrap();
        // a producer that is neither a formulator nor a generator has no power
        assert!(run(&mut ctx, &d, &[(addr(0x33), 4)]).is_empty());
        let collected = exec(&mut ctx, &d.registry, addr(9), d.token, "CollectedFee", &[]).unwrap();
        assert_eq!(collected, vec![Value::Amount(Amount::zero())]);
    }

    #[test]
    fn stack_without_stakers_is_cleared() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx, 1);
        let mut deferred = AmountMap::new();
        deferred.insert(H1, Amount::coin(40));
        ctx.set_contract_data(&d.formulator, &[TAG_STACK_REWARD_MAP], deferred.to_bytes().unwrap());

        let minted = run(&mut ctx, &d, &[(H1, 1)]);
        // only the base reward of the window, nothing from the stack
        assert_eq!(minted.keys().collect::<Vec<_>>(), vec![&H1]);
        let total: Amount = minted.values().cloned().sum();
        assert!(total <= Amount::coin(1));
        let stack = exec(&mut ctx, &d.registry, addr(9), d.formulator, "StackReward", &[Value::Address(H1)]).unwrap();
        assert_eq!(stack, vec![Value::Amount(Amount::zero())]);
    }
}
