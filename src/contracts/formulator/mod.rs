/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Formulator tokens, staking and block rewards.
//!
//! A formulator is a token backed by an amount of the main token. Alphas are bought for
//! `alpha_amount`; `sigma_count` Alphas old enough merge into a Sigma and `omega_count` Sigmas into an
//! Omega. The fourth tier, Hyper, is not a token: it is any registered generator, and accounts stake on
//! Hypers to share their rewards. The contract is a reward hook; see [reward] for the distribution.
//!
//! Contract data tags:
//!
//! | tag | key | value |
//! |---|---|---|
//! | 0x01 | | main token address |
//! | 0x02 | | [FormulatorPolicy] |
//! | 0x03 | | [RewardPolicy] |
//! | 0x10 | id | [FormulatorRecord] |
//! | 0x11..0x13 | | live formulator set |
//! | 0x14 | owner | formulators owned |
//! | 0x15 | id | approved address |
//! | 0x20 | hyper, staker | staked amount |
//! | 0x21..0x23 | hyper | stakers of a hyper |
//! | 0x24..0x26 | | hypers with stakers |
//! | 0x30 | hyper | staking power map |
//! | 0x31 | | stack reward map |
//! | 0x32 | hyper | staking amounts at the last reward round |

pub(crate) mod index;
use index::AddressSet;

pub mod reward;

mod staking;

use std::io::{Read, Write};

use tracing::debug;

use crate::chain::block::Header;
use crate::codec::{Decode, Encode, SumReader, SumWriter, Value, ValueKind};
use crate::context::ContractContext;
use crate::contract::{dispatch, Args, Contract, ContractClass, GeneratorCounts, Method, RewardMap};
use crate::error::{CodecError, ContractError};
use crate::types::{formulator_token_id, Address, Amount};

use super::{key, load_address, load_decoded, load_u32, store_u32, token_pull, token_transfer};

pub(crate) const TAG_TOKEN: u8 = 0x01;
pub(crate) const TAG_POLICY: u8 = 0x02;
pub(crate) const TAG_REWARD_POLICY: u8 = 0x03;
pub(crate) const TAG_FORMULATOR: u8 = 0x10;
pub(crate) const TAG_NUMBER_INDEX: u8 = 0x11;
pub(crate) const TAG_REVERSE_INDEX: u8 = 0x12;
pub(crate) const TAG_COUNT: u8 = 0x13;
pub(crate) const TAG_OWNER_COUNT: u8 = 0x14;
pub(crate) const TAG_APPROVE: u8 = 0x15;
pub(crate) const TAG_STAKING_AMOUNT: u8 = 0x20;
pub(crate) const TAG_STAKING_NUMBER_INDEX: u8 = 0x21;
pub(crate) const TAG_STAKING_REVERSE_INDEX: u8 = 0x22;
pub(crate) const TAG_STAKING_COUNT: u8 = 0x23;
pub(crate) const TAG_STAKED_NUMBER_INDEX: u8 = 0x24;
pub(crate) const TAG_STAKED_REVERSE_INDEX: u8 = 0x25;
pub(crate) const TAG_STAKED_COUNT: u8 = 0x26;
pub(crate) const TAG_STAKING_POWER_MAP: u8 = 0x30;
pub(crate) const TAG_STACK_REWARD_MAP: u8 = 0x31;
pub(crate) const TAG_LAST_STAKING_AMOUNT_MAP: u8 = 0x32;

/// Live formulator tokens.
pub(crate) const FORMULATORS: AddressSet<'static> =
    AddressSet::new(TAG_NUMBER_INDEX, TAG_REVERSE_INDEX, TAG_COUNT, &[]);

/// Hypers with at least one staker, or whose stakers left since the last reward round.
pub(crate) const STAKED_HYPERS: AddressSet<'static> =
    AddressSet::new(TAG_STAKED_NUMBER_INDEX, TAG_STAKED_REVERSE_INDEX, TAG_STAKED_COUNT, &[]);

/// Stakers of `hyper`.
pub(crate) fn stakers(hyper: &Address) -> AddressSet<'_> {
    AddressSet::new(TAG_STAKING_NUMBER_INDEX, TAG_STAKING_REVERSE_INDEX, TAG_STAKING_COUNT, hyper.as_bytes())
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormulatorKind {
    Alpha = 1,
    Sigma = 2,
    Omega = 3,
}

impl TryFrom<u8> for FormulatorKind {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(FormulatorKind::Alpha),
            2 => Ok(FormulatorKind::Sigma),
            3 => Ok(FormulatorKind::Omega),
            _ => Err(CodecError::InvalidTypeTag(tag)),
        }
    }
}

/// A live formulator token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulatorRecord {
    pub kind: FormulatorKind,
    /// Height of creation or of the last promotion.
    pub height: u32,
    /// Backing amount of the main token.
    pub amount: Amount,
    pub owner: Address,
}

impl Encode for FormulatorRecord {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_u8(self.kind as u8)?;
        w.write_u32(self.height)?;
        w.write_amount(&self.amount)?;
        w.write(&self.owner)
    }
}

impl Decode for FormulatorRecord {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self {
            kind: FormulatorKind::try_from(r.read_u8()?)?,
            height: r.read_u32()?,
            amount: r.read_amount()?,
            owner: r.read()?,
        })
    }
}

/// Prices and merge rules of the formulator tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulatorPolicy {
    pub alpha_amount: Amount,
    /// Alphas consumed by a Sigma.
    pub sigma_count: u32,
    /// Minimum age, in blocks, of the Alphas merged into a Sigma.
    pub sigma_blocks: u32,
    /// Sigmas consumed by an Omega.
    pub omega_count: u32,
    pub omega_blocks: u32,
    /// Reward base of a Hyper.
    pub hyper_amount: Amount,
    pub min_stake_amount: Amount,
}

impl Encode for FormulatorPolicy {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_amount(&self.alpha_amount)?;
        w.write_u32(self.sigma_count)?;
        w.write_u32(self.sigma_blocks)?;
        w.write_u32(self.omega_count)?;
        w.write_u32(self.omega_blocks)?;
        w.write_amount(&self.hyper_amount)?;
        w.write_amount(&self.min_stake_amount)
    }
}

impl Decode for FormulatorPolicy {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self {
            alpha_amount: r.read_amount()?,
            sigma_count: r.read_u32()?,
            sigma_blocks: r.read_u32()?,
            omega_count: r.read_u32()?,
            omega_blocks: r.read_u32()?,
            hyper_amount: r.read_amount()?,
            min_stake_amount: r.read_amount()?,
        })
    }
}

/// Reward rates. Efficiencies and ratios are in thousandths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardPolicy {
    pub reward_per_block: Amount,
    pub alpha_efficiency_milli: u32,
    pub sigma_efficiency_milli: u32,
    pub omega_efficiency_milli: u32,
    pub hyper_efficiency_milli: u32,
    pub staking_efficiency_milli: u32,
    /// Share of a staker's reward kept by the Hyper.
    pub commission_ratio_milli: u32,
    pub mining_fee_address: Address,
    /// Share of a formulator owner's reward paid to the mining fee address.
    pub mining_fee_milli: u32,
}

impl RewardPolicy {
    pub fn efficiency(&self, kind: FormulatorKind) -> u32 {
        match kind {
            FormulatorKind::Alpha => self.alpha_efficiency_milli,
            FormulatorKind::Sigma => self.sigma_efficiency_milli,
            FormulatorKind::Omega => self.omega_efficiency_milli,
        }
    }
}

impl Encode for RewardPolicy {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_amount(&self.reward_per_block)?;
        w.write_u32(self.alpha_efficiency_milli)?;
        w.write_u32(self.sigma_efficiency_milli)?;
        w.write_u32(self.omega_efficiency_milli)?;
        w.write_u32(self.hyper_efficiency_milli)?;
        w.write_u32(self.staking_efficiency_milli)?;
        w.write_u32(self.commission_ratio_milli)?;
        w.write(&self.mining_fee_address)?;
        w.write_u32(self.mining_fee_milli)
    }
}

impl Decode for RewardPolicy {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self {
            reward_per_block: r.read_amount()?,
            alpha_efficiency_milli: r.read_u32()?,
            sigma_efficiency_milli: r.read_u32()?,
            omega_efficiency_milli: r.read_u32()?,
            hyper_efficiency_milli: r.read_u32()?,
            staking_efficiency_milli: r.read_u32()?,
            commission_ratio_milli: r.read_u32()?,
            mining_fee_address: r.read()?,
            mining_fee_milli: r.read_u32()?,
        })
    }
}

/// Arguments of `OnCreate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulatorInit {
    pub token: Address,
    pub policy: FormulatorPolicy,
    pub reward_policy: RewardPolicy,
}

impl Encode for FormulatorInit {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write(&self.token)?;
        w.write(&self.policy)?;
        w.write(&self.reward_policy)
    }
}

impl Decode for FormulatorInit {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self { token: r.read()?, policy: r.read()?, reward_policy: r.read()? })
    }
}

#[derive(Debug, Default)]
pub struct Formulator;

impl ContractClass for Formulator {
    const CLASS_NAME: &'static str = "contracts.Formulator";
}

impl Formulator {
    const METHODS: &'static [Method<Formulator>] = &[
        Method { name: "CreateAlpha", args: &[], handler: Formulator::create_alpha },
        Method { name: "CreateGenesisAlpha", args: &[ValueKind::Address], handler: Formulator::create_genesis_alpha },
        Method { name: "CreateSigma", args: &[ValueKind::AddressArray], handler: Formulator::create_sigma },
        Method { name: "CreateOmega", args: &[ValueKind::AddressArray], handler: Formulator::create_omega },
        Method { name: "Revoke", args: &[ValueKind::Address], handler: Formulator::revoke },
        Method { name: "Approve", args: &[ValueKind::Address, ValueKind::Address], handler: Formulator::approve },
        Method { name: "GetApproved", args: &[ValueKind::Address], handler: Formulator::get_approved },
        Method {
            name: "TransferFrom",
            args: &[ValueKind::Address, ValueKind::Address, ValueKind::Address],
            handler: Formulator::transfer_from,
        },
        Method { name: "BalanceOf", args: &[ValueKind::Address], handler: Formulator::balance_of },
        Method { name: "OwnerOf", args: &[ValueKind::Address], handler: Formulator::owner_of },
        Method { name: "Formulator", args: &[ValueKind::Address], handler: Formulator::formulator },
        Method { name: "FormulatorCount", args: &[], handler: Formulator::formulator_count },
        Method { name: "Stake", args: &[ValueKind::Address, ValueKind::Amount], handler: Formulator::stake },
        Method { name: "Unstake", args: &[ValueKind::Address, ValueKind::Amount], handler: Formulator::unstake },
        Method {
            name: "StakingAmount",
            args: &[ValueKind::Address, ValueKind::Address],
            handler: Formulator::staking_amount,
        },
        Method { name: "StakingAmountMap", args: &[ValueKind::Address], handler: Formulator::staking_amount_map },
        Method { name: "StackReward", args: &[ValueKind::Address], handler: Formulator::stack_reward },
        Method { name: "RewardPolicy", args: &[], handler: Formulator::reward_policy },
        Method { name: "SetRewardPolicy", args: &[ValueKind::Bytes], handler: Formulator::set_reward_policy },
        Method { name: "FormulatorPolicy", args: &[], handler: Formulator::formulator_policy },
    ];

    /* ↓↓↓ State ↓↓↓ */

    pub(crate) fn token(cc: &ContractContext) -> Result<Address, ContractError> {
        load_address(cc, &[TAG_TOKEN]).ok_or_else(|| anyhow::anyhow!("formulator token is not set").into())
    }

    pub(crate) fn policy(cc: &ContractContext) -> Result<FormulatorPolicy, ContractError> {
        load_decoded(cc, &[TAG_POLICY])?.ok_or_else(|| anyhow::anyhow!("formulator policy is not set").into())
    }

    pub(crate) fn rewards(cc: &ContractContext) -> Result<RewardPolicy, ContractError> {
        load_decoded(cc, &[TAG_REWARD_POLICY])?.ok_or_else(|| anyhow::anyhow!("reward policy is not set").into())
    }

    pub(crate) fn record(cc: &ContractContext, id: &Address) -> Result<Option<FormulatorRecord>, ContractError> {
        load_decoded(cc, &key(TAG_FORMULATOR, &[id.as_bytes()]))
    }

    fn live_record(cc: &ContractContext, id: &Address) -> Result<FormulatorRecord, ContractError> {
        Self::record(cc, id)?.ok_or(ContractError::NotExistFormulator(*id))
    }

    fn set_record(cc: &mut ContractContext, id: &Address, record: &FormulatorRecord) -> Result<(), ContractError> {
        cc.set_contract_data(&key(TAG_FORMULATOR, &[id.as_bytes()]), record.to_bytes()?);
        Ok(())
    }

    /// Removes the token, its approval and its slot in the live set.
    fn burn(cc: &mut ContractContext, id: &Address, record: &FormulatorRecord) {
        cc.set_contract_data(&key(TAG_FORMULATOR, &[id.as_bytes()]), Vec::new());
        cc.set_contract_data(&key(TAG_APPROVE, &[id.as_bytes()]), Vec::new());
        FORMULATORS.remove(cc, id);
        Self::add_owner_count(cc, &record.owner, -1);
    }

    fn owner_count(cc: &ContractContext, owner: &Address) -> u32 {
        load_u32(cc, &key(TAG_OWNER_COUNT, &[owner.as_bytes()]))
    }

    fn add_owner_count(cc: &mut ContractContext, owner: &Address, delta: i64) {
        let count = (i64::from(Self::owner_count(cc, owner)) + delta).max(0);
        store_u32(cc, &key(TAG_OWNER_COUNT, &[owner.as_bytes()]), count as u32);
    }

    fn approved(cc: &ContractContext, id: &Address) -> Address {
        load_address(cc, &key(TAG_APPROVE, &[id.as_bytes()])).unwrap_or(Address::ZERO)
    }

    fn mint_token(cc: &mut ContractContext, owner: &Address, amount: Amount) -> Result<Address, ContractError> {
        let height = cc.target_height();
        let seq = cc.next_seq();
        let id = formulator_token_id(height, owner, seq);
        let record = FormulatorRecord { kind: FormulatorKind::Alpha, height, amount, owner: *owner };
        Self::set_record(cc, &id, &record)?;
        FORMULATORS.insert(cc, &id);
        Self::add_owner_count(cc, owner, 1);
        debug!(%id, %owner, height, "alpha formulator created");
        Ok(id)
    }

    /// Merges `ids` into the first of them, promoted to `target`.
    fn promote(cc: &mut ContractContext, ids: &[Address], target: FormulatorKind) -> Result<Address, ContractError> {
        let policy = Self::policy(cc)?;
        let (input, count, blocks) = match target {
            FormulatorKind::Sigma => (FormulatorKind::Alpha, policy.sigma_count, policy.sigma_blocks),
            FormulatorKind::Omega => (FormulatorKind::Sigma, policy.omega_count, policy.omega_blocks),
            FormulatorKind::Alpha => return Err(ContractError::InvalidFormulatorType),
        };
        let count_error = || match target {
            FormulatorKind::Sigma => ContractError::InvalidSigmaCreationCount,
            _ => ContractError::InvalidOmegaCreationCount,
        };
        let blocks_error = || match target {
            FormulatorKind::Sigma => ContractError::InvalidSigmaCreationBlocks,
            _ => ContractError::InvalidOmegaCreationBlocks,
        };

        if ids.len() != count as usize {
            return Err(count_error());
        }
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();
        if unique.len() != ids.len() {
            return Err(count_error());
        }

        let from = cc.from();
        let height = cc.target_height();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let record = Self::live_record(cc, id)?;
            if record.owner != from {
                return Err(ContractError::NotFormulatorOwner);
            }
            if record.kind != input {
                return Err(ContractError::InvalidFormulatorType);
            }
            if u64::from(height) < u64::from(record.height) + u64::from(blocks) {
                return Err(blocks_error());
            }
            records.push(record);
        }

        let amount: Amount = records.iter().map(|r| r.amount.clone()).sum();
        for (id, record) in ids.iter().zip(&records).skip(1) {
            Self::burn(cc, id, record);
        }
        let survivor = ids[0];
        let record = FormulatorRecord { kind: target, height, amount, owner: from };
        Self::set_record(cc, &survivor, &record)?;
        cc.set_contract_data(&key(TAG_APPROVE, &[survivor.as_bytes()]), Vec::new());
        debug!(id = %survivor, kind = ?target, amount = %record.amount, "formulator promoted");
        Ok(survivor)
    }

    /* ↓↓↓ Methods ↓↓↓ */

    fn create_alpha(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        let policy = Self::policy(cc)?;
        let token = Self::token(cc)?;
        let owner = cc.from();
        token_pull(cc, &token, &owner, &policy.alpha_amount)?;
        let id = Self::mint_token(cc, &owner, policy.alpha_amount)?;
        Ok(vec![Value::Address(id)])
    }

    /// Creates an Alpha for `owner`, paid by the master.
    fn create_genesis_alpha(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        if cc.from() != cc.master() {
            return Err(ContractError::NotAllowed);
        }
        let policy = Self::policy(cc)?;
        let token = Self::token(cc)?;
        let master = cc.master();
        token_pull(cc, &token, &master, &policy.alpha_amount)?;
        let id = Self::mint_token(cc, &args.address(0)?, policy.alpha_amount)?;
        Ok(vec![Value::Address(id)])
    }

    fn create_sigma(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let id = Self::promote(cc, args.address_array(0)?, FormulatorKind::Sigma)?;
        Ok(vec![Value::Address(id)])
    }

    fn create_omega(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let id = Self::promote(cc, args.address_array(0)?, FormulatorKind::Omega)?;
        Ok(vec![Value::Address(id)])
    }

    /// Burns the token and returns its backing amount to the owner.
    fn revoke(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let id = args.address(0)?;
        let record = Self::live_record(cc, &id)?;
        if record.owner != cc.from() {
            return Err(ContractError::NotFormulatorOwner);
        }
        Self::burn(cc, &id, &record);
        let token = Self::token(cc)?;
        token_transfer(cc, &token, &record.owner, &record.amount)?;
        debug!(%id, owner = %record.owner, "formulator revoked");
        Ok(vec![])
    }

    fn approve(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let to = args.address(0)?;
        let id = args.address(1)?;
        if Self::live_record(cc, &id)?.owner != cc.from() {
            return Err(ContractError::NotFormulatorOwner);
        }
        let value = if to.is_zero() { Vec::new() } else { to.as_bytes().to_vec() };
        cc.set_contract_data(&key(TAG_APPROVE, &[id.as_bytes()]), value);
        Ok(vec![])
    }

    fn get_approved(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let id = args.address(0)?;
        Self::live_record(cc, &id)?;
        Ok(vec![Value::Address(Self::approved(cc, &id))])
    }

    fn transfer_from(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let from = args.address(0)?;
        let to = args.address(1)?;
        let id = args.address(2)?;
        let mut record = Self::live_record(cc, &id)?;
        if record.owner != from {
            return Err(ContractError::NotFormulatorOwner);
        }
        let caller = cc.from();
        if caller != from && Self::approved(cc, &id) != caller {
            return Err(ContractError::NotAllowed);
        }
        record.owner = to;
        Self::set_record(cc, &id, &record)?;
        cc.set_contract_data(&key(TAG_APPROVE, &[id.as_bytes()]), Vec::new());
        Self::add_owner_count(cc, &from, -1);
        Self::add_owner_count(cc, &to, 1);
        Ok(vec![])
    }

    fn balance_of(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::U32(Self::owner_count(cc, &args.address(0)?))])
    }

    fn owner_of(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Address(Self::live_record(cc, &args.address(0)?)?.owner)])
    }

    /// Returns `(kind, height, amount, owner)`.
    fn formulator(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let record = Self::live_record(cc, &args.address(0)?)?;
        Ok(vec![
            Value::U8(record.kind as u8),
            Value::U32(record.height),
            Value::Amount(record.amount),
            Value::Address(record.owner),
        ])
    }

    fn formulator_count(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::U32(FORMULATORS.len(cc))])
    }

    fn reward_policy(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Bytes(Self::rewards(cc)?.to_bytes()?)])
    }

    fn set_reward_policy(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        if cc.from() != cc.master() {
            return Err(ContractError::NotAllowed);
        }
        let policy = RewardPolicy::from_bytes(args.bytes(0)?)?;
        cc.set_contract_data(&[TAG_REWARD_POLICY], policy.to_bytes()?);
        Ok(vec![])
    }

    fn formulator_policy(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Bytes(Self::policy(cc)?.to_bytes()?)])
    }
}

impl Contract for Formulator {
    fn on_create(&self, cc: &mut ContractContext, args: &[u8]) -> Result<(), ContractError> {
        let init = FormulatorInit::from_bytes(args)?;
        cc.set_contract_data(&[TAG_TOKEN], init.token.as_bytes().to_vec());
        cc.set_contract_data(&[TAG_POLICY], init.policy.to_bytes()?);
        cc.set_contract_data(&[TAG_REWARD_POLICY], init.reward_policy.to_bytes()?);
        Ok(())
    }

    fn call(&self, cc: &mut ContractContext, method: &str, args: &[Value]) -> Result<Vec<Value>, ContractError> {
        dispatch(self, Self::METHODS, cc, method, args)
    }

    fn has_reward_hook(&self) -> bool {
        true
    }

    fn on_reward(
        &self,
        cc: &mut ContractContext,
        header: &Header,
        counts: &GeneratorCounts,
    ) -> Result<RewardMap, ContractError> {
        reward::distribute(cc, header, counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, EmptyLoader};
    use crate::contract::exec;
    use crate::contracts::testing::{self, addr, balance, Deployed, MASTER};

    /// Scenario owner of the merge tests.
    const OWNER: Address = Address([0x50; 20]);

    fn setup(ctx: &mut Context) -> Deployed {
        let d = testing::deploy(
            ctx,
            vec![(MASTER, Amount::coin(10_000_000)), (OWNER, Amount::coin(1_000_000))],
            testing::formulator_policy(),
        );
        let approve = [Value::Address(d.formulator), Value::Amount(Amount::coin(10_000_000))];
        exec(ctx, &d.registry, MASTER, d.token, "Approve", &approve).unwrap();
        exec(ctx, &d.registry, OWNER, d.token, "Approve", &approve).unwrap();
        d
    }

    fn call(ctx: &mut Context, d: &Deployed, from: Address, method: &str, args: &[Value]) -> Result<Vec<Value>, ContractError> {
        exec(ctx, &d.registry, from, d.formulator, method, args)
    }

    fn id_of(out: Vec<Value>) -> Address {
        out[0].as_address().unwrap()
    }

    /// Moves the context `blocks` blocks forward.
    fn advance(ctx: &mut Context, blocks: u32) {
        for _ in 0..blocks {
            let ts = ctx.timestamp() + 1;
            ctx.next_context(ctx.prev_hash(), ts);
        }
    }

    fn alphas(ctx: &mut Context, d: &Deployed, n: usize) -> Vec<Address> {
        (0..n).map(|_| id_of(call(ctx, d, MASTER, "CreateGenesisAlpha", &[Value::Address(OWNER)]).unwrap())).collect()
    }

    #[test]
    fn create_alpha_pulls_alpha_amount() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);

        let id = id_of(call(&mut ctx, &d, OWNER, "CreateAlpha", &[]).unwrap());
        assert_eq!(balance(&mut ctx, &d, &OWNER), Amount::coin(800_000));
        assert_eq!(balance(&mut ctx, &d, &d.formulator), Amount::coin(200_000));
        let out = call(&mut ctx, &d, OWNER, "Formulator", &[Value::Address(id)]).unwrap();
        assert_eq!(
            out,
            vec![Value::U8(1), Value::U32(0), Value::Amount(Amount::coin(200_000)), Value::Address(OWNER)]
        );
        assert_eq!(call(&mut ctx, &d, OWNER, "BalanceOf", &[Value::Address(OWNER)]).unwrap(), vec![Value::U32(1)]);
        assert!(matches!(
            call(&mut ctx, &d, OWNER, "CreateGenesisAlpha", &[Value::Address(OWNER)]),
            Err(ContractError::NotAllowed)
        ));
    }

    #[test]
    fn sigma_merges_three_alphas() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let ids = alphas(&mut ctx, &d, 3);
        advance(&mut ctx, 200);

        let out = call(&mut ctx, &d, OWNER, "CreateSigma", &[Value::AddressArray(ids.clone())]).unwrap();
        assert_eq!(id_of(out), ids[0]);
        let out = call(&mut ctx, &d, OWNER, "Formulator", &[Value::Address(ids[0])]).unwrap();
        assert_eq!(out[0], Value::U8(FormulatorKind::Sigma as u8));
        assert_eq!(out[2], Value::Amount(Amount::coin(600_000)));
        for id in &ids[1..] {
            assert!(matches!(
                call(&mut ctx, &d, OWNER, "OwnerOf", &[Value::Address(*id)]),
                Err(ContractError::NotExistFormulator(_))
            ));
        }
        assert_eq!(call(&mut ctx, &d, OWNER, "FormulatorCount", &[]).unwrap(), vec![Value::U32(1)]);
        assert_eq!(call(&mut ctx, &d, OWNER, "BalanceOf", &[Value::Address(OWNER)]).unwrap(), vec![Value::U32(1)]);
    }

    #[test]
    fn sigma_before_maturity_fails() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let ids = alphas(&mut ctx, &d, 3);
        advance(&mut ctx, 199);

        assert!(matches!(
            call(&mut ctx, &d, OWNER, "CreateSigma", &[Value::AddressArray(ids.clone())]),
            Err(ContractError::InvalidSigmaCreationBlocks)
        ));
        assert!(matches!(
            call(&mut ctx, &d, OWNER, "CreateSigma", &[Value::AddressArray(ids[..2].to_vec())]),
            Err(ContractError::InvalidSigmaCreationCount)
        ));
        let dup = vec![ids[0], ids[0], ids[1]];
        assert!(matches!(
            call(&mut ctx, &d, OWNER, "CreateSigma", &[Value::AddressArray(dup)]),
            Err(ContractError::InvalidSigmaCreationCount)
        ));
        advance(&mut ctx, 1);
        assert!(matches!(
            call(&mut ctx, &d, addr(3), "CreateSigma", &[Value::AddressArray(ids.clone())]),
            Err(ContractError::NotFormulatorOwner)
        ));
        call(&mut ctx, &d, OWNER, "CreateSigma", &[Value::AddressArray(ids)]).unwrap();
    }

    #[test]
    fn omega_merges_sigmas() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let a = alphas(&mut ctx, &d, 3);
        let b = alphas(&mut ctx, &d, 3);
        advance(&mut ctx, 200);
        let s1 = id_of(call(&mut ctx, &d, OWNER, "CreateSigma", &[Value::AddressArray(a.clone())]).unwrap());
        let s2 = id_of(call(&mut ctx, &d, OWNER, "CreateSigma", &[Value::AddressArray(b)]).unwrap());

        // promotion resets the age
        advance(&mut ctx, 299);
        let sigmas = Value::AddressArray(vec![s1, s2]);
        assert!(matches!(
            call(&mut ctx, &d, OWNER, "CreateOmega", &[sigmas.clone()]),
            Err(ContractError::InvalidOmegaCreationBlocks)
        ));
        advance(&mut ctx, 1);
        let omega = id_of(call(&mut ctx, &d, OWNER, "CreateOmega", &[sigmas]).unwrap());
        assert_eq!(omega, s1);
        let out = call(&mut ctx, &d, OWNER, "Formulator", &[Value::Address(omega)]).unwrap();
        assert_eq!(out[0], Value::U8(FormulatorKind::Omega as u8));
        assert_eq!(out[2], Value::Amount(Amount::coin(1_200_000)));

        let c = alphas(&mut ctx, &d, 2);
        assert!(matches!(
            call(&mut ctx, &d, OWNER, "CreateOmega", &[Value::AddressArray(c)]),
            Err(ContractError::InvalidFormulatorType)
        ));
    }

    #[test]
    fn revoke_returns_backing_amount() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let id = id_of(call(&mut ctx, &d, OWNER, "CreateAlpha", &[]).unwrap());
        assert!(matches!(
            call(&mut ctx, &d, addr(3), "Revoke", &[Value::Address(id)]),
            Err(ContractError::NotFormulatorOwner)
        ));
        call(&mut ctx, &d, OWNER, "Revoke", &[Value::Address(id)]).unwrap();
        assert_eq!(balance(&mut ctx, &d, &OWNER), Amount::coin(1_000_000));
        assert_eq!(call(&mut ctx, &d, OWNER, "FormulatorCount", &[]).unwrap(), vec![Value::U32(0)]);
        assert_eq!(call(&mut ctx, &d, OWNER, "BalanceOf", &[Value::Address(OWNER)]).unwrap(), vec![Value::U32(0)]);
    }

    #[test]
    fn approved_transfer() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let id = id_of(call(&mut ctx, &d, OWNER, "CreateAlpha", &[]).unwrap());
        let spender = addr(4);
        let transfer = [Value::Address(OWNER), Value::Address(addr(5)), Value::Address(id)];

        assert!(matches!(call(&mut ctx, &d, spender, "TransferFrom", &transfer), Err(ContractError::NotAllowed)));
        call(&mut ctx, &d, OWNER, "Approve", &[Value::Address(spender), Value::Address(id)]).unwrap();
        assert_eq!(call(&mut ctx, &d, addr(9), "GetApproved", &[Value::Address(id)]).unwrap(), vec![Value::Address(spender)]);
        call(&mut ctx, &d, spender, "TransferFrom", &transfer).unwrap();

        assert_eq!(call(&mut ctx, &d, addr(9), "OwnerOf", &[Value::Address(id)]).unwrap(), vec![Value::Address(addr(5))]);
        assert_eq!(call(&mut ctx, &d, addr(9), "GetApproved", &[Value::Address(id)]).unwrap(), vec![Value::Address(Address::ZERO)]);
        assert_eq!(call(&mut ctx, &d, addr(9), "BalanceOf", &[Value::Address(addr(5))]).unwrap(), vec![Value::U32(1)]);
        assert_eq!(call(&mut ctx, &d, addr(9), "BalanceOf", &[Value::Address(OWNER)]).unwrap(), vec![Value::U32(0)]);
    }

    #[test]
    fn reward_policy_is_master_only() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let mut policy = testing::reward_policy();
        policy.reward_per_block = Amount::coin(7);
        let arg = [Value::Bytes(policy.to_bytes().unwrap())];

        assert!(matches!(call(&mut ctx, &d, OWNER, "SetRewardPolicy", &arg), Err(ContractError::NotAllowed)));
        call(&mut ctx, &d, MASTER, "SetRewardPolicy", &arg).unwrap();
        let out = call(&mut ctx, &d, OWNER, "RewardPolicy", &[]).unwrap();
        assert_eq!(RewardPolicy::from_bytes(out[0].as_bytes().unwrap()).unwrap(), policy);
        let out = call(&mut ctx, &d, OWNER, "FormulatorPolicy", &[]).unwrap();
        assert_eq!(FormulatorPolicy::from_bytes(out[0].as_bytes().unwrap()).unwrap(), testing::formulator_policy());
    }
}
