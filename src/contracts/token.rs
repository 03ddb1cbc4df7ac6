/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The main token.
//!
//! Fungible balances with allowances. Minting is restricted to minters (set by the master), and the
//! chain charges transaction fees through `ChargeFee` into a collected-fee pool that the reward engine
//! drains with `SubCollectedFee`.

use std::io::{Read, Write};

use crate::codec::{Decode, Encode, SumReader, SumWriter, Value, ValueKind};
use crate::context::ContractContext;
use crate::contract::{dispatch, Args, Contract, ContractClass, Method};
use crate::error::{CodecError, ContractError};
use crate::types::{Address, Amount, AMOUNT_DECIMALS};

use super::{key, load_amount, store_amount};

const TAG_NAME: u8 = 0x01;
const TAG_SYMBOL: u8 = 0x02;
const TAG_TOTAL_SUPPLY: u8 = 0x03;
const TAG_COLLECTED_FEE: u8 = 0x04;
const TAG_BALANCE: u8 = 0x10;
const TAG_ALLOWANCE: u8 = 0x11;
const TAG_MINTER: u8 = 0x12;

/// Arguments of `OnCreate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInit {
    pub name: String,
    pub symbol: String,
    /// Initial balances, minted at creation.
    pub balances: Vec<(Address, Amount)>,
}

impl Encode for TokenInit {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_string(&self.name)?;
        w.write_string(&self.symbol)?;
        w.write_u32(u32::try_from(self.balances.len()).map_err(|_| CodecError::InvalidLength)?)?;
        for (addr, amount) in &self.balances {
            w.write(addr)?;
            w.write_amount(amount)?;
        }
        Ok(())
    }
}

impl Decode for TokenInit {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        let name = r.read_string()?;
        let symbol = r.read_string()?;
        let len = r.read_u32()?;
        let mut balances = Vec::new();
        for _ in 0..len {
            let addr: Address = r.read()?;
            balances.push((addr, r.read_amount()?));
        }
        Ok(Self { name, symbol, balances })
    }
}

#[derive(Debug, Default)]
pub struct Token;

impl ContractClass for Token {
    const CLASS_NAME: &'static str = "contracts.Token";
}

impl Token {
    const METHODS: &'static [Method<Token>] = &[
        Method { name: "Name", args: &[], handler: Token::name },
        Method { name: "Symbol", args: &[], handler: Token::symbol },
        Method { name: "Decimals", args: &[], handler: Token::decimals },
        Method { name: "TotalSupply", args: &[], handler: Token::total_supply },
        Method { name: "BalanceOf", args: &[ValueKind::Address], handler: Token::balance_of },
        Method { name: "Transfer", args: &[ValueKind::Address, ValueKind::Amount], handler: Token::transfer },
        Method { name: "Approve", args: &[ValueKind::Address, ValueKind::Amount], handler: Token::approve },
        Method { name: "Allowance", args: &[ValueKind::Address, ValueKind::Address], handler: Token::allowance },
        Method {
            name: "TransferFrom",
            args: &[ValueKind::Address, ValueKind::Address, ValueKind::Amount],
            handler: Token::transfer_from,
        },
        Method { name: "Mint", args: &[ValueKind::Address, ValueKind::Amount], handler: Token::mint },
        Method { name: "Burn", args: &[ValueKind::Amount], handler: Token::burn },
        Method { name: "SetMinter", args: &[ValueKind::Address, ValueKind::Bool], handler: Token::set_minter },
        Method { name: "IsMinter", args: &[ValueKind::Address], handler: Token::is_minter_method },
        Method { name: "ChargeFee", args: &[ValueKind::Address, ValueKind::Amount], handler: Token::charge_fee },
        Method { name: "CollectedFee", args: &[], handler: Token::collected_fee },
        Method { name: "SubCollectedFee", args: &[ValueKind::Amount], handler: Token::sub_collected_fee },
    ];

    /* ↓↓↓ State ↓↓↓ */

    fn balance(cc: &ContractContext, owner: &Address) -> Amount {
        load_amount(cc, &key(TAG_BALANCE, &[owner.as_bytes()]))
    }

    fn set_balance(cc: &mut ContractContext, owner: &Address, amount: &Amount) {
        store_amount(cc, &key(TAG_BALANCE, &[owner.as_bytes()]), amount)
    }

    fn allowance_of(cc: &ContractContext, owner: &Address, spender: &Address) -> Amount {
        load_amount(cc, &key(TAG_ALLOWANCE, &[owner.as_bytes(), spender.as_bytes()]))
    }

    fn set_allowance(cc: &mut ContractContext, owner: &Address, spender: &Address, amount: &Amount) {
        store_amount(cc, &key(TAG_ALLOWANCE, &[owner.as_bytes(), spender.as_bytes()]), amount)
    }

    fn is_minter(cc: &ContractContext, addr: &Address) -> bool {
        cc.contract_data(&key(TAG_MINTER, &[addr.as_bytes()])).is_some()
    }

    fn add_balance(cc: &mut ContractContext, owner: &Address, amount: &Amount) {
        let balance = Self::balance(cc, owner) + amount.clone();
        Self::set_balance(cc, owner, &balance);
    }

    fn sub_balance(cc: &mut ContractContext, owner: &Address, amount: &Amount) -> Result<(), ContractError> {
        let balance = Self::balance(cc, owner)
            .checked_sub(amount)
            .ok_or(ContractError::InsufficientBalance)?;
        Self::set_balance(cc, owner, &balance);
        Ok(())
    }

    fn move_balance(cc: &mut ContractContext, from: &Address, to: &Address, amount: &Amount) -> Result<(), ContractError> {
        Self::sub_balance(cc, from, amount)?;
        Self::add_balance(cc, to, amount);
        Ok(())
    }

    fn mint_to(cc: &mut ContractContext, to: &Address, amount: &Amount) {
        Self::add_balance(cc, to, amount);
        let supply = load_amount(cc, &[TAG_TOTAL_SUPPLY]) + amount.clone();
        store_amount(cc, &[TAG_TOTAL_SUPPLY], &supply);
    }

    /* ↓↓↓ Methods ↓↓↓ */

    fn name(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        let name = cc.contract_data(&[TAG_NAME]).unwrap_or_default();
        Ok(vec![Value::String(String::from_utf8(name).map_err(|_| CodecError::InvalidUtf8)?)])
    }

    fn symbol(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        let symbol = cc.contract_data(&[TAG_SYMBOL]).unwrap_or_default();
        Ok(vec![Value::String(String::from_utf8(symbol).map_err(|_| CodecError::InvalidUtf8)?)])
    }

    fn decimals(&self, _: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::U8(AMOUNT_DECIMALS as u8)])
    }

    fn total_supply(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Amount(load_amount(cc, &[TAG_TOTAL_SUPPLY]))])
    }

    fn balance_of(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Amount(Self::balance(cc, &args.address(0)?))])
    }

    fn transfer(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let from = cc.from();
        Self::move_balance(cc, &from, &args.address(0)?, &args.amount(1)?)?;
        Ok(vec![])
    }

    fn approve(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let owner = cc.from();
        Self::set_allowance(cc, &owner, &args.address(0)?, &args.amount(1)?);
        Ok(vec![])
    }

    fn allowance(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Amount(Self::allowance_of(cc, &args.address(0)?, &args.address(1)?))])
    }

    fn transfer_from(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let spender = cc.from();
        let owner = args.address(0)?;
        let to = args.address(1)?;
        let amount = args.amount(2)?;

        let allowance = Self::allowance_of(cc, &owner, &spender)
            .checked_sub(&amount)
            .ok_or(ContractError::InsufficientAllowance)?;
        Self::set_allowance(cc, &owner, &spender, &allowance);
        Self::move_balance(cc, &owner, &to, &amount)?;
        Ok(vec![])
    }

    fn mint(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        if !Self::is_minter(cc, &cc.from()) {
            return Err(ContractError::NotAllowed);
        }
        Self::mint_to(cc, &args.address(0)?, &args.amount(1)?);
        Ok(vec![])
    }

    fn burn(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        let from = cc.from();
        let amount = args.amount(0)?;
        Self::sub_balance(cc, &from, &amount)?;
        let supply = load_amount(cc, &[TAG_TOTAL_SUPPLY]).saturating_sub(&amount);
        store_amount(cc, &[TAG_TOTAL_SUPPLY], &supply);
        Ok(vec![])
    }

    fn set_minter(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        if cc.from() != cc.master() {
            return Err(ContractError::NotAllowed);
        }
        let minter = args.address(0)?;
        let value = if args.bool(1)? { vec![1] } else { vec![] };
        cc.set_contract_data(&key(TAG_MINTER, &[minter.as_bytes()]), value);
        Ok(vec![])
    }

    fn is_minter_method(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Bool(Self::is_minter(cc, &args.address(0)?))])
    }

    /// Moves a transaction fee from the payer into the collected-fee pool. Chain only.
    fn charge_fee(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        if cc.from() != Address::ZERO {
            return Err(ContractError::NotAllowed);
        }
        let amount = args.amount(1)?;
        Self::sub_balance(cc, &args.address(0)?, &amount)?;
        let collected = load_amount(cc, &[TAG_COLLECTED_FEE]) + amount;
        store_amount(cc, &[TAG_COLLECTED_FEE], &collected);
        Ok(vec![])
    }

    fn collected_fee(&self, cc: &mut ContractContext, _: Args) -> Result<Vec<Value>, ContractError> {
        Ok(vec![Value::Amount(load_amount(cc, &[TAG_COLLECTED_FEE]))])
    }

    /// Drains the collected-fee pool. The drained amount leaves circulation; minters re-mint it as
    /// rewards.
    fn sub_collected_fee(&self, cc: &mut ContractContext, args: Args) -> Result<Vec<Value>, ContractError> {
        if !Self::is_minter(cc, &cc.from()) {
            return Err(ContractError::NotAllowed);
        }
        let collected = load_amount(cc, &[TAG_COLLECTED_FEE])
            .checked_sub(&args.amount(0)?)
            .ok_or(ContractError::InsufficientBalance)?;
        store_amount(cc, &[TAG_COLLECTED_FEE], &collected);
        Ok(vec![])
    }
}

impl Contract for Token {
    fn on_create(&self, cc: &mut ContractContext, args: &[u8]) -> Result<(), ContractError> {
        let init = TokenInit::from_bytes(args)?;
        cc.set_contract_data(&[TAG_NAME], init.name.into_bytes());
        cc.set_contract_data(&[TAG_SYMBOL], init.symbol.into_bytes());
        for (addr, amount) in &init.balances {
            Self::mint_to(cc, addr, amount);
        }
        Ok(())
    }

    fn call(&self, cc: &mut ContractContext, method: &str, args: &[Value]) -> Result<Vec<Value>, ContractError> {
        dispatch(self, Self::METHODS, cc, method, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::contract::{exec, single};
    use crate::contracts::testing::{self, addr, balance, Deployed, MASTER};

    fn setup(ctx: &mut Context) -> Deployed {
        testing::deploy(
            ctx,
            vec![(addr(1), Amount::coin(100)), (addr(2), Amount::coin(50))],
            testing::formulator_policy(),
        )
    }

    fn call(ctx: &mut Context, d: &Deployed, from: Address, method: &str, args: &[Value]) -> Result<Vec<Value>, ContractError> {
        exec(ctx, &d.registry, from, d.token, method, args)
    }

    #[test]
    fn metadata_and_supply() {
        let loader = testing::empty_loader();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        assert_eq!(call(&mut ctx, &d, addr(1), "Name", &[]).unwrap(), vec![Value::String("Test".into())]);
        assert_eq!(call(&mut ctx, &d, addr(1), "Symbol", &[]).unwrap(), vec![Value::String("TST".into())]);
        assert_eq!(call(&mut ctx, &d, addr(1), "Decimals", &[]).unwrap(), vec![Value::U8(18)]);
        let supply = single(call(&mut ctx, &d, addr(1), "TotalSupply", &[]).unwrap(), |v| v.as_amount().cloned());
        assert_eq!(supply.unwrap(), Amount::coin(150));
    }

    #[test]
    fn transfer_and_allowance() {
        let loader = testing::empty_loader();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);

        call(&mut ctx, &d, addr(1), "Transfer", &[Value::Address(addr(3)), Value::Amount(Amount::coin(30))]).unwrap();
        assert_eq!(balance(&mut ctx, &d, &addr(1)), Amount::coin(70));
        assert_eq!(balance(&mut ctx, &d, &addr(3)), Amount::coin(30));

        let err = call(&mut ctx, &d, addr(3), "Transfer", &[Value::Address(addr(1)), Value::Amount(Amount::coin(31))]);
        assert!(matches!(err, Err(ContractError::InsufficientBalance)));

        call(&mut ctx, &d, addr(1), "Approve", &[Value::Address(addr(4)), Value::Amount(Amount::coin(10))]).unwrap();
        let args = [Value::Address(addr(1)), Value::Address(addr(5)), Value::Amount(Amount::coin(11))];
        assert!(matches!(call(&mut ctx, &d, addr(4), "TransferFrom", &args), Err(ContractError::InsufficientAllowance)));
        let args = [Value::Address(addr(1)), Value::Address(addr(5)), Value::Amount(Amount::coin(6))];
        call(&mut ctx, &d, addr(4), "TransferFrom", &args).unwrap();
        assert_eq!(balance(&mut ctx, &d, &addr(5)), Amount::coin(6));
        let left = call(&mut ctx, &d, addr(4), "Allowance", &[Value::Address(addr(1)), Value::Address(addr(4))]).unwrap();
        assert_eq!(left, vec![Value::Amount(Amount::coin(4))]);
    }

    #[test]
    fn minting_is_restricted() {
        let loader = testing::empty_loader();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let args = [Value::Address(addr(1)), Value::Amount(Amount::coin(1))];
        assert!(matches!(call(&mut ctx, &d, addr(1), "Mint", &args), Err(ContractError::NotAllowed)));
        assert!(matches!(
            call(&mut ctx, &d, addr(1), "SetMinter", &[Value::Address(addr(1)), Value::Bool(true)]),
            Err(ContractError::NotAllowed)
        ));
        call(&mut ctx, &d, MASTER, "SetMinter", &[Value::Address(addr(1)), Value::Bool(true)]).unwrap();
        call(&mut ctx, &d, addr(1), "Mint", &args).unwrap();
        assert_eq!(balance(&mut ctx, &d, &addr(1)), Amount::coin(101));
        assert_eq!(
            call(&mut ctx, &d, addr(9), "IsMinter", &[Value::Address(d.formulator)]).unwrap(),
            vec![Value::Bool(true)]
        );
    }

    #[test]
    fn fee_pool() {
        let loader = testing::empty_loader();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        let fee = [Value::Address(addr(2)), Value::Amount(Amount::coin(2))];
        assert!(matches!(call(&mut ctx, &d, addr(2), "ChargeFee", &fee), Err(ContractError::NotAllowed)));
        call(&mut ctx, &d, Address::ZERO, "ChargeFee", &fee).unwrap();
        assert_eq!(balance(&mut ctx, &d, &addr(2)), Amount::coin(48));
        assert_eq!(call(&mut ctx, &d, addr(9), "CollectedFee", &[]).unwrap(), vec![Value::Amount(Amount::coin(2))]);

        let sub = [Value::Amount(Amount::coin(2))];
        assert!(matches!(call(&mut ctx, &d, addr(2), "SubCollectedFee", &sub), Err(ContractError::NotAllowed)));
        call(&mut ctx, &d, d.formulator, "SubCollectedFee", &sub).unwrap();
        assert_eq!(call(&mut ctx, &d, addr(9), "CollectedFee", &[]).unwrap(), vec![Value::Amount(Amount::zero())]);
    }

    #[test]
    fn burn_reduces_supply() {
        let loader = testing::empty_loader();
        let mut ctx = Context::new(&loader);
        let d = setup(&mut ctx);
        call(&mut ctx, &d, addr(2), "Burn", &[Value::Amount(Amount::coin(20))]).unwrap();
        assert_eq!(balance(&mut ctx, &d, &addr(2)), Amount::coin(30));
        let supply = call(&mut ctx, &d, addr(2), "TotalSupply", &[]).unwrap();
        assert_eq!(supply, vec![Value::Amount(Amount::coin(130))]);
    }
}
