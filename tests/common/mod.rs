/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use pof_runtime::chain::ExitStatus;
use pof_runtime::codec::Value;
use pof_runtime::contracts::formulator::{FormulatorPolicy, RewardPolicy};
use pof_runtime::contracts::token::TokenInit;
use pof_runtime::store::SyncMode;
use pof_runtime::{
    Address, Amount, Block, BlockLog, Chain, ChainConfig, Genesis, Hash, SignedTx, Store, StoreConfig,
    SystemContracts, Transaction,
};

pub const CHAIN_ID: u64 = 7;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000_000;
pub const BLOCK_INTERVAL: u64 = 1_000;

pub const ADMIN: Address = Address([0xad; 20]);
pub const ALICE: Address = Address([0x11; 20]);
pub const BOB: Address = Address([0x22; 20]);
pub const GENERATOR_1: Address = Address([0xa1; 20]);
pub const GENERATOR_2: Address = Address([0xa2; 20]);

pub fn config() -> ChainConfig {
    ChainConfig::new(CHAIN_ID).set_max_blocks_per_formulator(2)
}

pub fn formulator_policy() -> FormulatorPolicy {
    FormulatorPolicy {
        alpha_amount: Amount::coin(1_000),
        sigma_count: 4,
        sigma_blocks: 10,
        omega_count: 2,
        omega_blocks: 20,
        hyper_amount: Amount::coin(3_000_000),
        min_stake_amount: Amount::coin(100),
    }
}

pub fn reward_policy() -> RewardPolicy {
    RewardPolicy {
        reward_per_block: Amount::coin(1),
        alpha_efficiency_milli: 1_000,
        sigma_efficiency_milli: 1_150,
        omega_efficiency_milli: 1_300,
        hyper_efficiency_milli: 1_300,
        staking_efficiency_milli: 700,
        commission_ratio_milli: 50,
        mining_fee_address: Address([0xfe; 20]),
        mining_fee_milli: 300,
    }
}

pub fn genesis() -> Genesis {
    Genesis {
        timestamp: GENESIS_TIMESTAMP,
        admin: ADMIN,
        generators: vec![(GENERATOR_1, Hash([0xb1; 32])), (GENERATOR_2, Hash([0xb2; 32]))],
        observer_keys: vec![Hash([0x0b; 32])],
        token: TokenInit {
            name: "Formulation Coin".into(),
            symbol: "FC".into(),
            balances: vec![(ADMIN, Amount::coin(10_000_000)), (ALICE, Amount::coin(1_000))],
        },
        formulator_policy: formulator_policy(),
        reward_policy: reward_policy(),
        contracts: vec![],
    }
}

pub fn store_path(dir: &Path) -> PathBuf {
    dir.join("chain.log")
}

pub fn open_store(dir: &Path) -> Store {
    Store::open(store_path(dir), StoreConfig::new().set_sync_mode(SyncMode::Always)).unwrap()
}

pub fn open_chain(dir: &Path, config: ChainConfig) -> Chain {
    Chain::open(open_store(dir), config).unwrap()
}

/// A chain with genesis applied.
pub fn new_chain(dir: &Path, config: ChainConfig) -> (Chain, SystemContracts) {
    let chain = open_chain(dir, config);
    let contracts = chain.init_genesis(&genesis()).unwrap();
    (chain, contracts)
}

pub fn tx(signer: Address, to: Address, method: &str, args: Vec<Value>) -> SignedTx {
    let tx = Transaction {
        chain_id: CHAIN_ID,
        timestamp: GENESIS_TIMESTAMP,
        to,
        method: method.into(),
        args,
        ..Default::default()
    };
    SignedTx::new(tx, signer)
}

pub fn transfer(token: Address, from: Address, to: Address, amount: Amount) -> SignedTx {
    tx(from, token, "Transfer", vec![Value::Address(to), Value::Amount(amount)])
}

/// Timestamp of the block after the current head.
pub fn next_timestamp(chain: &Chain) -> u64 {
    let height = chain.height().unwrap();
    chain.header(height).unwrap().unwrap().timestamp + BLOCK_INTERVAL
}

pub fn next_block(chain: &Chain, body: Vec<SignedTx>) -> Block {
    chain.assemble_block(next_timestamp(chain), 0, body).unwrap()
}

pub fn produce(chain: &Chain, body: Vec<SignedTx>) -> BlockLog {
    let block = next_block(chain, body);
    chain.apply_block(&block).unwrap()
}

pub fn amount(values: &[Value]) -> Amount {
    match values {
        [Value::Amount(a)] => a.clone(),
        other => panic!("expected one amount, got {other:?}"),
    }
}

pub fn balance(chain: &Chain, token: Address, owner: Address) -> Amount {
    amount(&chain.query(token, "BalanceOf", &[Value::Address(owner)]).unwrap())
}

pub fn total_supply(chain: &Chain, token: Address) -> Amount {
    amount(&chain.query(token, "TotalSupply", &[]).unwrap())
}

pub fn statuses(log: &BlockLog) -> Vec<ExitStatus> {
    log.receipts.iter().map(|r| r.status).collect()
}
