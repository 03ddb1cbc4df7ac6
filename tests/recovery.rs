/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::fs::OpenOptions;

use rand::Rng;

use pof_runtime::{Address, Amount, Chain, ChainConfig, TransitionError};

use crate::common::*;

mod common;

/// Applies `n` blocks, each paying Bob the height of the block in coins.
fn advance(chain: &Chain, token: Address, n: u64) {
    for _ in 0..n {
        let height = u64::from(chain.height().unwrap()) + 1;
        produce(chain, vec![transfer(token, ALICE, BOB, Amount::coin(height))]);
    }
}

#[test]
fn chain_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (chain, contracts) = new_chain(dir.path(), config());
    advance(&chain, contracts.token, 3);

    let height = chain.height().unwrap();
    let last_hash = chain.last_hash().unwrap();
    let consensus = chain.consensus().state();
    chain.store().close().unwrap();
    drop(chain);

    let chain = open_chain(dir.path(), config());
    assert_eq!(chain.height().unwrap(), height);
    assert_eq!(chain.last_hash().unwrap(), last_hash);
    assert_eq!(chain.consensus().state(), consensus);
    assert_eq!(chain.system_contracts().unwrap(), Some(contracts));
    assert_eq!(balance(&chain, contracts.token, BOB), Amount::coin(6));

    // keeps going from where it stopped
    advance(&chain, contracts.token, 1);
    assert_eq!(chain.height().unwrap(), height + 1);
}

#[test]
fn reopening_with_another_chain_id_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (chain, _) = new_chain(dir.path(), config());
    chain.store().close().unwrap();
    drop(chain);

    let other = ChainConfig::new(CHAIN_ID + 1);
    assert!(matches!(
        Chain::open(open_store(dir.path()), other),
        Err(TransitionError::InvalidChainId)
    ));
}

#[test]
fn torn_block_batch_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let (chain, contracts) = new_chain(dir.path(), config());
    advance(&chain, contracts.token, 2);

    let height = chain.height().unwrap();
    let last_hash = chain.last_hash().unwrap();
    let before = chain.store().log_size();
    let block = next_block(&chain, vec![transfer(contracts.token, ALICE, BOB, Amount::coin(100))]);
    chain.apply_block(&block).unwrap();
    let after = chain.store().log_size();
    chain.store().close().unwrap();
    drop(chain);

    // cut the last batch anywhere before its end
    let cut = rand::thread_rng().gen_range(1..after - before);
    let file = OpenOptions::new().write(true).open(store_path(dir.path())).unwrap();
    file.set_len(after - cut).unwrap();
    drop(file);

    let chain = open_chain(dir.path(), config());
    assert_eq!(chain.height().unwrap(), height);
    assert_eq!(chain.last_hash().unwrap(), last_hash);
    assert_eq!(balance(&chain, contracts.token, BOB), Amount::coin(3));

    // the same block applies again on the recovered state
    let log = chain.apply_block(&block).unwrap();
    assert_eq!(log.height, height + 1);
    assert_eq!(balance(&chain, contracts.token, BOB), Amount::coin(103));
}

#[test]
fn compaction_keeps_the_chain_state() {
    let dir = tempfile::tempdir().unwrap();
    let (chain, contracts) = new_chain(dir.path(), config());
    advance(&chain, contracts.token, 6);

    let height = chain.height().unwrap();
    let last_hash = chain.last_hash().unwrap();
    let consensus = chain.consensus().state();
    let snapshot = chain.store().snapshot();
    let size = chain.store().log_size();

    chain.store().shrink().unwrap();
    assert!(chain.store().log_size() < size);
    assert_eq!(chain.store().snapshot(), snapshot);
    advance(&chain, contracts.token, 1);
    let next_hash = chain.last_hash().unwrap();
    chain.store().close().unwrap();
    drop(chain);

    let chain = open_chain(dir.path(), config());
    assert_eq!(chain.height().unwrap(), height + 1);
    assert_eq!(chain.last_hash().unwrap(), next_hash);
    assert_ne!(chain.last_hash().unwrap(), last_hash);
    assert_eq!(chain.header(height).unwrap().unwrap().hash().unwrap(), last_hash);
    assert_ne!(chain.consensus().state(), consensus);
    assert_eq!(balance(&chain, contracts.token, BOB), Amount::coin(28));
}
