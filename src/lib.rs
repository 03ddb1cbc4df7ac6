/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! pof-runtime is the execution core of a proof-of-formulation chain. It advances the chain state one
//! block at a time:
//!
//! ```text
//! f(S, B) -> (S', L)
//!
//! S = chain state kept in an append-only keyed store
//! B = block: header and signed transactions calling native contracts
//! L = block log: receipts and events
//! ```
//!
//! ### Example
//!
//! ```rust
//! let store = pof_runtime::Store::open(path, pof_runtime::StoreConfig::default())?;
//! let chain = pof_runtime::Chain::open(store, pof_runtime::ChainConfig::new(chain_id))?;
//! chain.init_genesis(&genesis)?;
//! let block = chain.assemble_block(timestamp, 0, transactions)?;
//! let log = chain.apply_block(&block)?;
//! ```
//!
//! A block's transactions run against a layered [context] over the [store]. They call native [contracts]
//! through the [contract] registry and interactor. Every value crossing a contract or store boundary is
//! written with the [codec]. Who may produce the next block is decided by the [consensus] rank table,
//! which the [chain] advances together with the state.

pub mod chain;
pub use chain::{
    Block, BlockLog, Chain, Genesis, Header, Receipt, SignedTx, SignerVerifier, SystemContracts, Transaction,
};

pub mod codec;

pub mod consensus;
pub use consensus::{Consensus, Rank, RankTable};

pub mod context;

pub mod contract;

pub mod contracts;

pub mod error;
pub use error::{CodecError, ContractError, RankError, StoreError, TransitionError};

pub mod params;
pub use params::{ChainConfig, ForkFlag, ForkRules};

pub mod store;
pub use store::{Store, StoreConfig};

pub mod types;
pub use types::{Address, Amount, Hash, PublicHash};
