/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A chain instance: the keyed store, the class registry and the producer schedule, advanced one block
//! at a time.
//!
//! ```text
//! f(S, B) -> (S', L)
//!
//! S = state committed in the keyed store (context data, head, rank table)
//! B = block: header and signed transactions
//! L = block log: receipts and events, also published to subscribers
//! ```
//!
//! Blocks are applied serially. Each block executes in a fresh [Context](crate::context::Context)
//! over a read transaction; its folded writes, the new head and the new scheduler state are then
//! committed to the store in one write transaction.

pub mod admin;
pub use admin::ChainAdmin;

pub mod apply;

pub mod block;
pub use block::{Block, BlockLog, ExitStatus, Header, Receipt, SignedTx, Transaction};

pub mod genesis;
pub use genesis::{Genesis, SystemContracts};

pub mod verify;
pub use verify::{SignerVerifier, TrustedSigner};

use std::sync::mpsc;

use parking_lot::Mutex;
use tracing::debug;

use crate::codec::{Decode, Value};
use crate::consensus::{Consensus, Rank};
use crate::context::{Context, StateLoader, StoreLoader};
use crate::contract::registry::reward_hooks;
use crate::contract::{exec, ClassRegistry, ContractInfo};
use crate::contracts::register_all;
use crate::error::{ContractError, TransitionError};
use crate::params::ChainConfig;
use crate::store::Store;
use crate::types::{Address, Hash};

/// Version written into produced headers.
pub const BLOCK_VERSION: u16 = 1;

pub struct Chain {
    store: Store,
    config: ChainConfig,
    registry: ClassRegistry,
    consensus: Consensus,
    verifier: Box<dyn SignerVerifier>,
    /// Serializes genesis, assembly and application.
    apply_lock: Mutex<()>,
    subscribers: Mutex<Vec<mpsc::Sender<BlockLog>>>,
}

impl Chain {
    /// Opens a chain over `store` with the system contract classes registered.
    pub fn open(store: Store, config: ChainConfig) -> Result<Self, TransitionError> {
        let mut registry = ClassRegistry::new();
        register_all(&mut registry)?;
        Self::open_with_registry(store, config, registry)
    }

    /// Opens a chain with a caller-built registry. The registry is sealed: no class can be added once
    /// the chain runs.
    pub fn open_with_registry(
        store: Store,
        config: ChainConfig,
        mut registry: ClassRegistry,
    ) -> Result<Self, TransitionError> {
        registry.seal();
        let consensus = {
            let loader = StoreLoader::new(store.read_tx()?);
            if loader.is_initialized() {
                if loader.chain_id() != config.chain_id {
                    return Err(TransitionError::InvalidChainId);
                }
                match loader.consensus_blob() {
                    Some(blob) => Consensus::from_blob(&blob)?,
                    None => return Err(TransitionError::NotInitialized),
                }
            } else {
                Consensus::default()
            }
        };
        debug!(chain_id = config.chain_id, height = consensus.height(), "chain opened");
        Ok(Self {
            store,
            config,
            registry,
            consensus,
            verifier: Box::new(TrustedSigner),
            apply_lock: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Replaces the signer verifier consulted at transaction admission. The default is [TrustedSigner].
    pub fn with_verifier(mut self, verifier: impl SignerVerifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    pub fn is_initialized(&self) -> Result<bool, TransitionError> {
        Ok(StoreLoader::new(self.store.read_tx()?).is_initialized())
    }

    /// Height of the last applied block.
    pub fn height(&self) -> Result<u32, TransitionError> {
        Ok(StoreLoader::new(self.store.read_tx()?).height())
    }

    pub fn last_hash(&self) -> Result<Hash, TransitionError> {
        Ok(StoreLoader::new(self.store.read_tx()?).last_hash())
    }

    pub fn header(&self, height: u32) -> Result<Option<Header>, TransitionError> {
        let loader = StoreLoader::new(self.store.read_tx()?);
        match loader.header_bytes(height) {
            Some(bytes) => Ok(Some(Header::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The generator expected to produce the next block after `timeout_count` timeouts.
    pub fn top_rank(&self, timeout_count: u32) -> Result<Rank, TransitionError> {
        Ok(self.consensus.top_rank(timeout_count)?)
    }

    pub fn system_contracts(&self) -> Result<Option<SystemContracts>, TransitionError> {
        let loader = StoreLoader::new(self.store.read_tx()?);
        match loader.account_data(&Address::ZERO, genesis::SYSTEM_CONTRACTS_KEY) {
            Some(bytes) => Ok(Some(SystemContracts::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Contracts whose reward hook runs at the end of each reward window, in deployment order.
    pub fn reward_hooks(&self) -> Result<Vec<Address>, TransitionError> {
        let loader = StoreLoader::new(self.store.read_tx()?);
        Ok(reward_hooks(&Context::new(&loader))?)
    }

    pub fn main_token(&self) -> Result<Option<Address>, TransitionError> {
        Ok(StoreLoader::new(self.store.read_tx()?).main_token())
    }

    pub fn contract_info(&self, address: &Address) -> Result<Option<ContractInfo>, TransitionError> {
        let loader = StoreLoader::new(self.store.read_tx()?);
        let ctx = Context::new(&loader);
        match self.registry.load(&ctx, address) {
            Ok((_, info)) => Ok(Some(info)),
            Err(ContractError::NotExistContract(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Calls a contract method against the committed state with the zero address as caller. Writes are
    /// discarded.
    pub fn query(&self, to: Address, method: &str, args: &[Value]) -> Result<Vec<Value>, TransitionError> {
        let loader = StoreLoader::new(self.store.read_tx()?);
        let mut ctx = Context::new(&loader);
        ctx.set_fork_rules(self.config.fork_rules.clone());
        Ok(exec(&mut ctx, &self.registry, Address::ZERO, to, method, args)?)
    }

    /// Receives the [BlockLog] of every block applied from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<BlockLog> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, log: &BlockLog) {
        // dropped receivers unsubscribe
        self.subscribers.lock().retain(|tx| tx.send(log.clone()).is_ok());
    }
}
