/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state a chain starts from.

use std::io::{Read, Write};

use tracing::info;

use crate::codec::{Decode, Encode, SumReader, SumWriter, Value};
use crate::consensus::ConsensusState;
use crate::context::loader::{write_chain_id, write_consensus, write_context_data, write_head};
use crate::context::{Context, EmptyLoader, StoreLoader};
use crate::contract::{class_id, exec, ClassRegistry, ContractClass};
use crate::contracts::formulator::{FormulatorInit, FormulatorPolicy, RewardPolicy};
use crate::contracts::token::TokenInit;
use crate::contracts::{Formulator, Gateway, Token};
use crate::error::{CodecError, TransitionError};
use crate::types::{Address, Hash, PublicHash};

use super::block::{Block, Header};
use super::{Chain, BLOCK_VERSION};

/// Account data key of the chain account holding the [SystemContracts].
pub const SYSTEM_CONTRACTS_KEY: &[u8] = b"system_contracts";

/// Inputs of [Chain::init_genesis].
#[derive(Debug, Clone)]
pub struct Genesis {
    pub timestamp: u64,
    /// First admin, and master of the system contracts.
    pub admin: Address,
    pub generators: Vec<(Address, PublicHash)>,
    pub observer_keys: Vec<PublicHash>,
    pub token: TokenInit,
    pub formulator_policy: FormulatorPolicy,
    pub reward_policy: RewardPolicy,
    /// Further contracts deployed after the system contracts, as class id and constructor arguments.
    pub contracts: Vec<(u64, Vec<u8>)>,
}

/// Addresses of the contracts deployed at genesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemContracts {
    pub token: Address,
    pub gateway: Address,
    pub formulator: Address,
}

impl Encode for SystemContracts {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write(&self.token)?;
        w.write(&self.gateway)?;
        w.write(&self.formulator)
    }
}

impl Decode for SystemContracts {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self { token: r.read()?, gateway: r.read()?, formulator: r.read()? })
    }
}

/// Deploys token, gateway and formulator in that order, makes the token the main token and the
/// formulator its minter.
fn deploy_system_contracts(
    ctx: &mut Context,
    registry: &ClassRegistry,
    genesis: &Genesis,
) -> Result<SystemContracts, TransitionError> {
    let master = genesis.admin;
    let token = registry.deploy(ctx, &master, class_id(Token::CLASS_NAME), &genesis.token.to_bytes()?)?;
    ctx.set_main_token(&token);

    let gateway = registry.deploy(ctx, &master, class_id(Gateway::CLASS_NAME), token.as_bytes())?;

    let init = FormulatorInit {
        token,
        policy: genesis.formulator_policy.clone(),
        reward_policy: genesis.reward_policy.clone(),
    };
    let formulator = registry.deploy(ctx, &master, class_id(Formulator::CLASS_NAME), &init.to_bytes()?)?;
    exec(ctx, registry, master, token, "SetMinter", &[Value::Address(formulator), Value::Bool(true)])?;

    let contracts = SystemContracts { token, gateway, formulator };
    ctx.set_account_data(&Address::ZERO, SYSTEM_CONTRACTS_KEY, contracts.to_bytes()?);
    Ok(contracts)
}

impl Chain {
    /// Writes the genesis state into an empty store: admin, generators, system contracts, the height 0
    /// header and the initial rank table.
    pub fn init_genesis(&self, genesis: &Genesis) -> Result<SystemContracts, TransitionError> {
        let _apply = self.apply_lock.lock();
        {
            let loader = StoreLoader::new(self.store.read_tx()?);
            if loader.is_initialized() {
                return Err(TransitionError::GenesisInitialized);
            }
        }

        let base = EmptyLoader { chain_id: self.config.chain_id };
        let mut ctx = Context::new(&base);
        ctx.set_fork_rules(self.config.fork_rules.clone());
        ctx.set_admin(&genesis.admin, true);
        for (address, public_hash) in &genesis.generators {
            ctx.set_generator(address, Some(*public_hash));
        }
        let contracts = deploy_system_contracts(&mut ctx, &self.registry, genesis)?;
        for (class_id, args) in &genesis.contracts {
            self.registry.deploy(&mut ctx, &genesis.admin, *class_id, args)?;
        }

        let header = Header {
            chain_id: self.config.chain_id,
            version: BLOCK_VERSION,
            height: 0,
            prev_hash: Hash::ZERO,
            context_hash: ctx.hash()?,
            timestamp: genesis.timestamp,
            body_hash: Block::body_hash(&[])?,
            ..Default::default()
        };
        let header_hash = header.hash()?;
        let data = ctx.into_data();

        let mut state = ConsensusState::new(self.config.max_blocks_per_formulator, genesis.observer_keys.clone());
        state.add_generators(&genesis.generators)?;
        let blob = state.to_bytes()?;

        self.store.update(|tx| -> Result<(), TransitionError> {
            write_chain_id(tx, self.config.chain_id);
            write_context_data(tx, &data);
            write_head(tx, 0, &header_hash, header.timestamp, header.to_bytes()?);
            write_consensus(tx, blob);
            Ok(())
        })?;
        self.consensus.commit(state);

        info!(
            chain_id = self.config.chain_id,
            hash = %header_hash,
            generators = genesis.generators.len(),
            token = %contracts.token,
            "genesis initialized"
        );
        Ok(contracts)
    }
}
