/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Contract class registry, deployment and lookup.
//!
//! The registry is owned by the chain. Classes are registered before genesis; once the registry is
//! sealed further registration fails with [ContractError::RegistrySealed], so every node applying the
//! same blocks resolves the same class ids to the same code.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use tracing::debug;

use crate::codec::{read_list, write_list, Decode, Encode, SumReader, SumWriter};
use crate::context::{Context, ContractContext};
use crate::error::{CodecError, ContractError};
use crate::types::{contract_address, keccak256, Address};

use super::{Contract, ContractClass};

/// Account data key holding the serialized [ContractInfo] of a deployed contract.
pub const CONTRACT_KEY: &[u8] = b"contract";

/// Account data key of the chain account holding the reward-hook contracts in deployment order.
pub const REWARD_HOOKS_KEY: &[u8] = b"reward_hooks";

/// Class id of a class name: the first 8 bytes of its Keccak hash, little-endian.
pub fn class_id(name: &str) -> u64 {
    let h = keccak256(name.as_bytes());
    let mut id = [0u8; 8];
    id.copy_from_slice(&h.0[..8]);
    u64::from_le_bytes(id)
}

/// What is persisted for a deployed contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractInfo {
    pub class_id: u64,
    pub address: Address,
    pub master: Address,
}

impl Encode for ContractInfo {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_u64(self.class_id)?;
        w.write(&self.address)?;
        w.write(&self.master)
    }
}

impl Decode for ContractInfo {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self { class_id: r.read_u64()?, address: r.read()?, master: r.read()? })
    }
}

type Constructor = fn() -> Box<dyn Contract>;

fn construct<T: ContractClass>() -> Box<dyn Contract> {
    Box::new(T::default())
}

struct ClassEntry {
    name: &'static str,
    construct: Constructor,
}

#[derive(Default)]
pub struct ClassRegistry {
    classes: BTreeMap<u64, ClassEntry>,
    sealed: bool,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class and returns its id.
    pub fn register<T: ContractClass>(&mut self) -> Result<u64, ContractError> {
        if self.sealed {
            return Err(ContractError::RegistrySealed);
        }
        let id = class_id(T::CLASS_NAME);
        if self.classes.contains_key(&id) {
            return Err(ContractError::ExistClass(T::CLASS_NAME.to_string()));
        }
        self.classes.insert(id, ClassEntry { name: T::CLASS_NAME, construct: construct::<T> });
        debug!(class = T::CLASS_NAME, id, "contract class registered");
        Ok(id)
    }

    /// Forbids further registration.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn class_name(&self, class_id: u64) -> Option<&'static str> {
        self.classes.get(&class_id).map(|c| c.name)
    }

    /// A fresh value of the class.
    pub fn construct(&self, class_id: u64) -> Result<Box<dyn Contract>, ContractError> {
        self.classes
            .get(&class_id)
            .map(|c| (c.construct)())
            .ok_or(ContractError::NotExistClass(class_id))
    }

    /// Reads the stored class id of `addr` and rehydrates the contract.
    pub fn load(&self, ctx: &Context, addr: &Address) -> Result<(Box<dyn Contract>, ContractInfo), ContractError> {
        let bytes = ctx
            .account_data(addr, CONTRACT_KEY)
            .ok_or(ContractError::NotExistContract(*addr))?;
        let info = ContractInfo::from_bytes(&bytes)?;
        Ok((self.construct(info.class_id)?, info))
    }

    /// Deploys a contract of `class_id` with `deployer` as its master.
    ///
    /// The address is derived from the deployer, the class id, the next context sequence and the
    /// target height. `OnCreate` runs inside its own layer; if it fails nothing of the deployment
    /// remains.
    pub fn deploy(
        &self,
        ctx: &mut Context,
        deployer: &Address,
        class_id: u64,
        args: &[u8],
    ) -> Result<Address, ContractError> {
        let contract = self.construct(class_id)?;
        let seq = ctx.next_seq();
        let address = contract_address(deployer, class_id, seq, ctx.target_height());
        if ctx.account_data(&address, CONTRACT_KEY).is_some() {
            return Err(anyhow::anyhow!("contract {address} already exists").into());
        }
        let info = ContractInfo { class_id, address, master: *deployer };

        let sn = ctx.snapshot();
        match self.create(ctx, contract.as_ref(), &info, args) {
            Ok(()) => {
                ctx.commit(sn);
                debug!(
                    class = self.class_name(class_id).unwrap_or_default(),
                    %address,
                    master = %deployer,
                    "contract deployed"
                );
                Ok(address)
            }
            Err(e) => {
                ctx.revert(sn);
                Err(e)
            }
        }
    }

    fn create(
        &self,
        ctx: &mut Context,
        contract: &dyn Contract,
        info: &ContractInfo,
        args: &[u8],
    ) -> Result<(), ContractError> {
        // stored first so that OnCreate may call back into the contract
        ctx.set_account_data(&info.address, CONTRACT_KEY, info.to_bytes()?);
        {
            let mut cc = ContractContext::new(ctx, self, info.address, info.master, info.master);
            contract.on_create(&mut cc, args)?;
        }
        if contract.has_reward_hook() {
            let mut hooks = reward_hooks(ctx)?;
            hooks.push(info.address);
            let mut w = SumWriter::new(Vec::new());
            write_list(&mut w, &hooks)?;
            ctx.set_account_data(&Address::ZERO, REWARD_HOOKS_KEY, w.into_inner());
        }
        Ok(())
    }
}

/// Contracts with a reward hook, in deployment order.
pub fn reward_hooks(ctx: &Context) -> Result<Vec<Address>, CodecError> {
    match ctx.account_data(&Address::ZERO, REWARD_HOOKS_KEY) {
        Some(bytes) => read_list(&mut SumReader::new(bytes.as_slice())),
        None => Ok(Vec::new()),
    }
}
