/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block producer rotation.
//!
//! [ConsensusState] is the pure part: it folds a header and the generator changes of its block into
//! the rank table. [Consensus] guards the committed state with a mutex so that queries from other
//! threads see either the state before a block or the state after it.

use std::io::{Read, Write};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::chain::block::Header;
use crate::codec::{read_list, write_list, Decode, Encode, SumReader, SumWriter};
use crate::error::{CodecError, RankError};
use crate::types::{keccak256, Address, Hash, PublicHash};

use super::rank::{Rank, RankTable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusState {
    pub height: u32,
    pub max_blocks_per_formulator: u32,
    pub blocks_from_same_formulator: u32,
    pub ranks: RankTable,
    pub observer_keys: Vec<PublicHash>,
}

impl ConsensusState {
    pub fn new(max_blocks_per_formulator: u32, observer_keys: Vec<PublicHash>) -> Self {
        Self { max_blocks_per_formulator: max_blocks_per_formulator.max(1), observer_keys, ..Default::default() }
    }

    /// Hash space a generator starts with.
    pub fn initial_hash_space(address: &Address) -> Hash {
        let mut seed = [0u8; 40];
        seed[..20].copy_from_slice(address.as_bytes());
        seed[20..].copy_from_slice(address.as_bytes());
        keccak256(&seed)
    }

    /// Ranks `generators` behind every current candidate, all at the same phase. A generator that is
    /// already ranked re-enters at the back with its new key.
    pub fn add_generators(&mut self, generators: &[(Address, PublicHash)]) -> Result<(), RankError> {
        if generators.is_empty() {
            return Ok(());
        }
        let phase = if self.ranks.is_empty() { 0 } else { self.ranks.max_phase() + 1 };
        for (address, public_hash) in generators {
            self.ranks.remove(address);
            self.ranks.add(Rank::new(*address, *public_hash, phase, Self::initial_hash_space(address)))?;
        }
        Ok(())
    }

    /// Advances the rotation past the block `header`, whose hash is `header_hash`.
    ///
    /// `created` and `deleted` are the generators registered and removed by the block. All generators
    /// created by one block enter at the same phase.
    pub fn apply(
        &mut self,
        header: &Header,
        header_hash: Hash,
        created: &[(Address, PublicHash)],
        deleted: &[Address],
    ) -> Result<(), RankError> {
        if header.timeout_count > 0 {
            self.ranks.forward_candidates(header.timeout_count)?;
            self.blocks_from_same_formulator = 0;
            debug!(height = header.height, timeout_count = header.timeout_count, "candidates forwarded");
        }

        self.blocks_from_same_formulator += 1;
        if self.blocks_from_same_formulator >= self.max_blocks_per_formulator {
            self.ranks.forward_top(header_hash)?;
            self.blocks_from_same_formulator = 0;
            trace!(height = header.height, generator = %header.generator, "top forwarded");
        }

        self.add_generators(created)?;
        for address in deleted {
            self.ranks.remove(address);
        }

        self.height = header.height;
        Ok(())
    }

    pub fn top_rank(&self, timeout_count: u32) -> Result<Rank, RankError> {
        self.ranks.top_rank(timeout_count)
    }

    pub fn is_formulator(&self, address: &Address, public_hash: &PublicHash) -> bool {
        self.ranks.is_formulator(address, public_hash)
    }
}

impl Encode for ConsensusState {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write_u32(self.height)?;
        w.write_u32(self.max_blocks_per_formulator)?;
        w.write_u32(self.blocks_from_same_formulator)?;
        w.write(&self.ranks)?;
        write_list(w, &self.observer_keys)
    }
}

impl Decode for ConsensusState {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self {
            height: r.read_u32()?,
            max_blocks_per_formulator: r.read_u32()?,
            blocks_from_same_formulator: r.read_u32()?,
            ranks: r.read()?,
            observer_keys: read_list(r)?,
        })
    }
}

/// The committed scheduler state of a chain.
#[derive(Debug, Default)]
pub struct Consensus {
    state: Mutex<ConsensusState>,
}

impl Consensus {
    pub fn new(state: ConsensusState) -> Self {
        Self { state: Mutex::new(state) }
    }

    /// Restores the state saved by [Consensus::save].
    pub fn from_blob(blob: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::new(ConsensusState::from_bytes(blob)?))
    }

    /// Opaque save blob of the committed state.
    pub fn save(&self) -> Result<Vec<u8>, CodecError> {
        self.state.lock().to_bytes()
    }

    /// The state after the block `header`, computed on a copy. Nothing changes until [Consensus::commit].
    pub fn next_state(
        &self,
        header: &Header,
        header_hash: Hash,
        created: &[(Address, PublicHash)],
        deleted: &[Address],
    ) -> Result<ConsensusState, RankError> {
        let mut next = self.state.lock().clone();
        next.apply(header, header_hash, created, deleted)?;
        Ok(next)
    }

    pub fn commit(&self, state: ConsensusState) {
        *self.state.lock() = state;
    }

    pub fn state(&self) -> ConsensusState {
        self.state.lock().clone()
    }

    pub fn height(&self) -> u32 {
        self.state.lock().height
    }

    pub fn top_rank(&self, timeout_count: u32) -> Result<Rank, RankError> {
        self.state.lock().top_rank(timeout_count)
    }

    pub fn is_formulator(&self, address: &Address, public_hash: &PublicHash) -> bool {
        self.state.lock().is_formulator(address, public_hash)
    }

    pub fn candidate_count(&self) -> usize {
        self.state.lock().ranks.len()
    }
}
