/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Generator ranking.
//!
//! Candidates are kept sorted by `(score, address)`. The score packs the phase into the high 32 bits
//! and the first four bytes of the hash space, read little-endian, into the low 32 bits. Producing or
//! missing blocks advances the phase; producing also replaces the hash space with the hash of the
//! produced block, so the order among equal phases follows the chain's own history.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use crate::codec::{read_list, write_list, Decode, Encode, SumReader, SumWriter};
use crate::error::{CodecError, RankError};
use crate::types::{Address, Hash, PublicHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rank {
    pub address: Address,
    pub public_hash: PublicHash,
    pub phase: u32,
    pub hash_space: Hash,
}

impl Rank {
    pub fn new(address: Address, public_hash: PublicHash, phase: u32, hash_space: Hash) -> Self {
        Self { address, public_hash, phase, hash_space }
    }

    pub fn score(&self) -> u64 {
        let mut low = [0u8; 4];
        low.copy_from_slice(&self.hash_space.0[..4]);
        (u64::from(self.phase) << 32) | u64::from(u32::from_le_bytes(low))
    }

    /// Strict order of the candidate list.
    pub fn less(&self, other: &Rank) -> bool {
        self.cmp_key(other) == Ordering::Less
    }

    fn cmp_key(&self, other: &Rank) -> Ordering {
        self.score().cmp(&other.score()).then_with(|| self.address.cmp(&other.address))
    }
}

impl Encode for Rank {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        w.write(&self.address)?;
        w.write(&self.public_hash)?;
        w.write_u32(self.phase)?;
        w.write(&self.hash_space)
    }
}

impl Decode for Rank {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        Ok(Self { address: r.read()?, public_hash: r.read()?, phase: r.read_u32()?, hash_space: r.read()? })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankTable {
    candidates: Vec<Rank>,
    index: BTreeMap<Address, Rank>,
}

impl RankTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[Rank] {
        &self.candidates
    }

    pub fn get(&self, address: &Address) -> Option<&Rank> {
        self.index.get(address)
    }

    /// Phase of the last candidate, zero for an empty table.
    pub fn max_phase(&self) -> u32 {
        self.candidates.last().map(|r| r.phase).unwrap_or_default()
    }

    fn min_phase(&self) -> Option<u32> {
        self.candidates.first().map(|r| r.phase)
    }

    fn insert_sorted(&mut self, rank: Rank) {
        let at = self.candidates.partition_point(|r| r.less(&rank));
        self.candidates.insert(at, rank);
        self.index.insert(rank.address, rank);
    }

    pub fn add(&mut self, rank: Rank) -> Result<(), RankError> {
        if self.index.contains_key(&rank.address) {
            return Err(RankError::ExistAddress(rank.address));
        }
        if matches!(self.min_phase(), Some(min) if rank.phase < min) {
            return Err(RankError::InvalidPhase);
        }
        self.insert_sorted(rank);
        Ok(())
    }

    /// Removes the rank of `address`. Returns whether it was ranked.
    pub fn remove(&mut self, address: &Address) -> bool {
        if self.index.remove(address).is_none() {
            return false;
        }
        self.candidates.retain(|r| r.address != *address);
        true
    }

    pub fn top_rank(&self, timeout_count: u32) -> Result<Rank, RankError> {
        self.candidates
            .get(timeout_count as usize)
            .copied()
            .ok_or(RankError::InsufficientCandidateCount)
    }

    /// The first rank whose address is in `set`, with its position.
    pub fn top_rank_in_map(&self, set: &BTreeSet<Address>) -> Option<(Rank, usize)> {
        self.candidates
            .iter()
            .enumerate()
            .find(|(_, r)| set.contains(&r.address))
            .map(|(i, r)| (*r, i))
    }

    /// The first `limit` ranks whose address is in `set`.
    pub fn ranks_in_map(&self, set: &BTreeSet<Address>, limit: usize) -> Vec<Rank> {
        self.candidates.iter().filter(|r| set.contains(&r.address)).take(limit).copied().collect()
    }

    /// Moves the first `timeout_count` candidates, one at a time, two phases back.
    pub fn forward_candidates(&mut self, timeout_count: u32) -> Result<(), RankError> {
        if timeout_count as usize >= self.candidates.len() {
            return Err(RankError::ExceedCandidateCount);
        }
        for _ in 0..timeout_count {
            let mut rank = self.candidates.remove(0);
            rank.phase += 2;
            self.insert_sorted(rank);
        }
        Ok(())
    }

    /// Moves the top candidate one phase back and reseeds its hash space with `last_hash`.
    pub fn forward_top(&mut self, last_hash: Hash) -> Result<(), RankError> {
        if self.candidates.is_empty() {
            return Err(RankError::InsufficientCandidateCount);
        }
        let mut rank = self.candidates.remove(0);
        rank.phase += 1;
        rank.hash_space = last_hash;
        self.insert_sorted(rank);
        Ok(())
    }

    /// Whether `address` is ranked with `public_hash`.
    pub fn is_formulator(&self, address: &Address, public_hash: &PublicHash) -> bool {
        self.index.get(address).map_or(false, |r| r.public_hash == *public_hash)
    }
}

impl Encode for RankTable {
    fn encode<W: Write>(&self, w: &mut SumWriter<W>) -> Result<(), CodecError> {
        write_list(w, &self.candidates)
    }
}

impl Decode for RankTable {
    fn decode<R: Read>(r: &mut SumReader<R>) -> Result<Self, CodecError> {
        let mut table = RankTable::new();
        for rank in read_list::<_, Rank>(r)? {
            table.insert_sorted(rank);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(b: u8, phase: u32, low: u32) -> Rank {
        let mut hash_space = [0u8; 32];
        hash_space[..4].copy_from_slice(&low.to_le_bytes());
        Rank::new(Address([b; 20]), Hash([b; 32]), phase, Hash(hash_space))
    }

    fn is_sorted(table: &RankTable) -> bool {
        table.candidates().windows(2).all(|w| w[0].less(&w[1]))
    }

    #[test]
    fn score_packs_phase_and_hash_space() {
        let r = rank(1, 5, 0x0403_0201);
        assert_eq!(r.score(), (5u64 << 32) | 0x0403_0201);
        let mut h = [0xffu8; 32];
        h[..4].copy_from_slice(&[1, 0, 0, 0]);
        let r = Rank::new(Address::ZERO, Hash::ZERO, 0, Hash(h));
        assert_eq!(r.score(), 1);
    }

    #[test]
    fn ties_break_on_address() {
        let a = rank(1, 3, 7);
        let b = rank(2, 3, 7);
        assert!(a.less(&b));
        assert!(!b.less(&a));
        assert!(!a.less(&a));
    }

    #[test]
    fn add_keeps_order_and_rejects_duplicates() {
        let mut table = RankTable::new();
        table.add(rank(1, 5, 9)).unwrap();
        table.add(rank(2, 5, 1)).unwrap();
        table.add(rank(3, 6, 0)).unwrap();
        assert!(is_sorted(&table));
        assert_eq!(table.top_rank(0).unwrap().address, Address([2; 20]));
        assert_eq!(table.add(rank(1, 7, 0)), Err(RankError::ExistAddress(Address([1; 20]))));
        assert_eq!(table.add(rank(4, 4, 0)), Err(RankError::InvalidPhase));
        assert_eq!(table.top_rank(3), Err(RankError::InsufficientCandidateCount));
        assert_eq!(table.max_phase(), 6);
    }

    #[test]
    fn forward_candidates_bumps_two_phases() {
        let mut table = RankTable::new();
        table.add(rank(1, 5, 10)).unwrap();
        table.add(rank(2, 5, 20)).unwrap();
        table.add(rank(3, 6, 30)).unwrap();

        table.forward_candidates(2).unwrap();
        let phases: Vec<u32> = table.candidates().iter().map(|r| r.phase).collect();
        assert_eq!(phases, vec![6, 7, 7]);
        let order: Vec<Address> = table.candidates().iter().map(|r| r.address).collect();
        assert_eq!(order, vec![Address([3; 20]), Address([1; 20]), Address([2; 20])]);
        assert!(is_sorted(&table));

        assert_eq!(table.forward_candidates(3), Err(RankError::ExceedCandidateCount));
    }

    #[test]
    fn forward_top_reseeds_hash_space() {
        let mut table = RankTable::new();
        table.add(rank(1, 1, 0)).unwrap();
        table.add(rank(2, 1, 5)).unwrap();
        let last = Hash([0xee; 32]);
        table.forward_top(last).unwrap();
        let moved = table.get(&Address([1; 20])).unwrap();
        assert_eq!((moved.phase, moved.hash_space), (2, last));
        assert_eq!(table.top_rank(0).unwrap().address, Address([2; 20]));
        assert!(is_sorted(&table));
        assert_eq!(RankTable::new().forward_top(last), Err(RankError::InsufficientCandidateCount));
    }

    #[test]
    fn remove_really_removes() {
        let mut table = RankTable::new();
        for b in 1..=3 {
            table.add(rank(b, 1, u32::from(b))).unwrap();
        }
        assert!(table.remove(&Address([2; 20])));
        assert!(!table.remove(&Address([2; 20])));
        assert_eq!(table.len(), 2);
        assert!(table.candidates().iter().all(|r| r.address != Address([2; 20])));
        assert!(table.get(&Address([2; 20])).is_none());
        // the address can rank again
        table.add(rank(2, 1, 2)).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn lookups_by_set() {
        let mut table = RankTable::new();
        for b in 1..=4 {
            table.add(rank(b, 1, u32::from(b))).unwrap();
        }
        let set: BTreeSet<Address> = [Address([3; 20]), Address([4; 20])].into_iter().collect();
        let (top, at) = table.top_rank_in_map(&set).unwrap();
        assert_eq!((top.address, at), (Address([3; 20]), 2));
        assert_eq!(table.ranks_in_map(&set, 1).len(), 1);
        assert_eq!(table.ranks_in_map(&set, 5).len(), 2);
        assert!(table.top_rank_in_map(&BTreeSet::new()).is_none());
        assert!(table.is_formulator(&Address([1; 20]), &Hash([1; 32])));
        assert!(!table.is_formulator(&Address([1; 20]), &Hash([2; 32])));
    }

    #[test]
    fn table_codec_restores_index() {
        let mut table = RankTable::new();
        table.add(rank(1, 2, 3)).unwrap();
        table.add(rank(2, 2, 1)).unwrap();
        let decoded = RankTable::from_bytes(&table.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, table);
        assert!(decoded.get(&Address([1; 20])).is_some());
    }
}
