/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Dense address sets over contract data.
//!
//! A set is three keyed maps: a number index `slot -> address`, a reverse index `address -> slot + 1`
//! and a count. Slots stay dense: removal moves the last address into the freed slot. Iteration walks
//! the slots and never holds a cursor into the store, so the set may be mutated between reads.

use crate::context::ContractContext;
use crate::contracts::{key, load_u32, store_u32};
use crate::types::Address;

pub(crate) struct AddressSet<'s> {
    number: u8,
    reverse: u8,
    count: u8,
    scope: &'s [u8],
}

impl<'s> AddressSet<'s> {
    pub(crate) const fn new(number: u8, reverse: u8, count: u8, scope: &'s [u8]) -> Self {
        Self { number, reverse, count, scope }
    }

    fn number_key(&self, slot: u32) -> Vec<u8> {
        key(self.number, &[self.scope, &slot.to_le_bytes()])
    }

    fn reverse_key(&self, addr: &Address) -> Vec<u8> {
        key(self.reverse, &[self.scope, addr.as_bytes()])
    }

    fn count_key(&self) -> Vec<u8> {
        key(self.count, &[self.scope])
    }

    pub(crate) fn len(&self, cc: &ContractContext) -> u32 {
        load_u32(cc, &self.count_key())
    }

    pub(crate) fn contains(&self, cc: &ContractContext, addr: &Address) -> bool {
        load_u32(cc, &self.reverse_key(addr)) != 0
    }

    pub(crate) fn get(&self, cc: &ContractContext, slot: u32) -> Option<Address> {
        cc.contract_data(&self.number_key(slot)).and_then(|b| Address::from_slice(&b))
    }

    /// Adds `addr`. Returns false if it was already present.
    pub(crate) fn insert(&self, cc: &mut ContractContext, addr: &Address) -> bool {
        if self.contains(cc, addr) {
            return false;
        }
        let slot = self.len(cc);
        cc.set_contract_data(&self.number_key(slot), addr.as_bytes().to_vec());
        store_u32(cc, &self.reverse_key(addr), slot + 1);
        store_u32(cc, &self.count_key(), slot + 1);
        true
    }

    /// Removes `addr`. Returns false if it was absent.
    pub(crate) fn remove(&self, cc: &mut ContractContext, addr: &Address) -> bool {
        let slot = match load_u32(cc, &self.reverse_key(addr)) {
            0 => return false,
            n => n - 1,
        };
        let last = self.len(cc) - 1;
        if slot != last {
            if let Some(moved) = self.get(cc, last) {
                cc.set_contract_data(&self.number_key(slot), moved.as_bytes().to_vec());
                store_u32(cc, &self.reverse_key(&moved), slot + 1);
            }
        }
        cc.set_contract_data(&self.number_key(last), Vec::new());
        store_u32(cc, &self.reverse_key(addr), 0);
        store_u32(cc, &self.count_key(), last);
        true
    }

    /// All addresses in slot order.
    pub(crate) fn entries(&self, cc: &ContractContext) -> Vec<Address> {
        (0..self.len(cc)).filter_map(|slot| self.get(cc, slot)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, EmptyLoader};
    use crate::contract::ClassRegistry;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn swap_remove_keeps_slots_dense() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let registry = ClassRegistry::new();
        let mut cc = ContractContext::new(&mut ctx, &registry, addr(0xcc), Address::ZERO, Address::ZERO);
        let set = AddressSet::new(0x11, 0x12, 0x13, &[]);

        for b in 1..=4 {
            assert!(set.insert(&mut cc, &addr(b)));
        }
        assert!(!set.insert(&mut cc, &addr(2)));
        assert_eq!(set.len(&cc), 4);

        assert!(set.remove(&mut cc, &addr(2)));
        assert!(!set.remove(&mut cc, &addr(2)));
        assert_eq!(set.entries(&cc), vec![addr(1), addr(4), addr(3)]);
        assert!(!set.contains(&cc, &addr(2)));
        assert!(set.contains(&cc, &addr(4)));

        assert!(set.remove(&mut cc, &addr(3)));
        assert!(set.remove(&mut cc, &addr(1)));
        assert!(set.remove(&mut cc, &addr(4)));
        assert_eq!(set.len(&cc), 0);
        assert!(set.entries(&cc).is_empty());
    }

    #[test]
    fn scopes_do_not_overlap() {
        let loader = EmptyLoader::default();
        let mut ctx = Context::new(&loader);
        let registry = ClassRegistry::new();
        let mut cc = ContractContext::new(&mut ctx, &registry, addr(0xcc), Address::ZERO, Address::ZERO);
        let h1 = addr(0x71);
        let h2 = addr(0x72);
        let a = AddressSet::new(0x21, 0x22, 0x23, h1.as_bytes());
        let b = AddressSet::new(0x21, 0x22, 0x23, h2.as_bytes());

        a.insert(&mut cc, &addr(1));
        assert!(!b.contains(&cc, &addr(1)));
        assert_eq!(b.len(&cc), 0);
        b.insert(&mut cc, &addr(1));
        a.remove(&mut cc, &addr(1));
        assert_eq!(b.entries(&cc), vec![addr(1)]);
    }
}
