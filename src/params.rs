/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of a chain instance, including the hard-fork rule table.

use crate::types::Amount;

/// Behaviour switched on at a chain-specific height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ForkFlag {
    /// Formulator rewards pay the mining fee share to the mining fee address.
    MiningFeeSplit,
    /// Deferred stack rewards are folded into the staking power before distribution.
    StackRewardCompounding,
    /// Block timestamps must strictly increase.
    StrictTimestamp,
}

impl ForkFlag {
    pub const ALL: [ForkFlag; 3] = [ForkFlag::MiningFeeSplit, ForkFlag::StackRewardCompounding, ForkFlag::StrictTimestamp];
}

/// Ordered table of `(height_threshold, flag)`. A flag is active for target heights strictly above its
/// threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkRules {
    rules: Vec<(u32, ForkFlag)>,
}

impl ForkRules {
    /// No flag is active at any height.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// Heights of the main network.
    pub fn mainnet() -> Self {
        Self::none()
            .activate(ForkFlag::MiningFeeSplit, 1_783_888)
            .activate(ForkFlag::StackRewardCompounding, 10_780_198)
            .activate(ForkFlag::StrictTimestamp, 11_492_000)
    }

    pub fn activate(mut self, flag: ForkFlag, threshold: u32) -> Self {
        self.rules.retain(|(_, f)| *f != flag);
        self.rules.push((threshold, flag));
        self.rules.sort();
        self
    }

    pub fn is_active(&self, flag: ForkFlag, target_height: u32) -> bool {
        self.rules.iter().any(|(threshold, f)| *f == flag && target_height > *threshold)
    }

    pub fn threshold(&self, flag: ForkFlag) -> Option<u32> {
        self.rules.iter().find(|(_, f)| *f == flag).map(|(h, _)| *h)
    }
}

/// Every flag active from the first block after genesis.
impl Default for ForkRules {
    fn default() -> Self {
        ForkFlag::ALL.iter().fold(Self::none(), |rules, flag| rules.activate(*flag, 0))
    }
}

/// ChainConfig defines the protocol parameters a chain instance is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Consecutive blocks a generator produces before the top rank rotates.
    pub max_blocks_per_formulator: u32,
    /// Blocks per reward window. Reward hooks run at heights divisible by it.
    pub reward_interval_blocks: u32,
    /// Fee charged in the main token per transaction. Zero disables fee charging.
    pub tx_fee: Amount,
    /// Maximum distance, in milliseconds, between a non-sequenced transaction's timestamp and the block
    /// timestamp.
    pub tx_time_window: u64,
    pub fork_rules: ForkRules,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            max_blocks_per_formulator: 10,
            reward_interval_blocks: 1,
            tx_fee: Amount::zero(),
            tx_time_window: 30 * 60 * 1000,
            fork_rules: ForkRules::default(),
        }
    }
}

impl ChainConfig {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id, ..Default::default() }
    }

    pub fn set_max_blocks_per_formulator(mut self, max_blocks: u32) -> Self {
        self.max_blocks_per_formulator = max_blocks.max(1);
        self
    }

    pub fn set_reward_interval_blocks(mut self, interval: u32) -> Self {
        self.reward_interval_blocks = interval.max(1);
        self
    }

    pub fn set_tx_fee(mut self, fee: Amount) -> Self {
        self.tx_fee = fee;
        self
    }

    pub fn set_tx_time_window(mut self, window: u64) -> Self {
        self.tx_time_window = window;
        self
    }

    pub fn set_fork_rules(mut self, rules: ForkRules) -> Self {
        self.fork_rules = rules;
        self
    }

    pub fn is_fork_active(&self, flag: ForkFlag, target_height: u32) -> bool {
        self.fork_rules.is_active(flag, target_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_thresholds() {
        let rules = ForkRules::mainnet();
        assert!(!rules.is_active(ForkFlag::MiningFeeSplit, 1_783_888));
        assert!(rules.is_active(ForkFlag::MiningFeeSplit, 1_783_889));
        assert!(!rules.is_active(ForkFlag::StackRewardCompounding, 10_000_000));
        assert!(rules.is_active(ForkFlag::StrictTimestamp, 11_492_001));
        assert_eq!(rules.threshold(ForkFlag::StackRewardCompounding), Some(10_780_198));
    }

    #[test]
    fn default_activates_everything() {
        let rules = ForkRules::default();
        for flag in ForkFlag::ALL {
            assert!(rules.is_active(flag, 1));
        }
        assert!(!ForkRules::none().is_active(ForkFlag::StrictTimestamp, u32::MAX));
    }

    #[test]
    fn activate_replaces_threshold() {
        let rules = ForkRules::mainnet().activate(ForkFlag::MiningFeeSplit, 5);
        assert!(rules.is_active(ForkFlag::MiningFeeSplit, 6));
        assert_eq!(rules.threshold(ForkFlag::MiningFeeSplit), Some(5));
    }

    #[test]
    fn config_builder() {
        let config = ChainConfig::new(7).set_reward_interval_blocks(0).set_max_blocks_per_formulator(3);
        assert_eq!(config.chain_id, 7);
        assert_eq!(config.reward_interval_blocks, 1);
        assert_eq!(config.max_blocks_per_formulator, 3);
    }
}
