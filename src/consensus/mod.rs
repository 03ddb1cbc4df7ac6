/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Generator ranking and the block producer schedule built on it.

pub mod rank;
pub use rank::{Rank, RankTable};

pub mod scheduler;
pub use scheduler::{Consensus, ConsensusState};
