/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Length-prefixed, little-endian binary codec used wherever deterministic bytes are required:
//! state hashing, persistence, block and transaction encoding.
//!
//! There are two modes:
//! - [sum] mode: composable [SumWriter]/[SumReader] that keep a running byte count. Types implement
//! [Encode] and [Decode] on top of them.
//! - [typed] mode: a self-describing encoding where each [Value] carries a one-byte tag. It carries the
//! heterogeneous argument and result lists of contract method calls.

pub mod sum;
pub use sum::*;

pub mod typed;
pub use typed::*;
