/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! error defines sets of error definitions in entire life time of block application.
//!
//! Each layer owns an error enum. Lower layers convert into higher layers, so that a codec failure
//! inside a contract call ends up as [ContractError::Codec] and a store failure during block apply ends
//! up as [TransitionError::Store].

use crate::types::{Address, Hash};

/// Errors of the binary codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Fewer bytes were available than declared.
    #[error("invalid length")]
    InvalidLength,

    /// A typed-mode value carried a tag outside the closed tag set.
    #[error("invalid type tag {0}")]
    InvalidTypeTag(u8),

    /// A slice or typed array longer than 255 elements.
    #[error("slice of {0} elements exceeds the u8 count prefix")]
    SliceTooLong(usize),

    /// A big-int wider than its in-memory integer.
    #[error("integer overflow")]
    IntegerOverflow,

    /// Typed-mode slices nested beyond the decoder's depth limit.
    #[error("slices nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("invalid utf-8 string")]
    InvalidUtf8,

    /// A fixed-width value (address, hash, ...) had the wrong byte length.
    #[error("expected {expected} bytes, got {actual}")]
    InvalidFixedLength { expected: usize, actual: usize },

    /// A boolean byte other than 0 or 1.
    #[error("invalid bool byte {0}")]
    InvalidBool(u8),

    #[error("io: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CodecError::InvalidLength,
            _ => CodecError::Io(e),
        }
    }
}

/// Errors of the append-only keyed store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    /// The store was closed while the transaction was being used.
    #[error("transaction closed")]
    TxClosed,

    /// A write was attempted on a store opened read-only.
    #[error("transaction not writable")]
    TxNotWritable,

    /// Iteration was requested while writes are pending in the same transaction.
    #[error("transaction has pending writes; iteration is not allowed")]
    TxIterating,

    #[error("shrink already in process")]
    ShrinkInProcess,

    /// The log contains a record with an unknown tag.
    #[error("invalid database: unknown record tag {0:#04x}")]
    InvalidDatabase(u8),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors of the generator ranking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankError {
    #[error("insufficient candidate count")]
    InsufficientCandidateCount,

    #[error("invalid phase")]
    InvalidPhase,

    #[error("address {0} already ranked")]
    ExistAddress(Address),

    #[error("timeout count exceeds candidate count")]
    ExceedCandidateCount,
}

/// Errors returned by contract execution, including dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("contract {0} does not exist")]
    NotExistContract(Address),

    #[error("contract class {0:#018x} is not registered")]
    NotExistClass(u64),

    #[error("contract class {0} is already registered")]
    ExistClass(String),

    #[error("class registry is sealed")]
    RegistrySealed,

    #[error("method {0} not found")]
    MethodNotFound(String),

    #[error("method {method} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("method {method} argument {index} has the wrong type")]
    InvalidArgument { method: String, index: usize },

    /// The caller lacks the role the method requires (master, admin, minter, owner).
    #[error("not allowed")]
    NotAllowed,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("insufficient allowance")]
    InsufficientAllowance,

    #[error("invalid amount")]
    InvalidAmount,

    #[error("formulator {0} does not exist")]
    NotExistFormulator(Address),

    #[error("not formulator owner")]
    NotFormulatorOwner,

    #[error("invalid formulator type")]
    InvalidFormulatorType,

    #[error("invalid sigma creation count")]
    InvalidSigmaCreationCount,

    #[error("invalid sigma creation blocks")]
    InvalidSigmaCreationBlocks,

    #[error("invalid omega creation count")]
    InvalidOmegaCreationCount,

    #[error("invalid omega creation blocks")]
    InvalidOmegaCreationBlocks,

    #[error("invalid stake amount")]
    InvalidStakeAmount,

    #[error("invalid stake generator")]
    InvalidStakeGenerator,

    #[error("already processed")]
    AlreadyProcessed,

    /// The block already holds as many events as a u16 index can number.
    #[error("event limit reached at {0} events")]
    EventLimit(usize),

    /// Minted more than the block's reward budget. Fatal for the block.
    #[error("reward overflow: minted {minted} exceeds budget {budget}")]
    RewardOverflow { minted: String, budget: String },

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("runtime: {0}")]
    Runtime(#[from] anyhow::Error),
}

impl ContractError {
    /// Whether the error must reject the whole block rather than fail a single transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ContractError::RewardOverflow { .. })
    }
}

/// Descriptive error definitions of a block application or of a single transaction inside it.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// Header height is not the next height of the chain.
    #[error("invalid height: expected {expected}, got {actual}")]
    InvalidHeight { expected: u32, actual: u32 },

    #[error("invalid previous hash: expected {expected}, got {actual}")]
    InvalidPrevHash { expected: Hash, actual: Hash },

    /// Timestamp precedes the last block, or equals it once strict timestamps are active.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("invalid chain id")]
    InvalidChainId,

    /// `header.generator` is not the rank selected by `timeout_count`.
    #[error("invalid generator {0}")]
    InvalidGenerator(Address),

    #[error("invalid context hash: expected {expected}, computed {computed}")]
    InvalidContextHash { expected: Hash, computed: Hash },

    #[error("invalid body hash")]
    InvalidBodyHash,

    #[error("genesis already initialized")]
    GenesisInitialized,

    #[error("chain is not initialized")]
    NotInitialized,

    /// Transaction sequence is not the next sequence of the signer.
    #[error("wrong sequence: expected {expected}, got {actual}")]
    WrongSequence { expected: u64, actual: u64 },

    /// The signer failed verification, or is the zero address.
    #[error("invalid signer {0}")]
    InvalidSigner(Address),

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(Hash),

    #[error("transaction timestamp out of range")]
    TransactionTimestampOutOfRange,

    #[error("contract: {0}")]
    Contract(#[from] ContractError),

    #[error("rank: {0}")]
    Rank(#[from] RankError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}
