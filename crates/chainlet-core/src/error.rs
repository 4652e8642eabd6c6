//! Error types for the Chainlet ledger.
use thiserror::Error;

use crate::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("link mismatch at block {index}: expected parent {expected}, got {got}")] LinkMismatch { index: u64, expected: Hash256, got: Hash256 },
    #[error("index mismatch: expected {expected}, got {got}")] IndexMismatch { expected: u64, got: u64 },
    #[error("invalid proof-of-work at block {index}")] ProofInvalid { index: u64 },
    #[error("index snapshot mismatch at block {index}: expected {expected}, got {got}")] IndexInconsistency { index: u64, expected: Hash256, got: Hash256 },
    #[error("invalid genesis block")] InvalidGenesis,
    #[error("genesis does not match local genesis")] GenesisMismatch,
    #[error("empty chain")] EmptyChain,
}

/// A whole-chain validation failure, pinned to the first offending position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("chain invalid at position {position}: {source}")]
pub struct ChainValidationError {
    pub position: usize,
    pub source: ValidationError,
}

impl ChainValidationError {
    pub fn at(position: usize, source: ValidationError) -> Self {
        Self { position, source }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("mining cancelled")] Cancelled,
    #[error("no valid nonce in {start}..={end}")] SearchExhausted { start: u64, end: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record must be a JSON object")] NotAnObject,
    #[error("missing field: {0}")] MissingField(String),
    #[error("invalid field {field}: {reason}")] InvalidField { field: String, reason: String },
    #[error("{from} does not own {token}")] NotOwner { token: String, from: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashParseError {
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend: {0}")] Backend(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("corrupt store: {0}")] Corrupt(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Chain(#[from] ChainValidationError),
    #[error(transparent)] Mining(#[from] MiningError),
    #[error(transparent)] Record(#[from] RecordError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("stored chain failed validation: {0}")] CorruptChain(ChainValidationError),
    #[error("worker: {0}")] Worker(String),
}
