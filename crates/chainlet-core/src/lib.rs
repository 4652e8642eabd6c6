//! # chainlet-core
//! Foundation types for the Chainlet ledger: blocks, canonical hashing, the
//! secondary-index overlay, chain validation, and the persistence contract.

pub mod canonical;
pub mod constants;
pub mod error;
pub mod genesis;
pub mod index;
pub mod store;
pub mod types;
pub mod validation;

pub use error::{ChainValidationError, LedgerError, MiningError, StoreError, ValidationError};
pub use index::{IndexConfig, IndexEntry, IndexShape, IndexValue, Projection, SecondaryIndex};
pub use types::{Block, Hash256, Record};
pub use validation::ChainRules;
