//! Block and chain validation.
//!
//! Two levels:
//!
//! - **Single block** ([`accept`]): a candidate against the current tip.
//!   Checks the parent link, the index, and the proof-of-work of the candidate
//!   with its claimed nonce.
//! - **Whole chain** ([`validate_chain`], [`validate_with_rules`]): walks from
//!   genesis forward, recomputing every hash from the stored fields. A failure
//!   at any position rejects the whole chain.
//!
//! Hashes are always recomputed. A hash transmitted alongside a block is
//! never consulted.

use tracing::debug;

use crate::error::{ChainValidationError, ValidationError};
use crate::index::{self, IndexConfig, SecondaryIndex};
use crate::types::{Block, Hash256};

/// Consensus parameters shared by every block of a chain.
#[derive(Clone, Debug)]
pub struct ChainRules {
    /// Required leading zero hex characters in every block hash.
    pub difficulty: u32,
    /// Secondary index, if the ledger keeps one.
    pub index: Option<IndexConfig>,
}

impl ChainRules {
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            index: None,
        }
    }

    pub fn with_index(mut self, config: IndexConfig) -> Self {
        self.index = Some(config);
        self
    }

    /// The index before any block has been applied.
    pub fn empty_index(&self) -> Option<SecondaryIndex> {
        self.index.as_ref().map(IndexConfig::empty)
    }

    /// `previous_index_hash` carried by genesis.
    pub fn initial_index_hash(&self) -> Hash256 {
        self.empty_index()
            .map(|idx| idx.snapshot_hash())
            .unwrap_or(Hash256::ZERO)
    }
}

/// Recompute the hash of `block` and check it against the difficulty target.
pub fn check_proof(block: &Block, difficulty: u32) -> Result<Hash256, ValidationError> {
    let hash = block.hash();
    if !hash.meets_difficulty(difficulty) {
        return Err(ValidationError::ProofInvalid { index: block.index });
    }
    Ok(hash)
}

/// Check that `candidate` directly extends `parent`, whose hash is `parent_hash`.
pub fn check_successor(
    parent: &Block,
    parent_hash: &Hash256,
    candidate: &Block,
) -> Result<(), ValidationError> {
    if candidate.previous_hash != *parent_hash {
        return Err(ValidationError::LinkMismatch {
            index: candidate.index,
            expected: *parent_hash,
            got: candidate.previous_hash,
        });
    }
    let expected = parent.index + 1;
    if candidate.index != expected {
        return Err(ValidationError::IndexMismatch {
            expected,
            got: candidate.index,
        });
    }
    Ok(())
}

/// Append `candidate`, sealed with `claimed_nonce`, to `chain` if it is a valid successor.
///
/// On failure the chain is left untouched. Returns the new tip hash.
pub fn accept(
    chain: &mut Vec<Block>,
    mut candidate: Block,
    claimed_nonce: u64,
    difficulty: u32,
) -> Result<Hash256, ValidationError> {
    let last = chain.last().ok_or(ValidationError::EmptyChain)?;
    check_successor(last, &last.hash(), &candidate)?;
    candidate.nonce = claimed_nonce;
    let hash = check_proof(&candidate, difficulty)?;
    chain.push(candidate);
    Ok(hash)
}

/// Validate a chain from genesis forward.
pub fn validate_chain(blocks: &[Block], difficulty: u32) -> Result<(), ChainValidationError> {
    let genesis = blocks
        .first()
        .ok_or(ChainValidationError::at(0, ValidationError::EmptyChain))?;
    if !genesis.is_genesis() {
        return Err(ChainValidationError::at(0, ValidationError::InvalidGenesis));
    }
    let mut parent_hash =
        check_proof(genesis, difficulty).map_err(|e| ChainValidationError::at(0, e))?;

    for (position, pair) in blocks.windows(2).enumerate() {
        let (parent, block) = (&pair[0], &pair[1]);
        let position = position + 1;
        check_successor(parent, &parent_hash, block)
            .map_err(|e| ChainValidationError::at(position, e))?;
        parent_hash =
            check_proof(block, difficulty).map_err(|e| ChainValidationError::at(position, e))?;
    }
    debug!(length = blocks.len(), tip = %parent_hash, "chain validated");
    Ok(())
}

/// Whether [`validate_chain`] accepts `blocks`.
pub fn is_valid(blocks: &[Block], difficulty: u32) -> bool {
    validate_chain(blocks, difficulty).is_ok()
}

/// Full validation: links, proofs, and the embedded index snapshot hashes.
///
/// Returns the index rebuilt by replay (or `None` for an unindexed ledger, in
/// which case every block must carry the zero sentinel).
pub fn validate_with_rules(
    blocks: &[Block],
    rules: &ChainRules,
) -> Result<Option<SecondaryIndex>, ChainValidationError> {
    validate_chain(blocks, rules.difficulty)?;
    match &rules.index {
        Some(config) => index::replay(blocks, config).map(Some),
        None => {
            for (position, block) in blocks.iter().enumerate() {
                if !block.previous_index_hash.is_zero() {
                    return Err(ChainValidationError::at(
                        position,
                        ValidationError::IndexInconsistency {
                            index: block.index,
                            expected: Hash256::ZERO,
                            got: block.previous_index_hash,
                        },
                    ));
                }
            }
            Ok(None)
        }
    }
}
