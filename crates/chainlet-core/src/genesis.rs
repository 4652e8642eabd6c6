//! Genesis block definition.
//!
//! Genesis is deterministic for a given set of [`ChainRules`]: no records, a
//! fixed timestamp, the zero parent link, and the snapshot hash of the empty
//! index. Independently started nodes with the same rules therefore agree on
//! it once it is mined (see `chainlet_consensus::pow::mine_genesis`).

use crate::constants::GENESIS_TIMESTAMP;
use crate::types::{Block, Hash256};
use crate::validation::ChainRules;

/// The unmined genesis block (nonce 0).
pub fn genesis_template(rules: &ChainRules) -> Block {
    Block::new(0, Vec::new(), GENESIS_TIMESTAMP, Hash256::ZERO, rules.initial_index_hash())
}
