//! Longest-valid-chain reconciliation.
//!
//! Among candidate chains obtained from peers, adopt the longest one that is
//! strictly longer than the local chain and fully valid: links, proofs,
//! genesis identity, and every embedded index snapshot hash. Candidates of
//! equal length to the current best are ignored, so the local chain wins ties
//! against candidates and the first-seen candidate wins ties among
//! candidates.
//!
//! Reconciliation is pure. It produces the replacement chain together with the
//! index rebuilt by replay; the caller swaps both in at once or not at all.

use chainlet_core::validation::validate_with_rules;
use chainlet_core::{Block, ChainRules, SecondaryIndex};
use tracing::{debug, info, warn};

/// A candidate chain selected for adoption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adoption {
    /// The full replacement chain.
    pub chain: Vec<Block>,
    /// Index rebuilt by replaying `chain` from genesis.
    pub index: Option<SecondaryIndex>,
    /// Position of the winning candidate in the input sequence.
    pub source: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Replaced(Adoption),
    Kept,
}

impl Reconciliation {
    pub fn is_replaced(&self) -> bool {
        matches!(self, Self::Replaced(_))
    }
}

/// Pick the longest valid candidate strictly longer than `local`.
pub fn reconcile<I>(local: &[Block], candidates: I, rules: &ChainRules) -> Reconciliation
where
    I: IntoIterator<Item = Vec<Block>>,
{
    let local_genesis = local.first().map(Block::hash);
    let mut best_len = local.len();
    let mut best: Option<Adoption> = None;

    for (source, candidate) in candidates.into_iter().enumerate() {
        if candidate.len() <= best_len {
            debug!(source, length = candidate.len(), best_len, "candidate not longer, skipping");
            continue;
        }
        if let (Some(expected), Some(genesis)) = (local_genesis, candidate.first()) {
            if genesis.hash() != expected {
                warn!(source, "candidate genesis differs from local genesis, rejecting");
                continue;
            }
        }
        match validate_with_rules(&candidate, rules) {
            Ok(index) => {
                best_len = candidate.len();
                best = Some(Adoption {
                    chain: candidate,
                    index,
                    source,
                });
            }
            Err(e) => {
                warn!(
                    source,
                    position = e.position,
                    error = %e,
                    "rejecting invalid candidate chain"
                );
            }
        }
    }

    match best {
        Some(adoption) => {
            info!(
                source = adoption.source,
                from = local.len(),
                to = adoption.chain.len(),
                "longer valid chain selected"
            );
            Reconciliation::Replaced(adoption)
        }
        None => Reconciliation::Kept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::{mine_block, mine_genesis, Never};
    use chainlet_core::{Hash256, IndexConfig, IndexEntry, IndexShape, IndexValue, Record};
    use serde_json::json;

    fn owner(record: &Record) -> Vec<IndexEntry> {
        match (record.get_str("token"), record.get("to")) {
            (Some(t), Some(to)) => vec![IndexEntry::new(t, to.clone())],
            _ => vec![],
        }
    }

    fn rules() -> ChainRules {
        ChainRules::new(1).with_index(IndexConfig::new(IndexShape::Map, owner))
    }

    /// Extend `chain` by `n` blocks, each carrying one record tagged with `tag`.
    fn extend(mut chain: Vec<Block>, n: usize, tag: &str, rules: &ChainRules) -> Vec<Block> {
        let config = rules.index.as_ref().unwrap();
        let mut index = chainlet_core::index::replay(&chain, config).unwrap();
        for _ in 0..n {
            let parent = chain.last().unwrap();
            let i = parent.index + 1;
            let record = Record::new().with("token", format!("t{i}")).with("to", tag);
            let mut block = Block::new(i, vec![record], i, parent.hash(), index.snapshot_hash());
            mine_block(&mut block, rules.difficulty, &Never).unwrap();
            index.apply_in_place(&block.records, config.projection.as_ref());
            chain.push(block);
        }
        chain
    }

    fn base(rules: &ChainRules) -> Vec<Block> {
        vec![mine_genesis(rules).unwrap()]
    }

    #[test]
    fn adopts_longest_valid_candidate() {
        let rules = rules();
        let local = extend(base(&rules), 2, "local", &rules);
        let five = extend(base(&rules), 4, "five", &rules);
        let seven = extend(base(&rules), 6, "seven", &rules);

        match reconcile(&local, vec![five, seven.clone()], &rules) {
            Reconciliation::Replaced(a) => {
                assert_eq!(a.source, 1);
                assert_eq!(a.chain, seven);
                let index = a.index.unwrap();
                assert_eq!(index.len(), 6);
                assert_eq!(index.lookup("t6"), Some(&IndexValue::Single(json!("seven"))));
            }
            Reconciliation::Kept => panic!("expected replacement"),
        }
    }

    #[test]
    fn keeps_local_when_no_candidate_is_longer() {
        let rules = rules();
        let local = extend(base(&rules), 3, "local", &rules);
        let equal = extend(base(&rules), 3, "peer", &rules);
        let shorter = extend(base(&rules), 1, "peer", &rules);
        assert_eq!(reconcile(&local, vec![equal, shorter], &rules), Reconciliation::Kept);
        assert_eq!(reconcile(&local, Vec::<Vec<Block>>::new(), &rules), Reconciliation::Kept);
    }

    #[test]
    fn longer_but_broken_candidate_is_rejected() {
        let rules = rules();
        let local = extend(base(&rules), 5, "local", &rules);
        let mut long = extend(base(&rules), 7, "peer", &rules);
        long[4].previous_hash = Hash256::digest(b"forged");
        assert_eq!(reconcile(&local, vec![long], &rules), Reconciliation::Kept);
    }

    #[test]
    fn first_seen_wins_among_equal_length_candidates() {
        let rules = rules();
        let local = base(&rules);
        let a = extend(base(&rules), 3, "a", &rules);
        let b = extend(base(&rules), 3, "b", &rules);
        match reconcile(&local, vec![a.clone(), b], &rules) {
            Reconciliation::Replaced(adoption) => assert_eq!(adoption.chain, a),
            Reconciliation::Kept => panic!("expected replacement"),
        }
    }

    #[test]
    fn invalid_longest_falls_back_to_next_valid() {
        let rules = rules();
        let local = base(&rules);
        let good = extend(base(&rules), 3, "good", &rules);
        let mut bad = extend(base(&rules), 6, "bad", &rules);
        bad[2].records[0].insert("to", "mallory");
        match reconcile(&local, vec![bad, good.clone()], &rules) {
            Reconciliation::Replaced(adoption) => {
                assert_eq!(adoption.source, 1);
                assert_eq!(adoption.chain, good);
            }
            Reconciliation::Kept => panic!("expected replacement"),
        }
    }

    #[test]
    fn forged_index_hash_is_rejected() {
        let rules = rules();
        let local = base(&rules);
        let mut chain = extend(base(&rules), 2, "peer", &rules);
        // Re-mine block 2 with a wrong snapshot hash so links and proofs still hold.
        let mut forged = chain.pop().unwrap();
        forged.previous_index_hash = Hash256::digest(b"forged index");
        mine_block(&mut forged, rules.difficulty, &Never).unwrap();
        chain.push(forged);
        assert!(chainlet_core::validation::validate_chain(&chain, rules.difficulty).is_ok());
        assert_eq!(reconcile(&local, vec![chain], &rules), Reconciliation::Kept);
    }

    #[test]
    fn different_genesis_is_rejected() {
        let rules = rules();
        let local = base(&rules);
        let other_rules = ChainRules::new(1).with_index(IndexConfig::new(IndexShape::Multimap, owner));
        let foreign = extend(base(&other_rules), 3, "x", &other_rules);
        assert_eq!(reconcile(&local, vec![foreign], &rules), Reconciliation::Kept);
    }
}
