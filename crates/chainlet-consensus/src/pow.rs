//! Proof-of-work nonce search.
//!
//! A block is mined when the lowercase hex of its hash starts with at least
//! `difficulty` `'0'` characters. The search starts at nonce 0 and walks
//! upward, so for identical block content and difficulty the same (smallest)
//! nonce is always returned, including by [`mine_parallel`].
//!
//! Every search polls a [`Cancellation`] every [`CANCEL_CHECK_INTERVAL`]
//! nonces. The ledger hands in a [`HeadToken`] so that a chain replacement
//! aborts a search running against a stale head.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chainlet_core::canonical::BlockHasher;
use chainlet_core::constants::MAX_DIFFICULTY;
use chainlet_core::genesis::genesis_template;
use chainlet_core::{Block, ChainRules, Hash256, MiningError};
use tracing::debug;

/// Nonces tried between cancellation checks.
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Nonces handed to a worker at a time by [`mine_parallel`].
pub const PARALLEL_CHUNK: u64 = 4 * CANCEL_CHECK_INTERVAL;

/// A signal polled by the nonce search.
pub trait Cancellation: Sync {
    fn is_cancelled(&self) -> bool;
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Cancellation for Never {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancellation for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Monotonic counter bumped whenever a ledger's head changes.
#[derive(Debug, Clone, Default)]
pub struct HeadVersion(Arc<AtomicU64>);

impl HeadVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance the version, cancelling every outstanding token. Returns the new version.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// A token that cancels once the version moves past its current value.
    pub fn token(&self) -> HeadToken {
        HeadToken {
            version: Arc::clone(&self.0),
            expected: self.current(),
        }
    }
}

/// Cancellation tied to a [`HeadVersion`] snapshot.
#[derive(Debug, Clone)]
pub struct HeadToken {
    version: Arc<AtomicU64>,
    expected: u64,
}

impl HeadToken {
    /// The head version this token was taken at.
    pub fn expected(&self) -> u64 {
        self.expected
    }
}

impl Cancellation for HeadToken {
    fn is_cancelled(&self) -> bool {
        self.version.load(Ordering::Acquire) != self.expected
    }
}

fn search(
    hasher: &BlockHasher,
    difficulty: u32,
    start: u64,
    end: u64,
    cancel: &dyn Cancellation,
) -> Result<u64, MiningError> {
    if start > end || difficulty > MAX_DIFFICULTY {
        return Err(MiningError::SearchExhausted { start, end });
    }
    let mut nonce = start;
    loop {
        if (nonce - start) % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(MiningError::Cancelled);
        }
        if hasher.hash_with_nonce(nonce).meets_difficulty(difficulty) {
            return Ok(nonce);
        }
        if nonce == end {
            return Err(MiningError::SearchExhausted { start, end });
        }
        nonce += 1;
    }
}

/// Find the smallest nonce in `range` that mines `block` at `difficulty`.
///
/// The block's own `nonce` field is ignored. Returns
/// [`MiningError::SearchExhausted`] if no nonce in the range works.
pub fn mine_range(
    block: &Block,
    difficulty: u32,
    range: RangeInclusive<u64>,
    cancel: &dyn Cancellation,
) -> Result<u64, MiningError> {
    let hasher = BlockHasher::new(block);
    search(&hasher, difficulty, *range.start(), *range.end(), cancel)
}

/// Find the smallest non-negative nonce that mines `block` at `difficulty`.
pub fn mine(block: &Block, difficulty: u32, cancel: &dyn Cancellation) -> Result<u64, MiningError> {
    mine_range(block, difficulty, 0..=u64::MAX, cancel)
}

/// Mine `block` in place, setting its nonce. Returns the resulting hash.
pub fn mine_block(
    block: &mut Block,
    difficulty: u32,
    cancel: &dyn Cancellation,
) -> Result<Hash256, MiningError> {
    let nonce = mine(block, difficulty, cancel)?;
    block.nonce = nonce;
    Ok(block.hash())
}

/// Like [`mine`], split across `workers` threads.
///
/// Workers claim consecutive chunks of [`PARALLEL_CHUNK`] nonces in
/// ascending order. A worker stops once a nonce has been found below the
/// start of its next chunk, so every chunk below the winner is fully
/// searched and the result is the same nonce [`mine`] would return.
pub fn mine_parallel(
    block: &Block,
    difficulty: u32,
    workers: usize,
    cancel: &dyn Cancellation,
) -> Result<u64, MiningError> {
    if workers <= 1 {
        return mine(block, difficulty, cancel);
    }
    if difficulty > MAX_DIFFICULTY {
        return Err(MiningError::SearchExhausted { start: 0, end: u64::MAX });
    }

    let hasher = BlockHasher::new(block);
    let next_chunk = AtomicU64::new(0);
    let best = AtomicU64::new(u64::MAX);
    let found = AtomicBool::new(false);
    let cancelled = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let start = next_chunk.fetch_add(PARALLEL_CHUNK, Ordering::SeqCst);
                    if found.load(Ordering::SeqCst) && start > best.load(Ordering::SeqCst) {
                        break;
                    }
                    if start > u64::MAX - PARALLEL_CHUNK {
                        break;
                    }
                    let end = start + PARALLEL_CHUNK - 1;
                    match search(&hasher, difficulty, start, end, cancel) {
                        Ok(nonce) => {
                            best.fetch_min(nonce, Ordering::SeqCst);
                            found.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(MiningError::Cancelled) => {
                            cancelled.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(MiningError::SearchExhausted { .. }) => {}
                    }
                }
            });
        }
    });

    if cancelled.load(Ordering::SeqCst) {
        return Err(MiningError::Cancelled);
    }
    if found.load(Ordering::SeqCst) {
        let nonce = best.load(Ordering::SeqCst);
        debug!(nonce, workers, "parallel search found nonce");
        return Ok(nonce);
    }
    Err(MiningError::SearchExhausted { start: 0, end: u64::MAX })
}

/// Mine the deterministic genesis block for `rules`.
pub fn mine_genesis(rules: &ChainRules) -> Result<Block, MiningError> {
    let mut genesis = genesis_template(rules);
    mine_block(&mut genesis, rules.difficulty, &Never)?;
    Ok(genesis)
}
