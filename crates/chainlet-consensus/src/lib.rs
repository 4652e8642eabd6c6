//! # chainlet-consensus: Proof-of-work and chain reconciliation.
//!
//! - [`pow`]: the nonce search, cancellable and optionally split across
//!   worker threads, always returning the smallest satisfying nonce.
//! - [`reconcile`]: longest-valid-chain selection among peer candidates.

pub mod pow;
pub mod reconcile;

pub use pow::{
    Cancellation, HeadToken, HeadVersion, Never, mine, mine_block, mine_genesis, mine_parallel,
    mine_range,
};
pub use reconcile::{Adoption, Reconciliation, reconcile};
