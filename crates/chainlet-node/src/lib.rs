//! # chainlet-node: Ledger orchestration, persistence, peers, HTTP.
//!
//! Composes the Chainlet subsystems into a running node:
//! - [`ledger::Ledger`]: chain, pending pool, and index under concurrency control
//! - [`apps`]: the asset, transfer, and identity projections
//! - [`storage::RocksStore`]: RocksDB persistence for a ledger's chain
//! - [`peers`]: peer registry and HTTP peer client
//! - [`node::Node`]: one ledger per application plus peer reconciliation
//! - [`api`]: axum HTTP router
//! - [`config::NodeConfig`]: node configuration

pub mod api;
pub mod apps;
pub mod config;
pub mod ledger;
pub mod node;
pub mod peers;
pub mod storage;

pub use api::router;
pub use apps::App;
pub use config::NodeConfig;
pub use ledger::{Ledger, LedgerSnapshot, SealOutcome};
pub use node::Node;
pub use storage::RocksStore;
