//! Integration test suite for Chainlet.
//!
//! Multi-node scenarios run either in-process, through [`helpers::Network`],
//! or over real HTTP between nodes bound to ephemeral local ports.

pub mod helpers;
