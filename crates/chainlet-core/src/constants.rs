//! Ledger-wide constants.

/// Default proof-of-work difficulty (leading zero hex characters).
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// A SHA-256 digest has 64 hex characters; no difficulty above that can be met.
pub const MAX_DIFFICULTY: u32 = 64;

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

/// Default HTTP port for the node API.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default timeout for a single peer request, in seconds.
pub const DEFAULT_PEER_TIMEOUT_SECS: u64 = 5;
