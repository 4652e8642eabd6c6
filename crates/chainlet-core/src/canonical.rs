//! Canonical serialization used as hash input.
//!
//! Compact JSON with object keys sorted by byte order, strings escaped the way
//! serde_json escapes them, numbers in serde_json's shortest form. Key order is
//! enforced here rather than relying on `serde_json::Map` ordering, so enabling
//! `preserve_order` anywhere in the dependency graph cannot change a hash.
//!
//! A block is encoded as:
//!
//! ```text
//! {"index":I,"nonce":N,"previous_hash":"H","previous_index_hash":"H","records":[...],"timestamp":T}
//! ```
//!
//! The zero hash is written as `"0"`.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{Block, Hash256};

/// Append the canonical form of `value` to `out`.
pub fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_str(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_str(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

/// Append a JSON string literal.
pub fn write_str(out: &mut String, s: &str) {
    // Display on a string Value is infallible compact serialization.
    out.push_str(&Value::String(s.to_owned()).to_string());
}

/// Canonical form of an arbitrary JSON value.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Canonical text before and after the nonce digits.
fn block_parts(block: &Block) -> (String, String) {
    let mut prefix = String::with_capacity(32);
    prefix.push_str("{\"index\":");
    prefix.push_str(&block.index.to_string());
    prefix.push_str(",\"nonce\":");

    let mut suffix = String::with_capacity(160);
    suffix.push_str(",\"previous_hash\":");
    write_str(&mut suffix, &block.previous_hash.to_string());
    suffix.push_str(",\"previous_index_hash\":");
    write_str(&mut suffix, &block.previous_index_hash.to_string());
    suffix.push_str(",\"records\":[");
    for (i, record) in block.records.iter().enumerate() {
        if i > 0 {
            suffix.push(',');
        }
        let mut keys: Vec<&String> = record.fields().keys().collect();
        keys.sort_unstable();
        suffix.push('{');
        for (j, key) in keys.into_iter().enumerate() {
            if j > 0 {
                suffix.push(',');
            }
            write_str(&mut suffix, key);
            suffix.push(':');
            write_value(&mut suffix, &record.fields()[key.as_str()]);
        }
        suffix.push('}');
    }
    suffix.push_str("],\"timestamp\":");
    suffix.push_str(&block.timestamp.to_string());
    suffix.push('}');

    (prefix, suffix)
}

/// Full canonical encoding of a block, including its current nonce.
pub fn encode_block(block: &Block) -> String {
    let (prefix, suffix) = block_parts(block);
    format!("{prefix}{}{suffix}", block.nonce)
}

/// SHA-256 of the block's canonical encoding.
pub fn block_hash(block: &Block) -> Hash256 {
    Hash256::digest(encode_block(block).as_bytes())
}

/// Incremental hasher for the nonce search.
///
/// Holds the SHA-256 state after absorbing everything before the nonce, so
/// each attempt only hashes the nonce digits and the suffix.
#[derive(Clone)]
pub struct BlockHasher {
    midstate: Sha256,
    suffix: Vec<u8>,
}

impl BlockHasher {
    pub fn new(block: &Block) -> Self {
        let (prefix, suffix) = block_parts(block);
        let mut midstate = Sha256::new();
        midstate.update(prefix.as_bytes());
        Self {
            midstate,
            suffix: suffix.into_bytes(),
        }
    }

    /// Hash of the block as if its nonce were `nonce`.
    pub fn hash_with_nonce(&self, nonce: u64) -> Hash256 {
        let mut state = self.midstate.clone();
        state.update(nonce.to_string().as_bytes());
        state.update(&self.suffix);
        Hash256(state.finalize().into())
    }
}
