//! Core ledger types: hashes, records, blocks.
//!
//! A block's hash is never stored. It is always derived from the block's
//! canonical serialization (see [`canonical`](crate::canonical)), so a hash
//! received from a peer is never trusted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::canonical;
use crate::error::{HashParseError, RecordError};

/// A 32-byte SHA-256 digest.
///
/// The zero hash doubles as the "no link" sentinel: the genesis parent and
/// the index snapshot of a ledger without an index. It renders as `"0"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash, rendered as the `"0"` sentinel.
    pub const ZERO: Self = Self([0u8; 32]);

    /// SHA-256 of the given bytes.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Number of leading `'0'` characters in the lowercase hex rendering.
    pub fn leading_zero_nibbles(&self) -> u32 {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 2;
            } else {
                if *byte < 0x10 {
                    count += 1;
                }
                break;
            }
        }
        count
    }

    /// Whether the hex digest starts with at least `difficulty` zero characters.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_nibbles() >= difficulty
    }

    /// Full 64-character hex, without the zero sentinel.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "0" {
            return Ok(Self::ZERO);
        }
        let bytes = hex::decode(s).map_err(|e| HashParseError::InvalidHex(e.to_string()))?;
        let len = bytes.len();
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashParseError::InvalidLength(len))?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An opaque application record: a JSON object of named fields.
///
/// The ledger never interprets record contents; only the configured index
/// projection looks inside.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A field as a string slice, if present and a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Check that every named field is present and non-empty.
    pub fn require(&self, fields: &[&str]) -> Result<(), RecordError> {
        for field in fields {
            match self.0.get(*field) {
                None | Some(Value::Null) => {
                    return Err(RecordError::MissingField((*field).to_string()));
                }
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(RecordError::MissingField((*field).to_string()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(RecordError::NotAnObject),
        }
    }
}

/// A sealed batch of records linked to its predecessor.
///
/// `nonce` is the only field mutated after construction, and only by the
/// proof-of-work search.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Position in the chain; genesis is 0.
    pub index: u64,
    /// Records in submission order.
    pub records: Vec<Record>,
    /// Unix seconds at creation. Informational only.
    pub timestamp: u64,
    /// Hash of the preceding block, or the zero sentinel for genesis.
    pub previous_hash: Hash256,
    /// Index snapshot hash taken just before this block's records were applied.
    #[serde(default)]
    pub previous_index_hash: Hash256,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl Block {
    /// Build an unmined block (nonce 0).
    pub fn new(
        index: u64,
        records: Vec<Record>,
        timestamp: u64,
        previous_hash: Hash256,
        previous_index_hash: Hash256,
    ) -> Self {
        Self {
            index,
            records,
            timestamp,
            previous_hash,
            previous_index_hash,
            nonce: 0,
        }
    }

    /// Recompute the block hash from its current fields.
    pub fn hash(&self) -> Hash256 {
        canonical::block_hash(self)
    }

    /// Same block with a different nonce.
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash.is_zero()
    }
}

/// Current wall-clock time in Unix seconds.
pub fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
