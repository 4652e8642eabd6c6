//! Secondary-index overlay.
//!
//! A keyed projection folded over every committed record, in one of two
//! shapes fixed at configuration time:
//!
//! - [`IndexShape::Map`]: key to a single value, last write wins.
//! - [`IndexShape::Multimap`]: key to an ordered sequence, append-only.
//!
//! The record-to-entry mapping is supplied by the caller as a [`Projection`];
//! nothing here knows about any particular application. Each block carries the
//! snapshot hash of the index as it stood just before the block's records were
//! applied, which [`replay`] verifies when rebuilding from genesis.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical;
use crate::error::{ChainValidationError, ValidationError};
use crate::types::{Block, Hash256, Record};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IndexShape {
    Map,
    Multimap,
}

impl IndexShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Multimap => "multimap",
        }
    }
}

/// One key/value mutation produced by a projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub value: Value,
}

impl IndexEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Maps a record to the index entries it contributes.
///
/// Must be pure: replaying the same records must always yield the same
/// entries. Records the projection does not recognise should yield nothing.
pub trait Projection: Send + Sync {
    fn project(&self, record: &Record) -> Vec<IndexEntry>;
}

impl<F> Projection for F
where
    F: Fn(&Record) -> Vec<IndexEntry> + Send + Sync,
{
    fn project(&self, record: &Record) -> Vec<IndexEntry> {
        self(record)
    }
}

/// Index shape plus projection, fixed for a ledger's lifetime.
#[derive(Clone)]
pub struct IndexConfig {
    pub shape: IndexShape,
    pub projection: Arc<dyn Projection>,
}

impl fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexConfig")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl IndexConfig {
    pub fn new(shape: IndexShape, projection: impl Projection + 'static) -> Self {
        Self {
            shape,
            projection: Arc::new(projection),
        }
    }

    /// An empty index of the configured shape.
    pub fn empty(&self) -> SecondaryIndex {
        SecondaryIndex::new(self.shape)
    }
}

/// Value stored under one key.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum IndexValue {
    Single(Value),
    Sequence(Vec<Value>),
}

impl IndexValue {
    fn to_json(&self) -> Value {
        match self {
            Self::Single(v) => v.clone(),
            Self::Sequence(vs) => Value::Array(vs.clone()),
        }
    }
}

/// The materialised projection.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SecondaryIndex {
    shape: IndexShape,
    entries: BTreeMap<String, IndexValue>,
}

impl SecondaryIndex {
    pub fn new(shape: IndexShape) -> Self {
        Self {
            shape,
            entries: BTreeMap::new(),
        }
    }

    pub fn shape(&self) -> IndexShape {
        self.shape
    }

    /// Fold a record batch into a copy of this index.
    pub fn apply(&self, records: &[Record], projection: &dyn Projection) -> SecondaryIndex {
        let mut next = self.clone();
        next.apply_in_place(records, projection);
        next
    }

    /// Fold a record batch into this index, in record order.
    pub fn apply_in_place(&mut self, records: &[Record], projection: &dyn Projection) {
        for record in records {
            for entry in projection.project(record) {
                self.insert(entry);
            }
        }
    }

    fn insert(&mut self, entry: IndexEntry) {
        match self.shape {
            IndexShape::Map => {
                self.entries.insert(entry.key, IndexValue::Single(entry.value));
            }
            IndexShape::Multimap => {
                let slot = self
                    .entries
                    .entry(entry.key)
                    .or_insert_with(|| IndexValue::Sequence(Vec::new()));
                if let IndexValue::Sequence(values) = slot {
                    values.push(entry.value);
                }
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&IndexValue> {
        self.entries.get(key)
    }

    /// The full projection, ordered by key.
    pub fn snapshot(&self) -> &BTreeMap<String, IndexValue> {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 over `{"entries":{...},"shape":"map"|"multimap"}` in canonical form.
    pub fn snapshot_hash(&self) -> Hash256 {
        let entries: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let mut doc = Map::new();
        doc.insert("entries".into(), Value::Object(entries));
        doc.insert("shape".into(), Value::String(self.shape.as_str().into()));
        Hash256::digest(canonical::to_canonical_string(&Value::Object(doc)).as_bytes())
    }
}

/// Rebuild the index from genesis, checking every block's embedded snapshot hash.
///
/// Returns the index after the last block. Fails at the first block whose
/// `previous_index_hash` disagrees with the replayed state; such a chain must
/// be rejected as a whole.
pub fn replay(
    blocks: &[Block],
    config: &IndexConfig,
) -> Result<SecondaryIndex, ChainValidationError> {
    let mut index = config.empty();
    for (position, block) in blocks.iter().enumerate() {
        let expected = index.snapshot_hash();
        if block.previous_index_hash != expected {
            return Err(ChainValidationError::at(
                position,
                ValidationError::IndexInconsistency {
                    index: block.index,
                    expected,
                    got: block.previous_index_hash,
                },
            ));
        }
        index.apply_in_place(&block.records, config.projection.as_ref());
    }
    Ok(index)
}
