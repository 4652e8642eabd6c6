//! RocksDB-backed chain storage.
//!
//! Implements [`LedgerStore`] with two column families: `blocks`, keyed by
//! big-endian block index so iteration follows chain order, and `metadata`,
//! which holds the persisted chain length. Blocks are stored as JSON in their
//! wire form. Every mutation is a single atomic [`WriteBatch`].
//!
//! The secondary index is never stored; the ledger rebuilds it by replay.

use std::path::Path;

use chainlet_core::error::StoreError;
use chainlet_core::store::LedgerStore;
use chainlet_core::types::Block;
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_METADATA];

// --- Metadata keys ---

const META_LENGTH: &[u8] = b"length";

pub struct RocksStore {
    db: DB,
    /// Serialises read-modify-write of the length key.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a database at `path`, creating column families as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Number of persisted blocks.
    pub fn len(&self) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(cf, META_LENGTH)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("invalid length value".into()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Block at `index`, if persisted.
    pub fn get_block(&self, index: u64) -> Result<Option<Block>, StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        self.db
            .get_cf(cf, Self::block_key(index))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|bytes| Self::decode_block(&bytes))
            .transpose()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Trigger manual compaction across all column families.
    pub fn compact(&self) -> Result<(), StoreError> {
        for cf_name in ALL_CFS {
            let cf = self.cf_handle(cf_name)?;
            self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    /// Big-endian so lexicographic key order is chain order.
    fn block_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn encode_block(block: &Block) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(block).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode_block(bytes: &[u8]) -> Result<Block, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl LedgerStore for RocksStore {
    fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError> {
        let length = self.len()?;
        if length == 0 {
            return Ok(None);
        }
        let mut chain = Vec::with_capacity(length as usize);
        for index in 0..length {
            let block = self
                .get_block(index)?
                .ok_or_else(|| StoreError::Corrupt(format!("missing block {index} of {length}")))?;
            if block.index != index {
                return Err(StoreError::Corrupt(format!(
                    "block stored at {index} claims index {}",
                    block.index
                )));
            }
            chain.push(block);
        }
        tracing::debug!(length, "loaded chain");
        Ok(Some(chain))
    }

    fn append_block(&self, block: &Block) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let length = self.len()?;
        if length == 0 {
            return Err(StoreError::Corrupt("append to empty store".into()));
        }
        if block.index != length {
            return Err(StoreError::Corrupt(format!(
                "append at index {}, expected {length}",
                block.index
            )));
        }

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_blocks, Self::block_key(block.index), Self::encode_block(block)?);
        batch.put_cf(cf_meta, META_LENGTH, (length + 1).to_be_bytes());
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn replace_chain(&self, blocks: &[Block]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let old_length = self.len()?;
        let new_length = blocks.len() as u64;

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let mut batch = WriteBatch::default();
        for (position, block) in blocks.iter().enumerate() {
            if block.index != position as u64 {
                return Err(StoreError::Corrupt(format!(
                    "block at position {position} claims index {}",
                    block.index
                )));
            }
            batch.put_cf(cf_blocks, Self::block_key(block.index), Self::encode_block(block)?);
        }
        for stale in new_length..old_length {
            batch.delete_cf(cf_blocks, Self::block_key(stale));
        }
        batch.put_cf(cf_meta, META_LENGTH, new_length.to_be_bytes());
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::info!(from = old_length, to = new_length, "replaced persisted chain");
        Ok(())
    }
}
