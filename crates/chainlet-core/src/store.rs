//! Persistence contract for a ledger's chain.
//!
//! The ledger calls the store after every successful mutation and before the
//! new state becomes visible to readers. Only blocks are persisted; the
//! secondary index is always rebuilt by replay when a ledger is opened.
//!
//! [`MemoryStore`] is suitable for testing; the node provides a RocksDB
//! implementation.

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::types::Block;

pub trait LedgerStore: Send + Sync {
    /// The persisted chain, or `None` if nothing has been stored yet.
    fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError>;

    /// Persist a block appended to the current tip.
    fn append_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Atomically replace the whole persisted chain.
    fn replace_chain(&self, blocks: &[Block]) -> Result<(), StoreError>;
}

/// In-memory store with no durability.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<Option<Vec<Block>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerStore for MemoryStore {
    fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError> {
        Ok(self.blocks.read().clone())
    }

    fn append_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut guard = self.blocks.write();
        let blocks = guard
            .as_mut()
            .ok_or_else(|| StoreError::Corrupt("append to empty store".into()))?;
        let expected = blocks.len() as u64;
        if block.index != expected {
            return Err(StoreError::Corrupt(format!(
                "append at index {}, expected {expected}",
                block.index
            )));
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn replace_chain(&self, blocks: &[Block]) -> Result<(), StoreError> {
        *self.blocks.write() = Some(blocks.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn block(index: u64) -> Block {
        Block::new(index, vec![], index, Hash256::ZERO, Hash256::ZERO)
    }

    #[test]
    fn empty_store_loads_none() {
        assert_eq!(MemoryStore::new().load_chain().unwrap(), None);
    }

    #[test]
    fn append_requires_existing_chain() {
        let store = MemoryStore::new();
        assert!(matches!(store.append_block(&block(0)), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn replace_then_append() {
        let store = MemoryStore::new();
        store.replace_chain(&[block(0)]).unwrap();
        store.append_block(&block(1)).unwrap();
        assert_eq!(store.len(), 2);
        assert!(matches!(store.append_block(&block(5)), Err(StoreError::Corrupt(_))));
        store.replace_chain(&[block(0)]).unwrap();
        assert_eq!(store.load_chain().unwrap().unwrap().len(), 1);
    }
}
