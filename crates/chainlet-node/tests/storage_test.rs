//! RocksDB store tests, run against real on-disk databases in temp dirs.

use std::sync::Arc;

use chainlet_consensus::pow::{self, Never};
use chainlet_core::store::LedgerStore;
use chainlet_core::{Block, ChainRules, Hash256, Record, StoreError};
use chainlet_node_lib::apps::App;
use chainlet_node_lib::ledger::Ledger;
use chainlet_node_lib::storage::RocksStore;

/// Unindexed chain of `len` blocks at difficulty 1.
fn make_chain(len: u64, tag: &str) -> Vec<Block> {
    let rules = ChainRules::new(1);
    let mut chain = vec![pow::mine_genesis(&rules).unwrap()];
    for i in 1..len {
        let parent = chain.last().unwrap().hash();
        let mut block = Block::new(
            i,
            vec![Record::new().with("tag", tag).with("n", i)],
            1_800_000_000 + i,
            parent,
            Hash256::ZERO,
        );
        pow::mine_block(&mut block, 1, &Never).unwrap();
        chain.push(block);
    }
    chain
}

#[test]
fn fresh_store_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    assert_eq!(store.len().unwrap(), 0);
    assert!(store.is_empty().unwrap());
    assert_eq!(store.load_chain().unwrap(), None);
}

#[test]
fn append_to_empty_store_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let chain = make_chain(1, "a");
    assert!(matches!(store.append_block(&chain[0]), Err(StoreError::Corrupt(_))));
}

#[test]
fn replace_then_append_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let chain = make_chain(4, "a");

    store.replace_chain(&chain[..2]).unwrap();
    store.append_block(&chain[2]).unwrap();
    store.append_block(&chain[3]).unwrap();

    assert_eq!(store.len().unwrap(), 4);
    assert_eq!(store.get_block(2).unwrap().as_ref(), Some(&chain[2]));
    assert_eq!(store.load_chain().unwrap(), Some(chain));
}

#[test]
fn append_out_of_order_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let chain = make_chain(3, "a");
    store.replace_chain(&chain[..1]).unwrap();
    assert!(matches!(store.append_block(&chain[2]), Err(StoreError::Corrupt(_))));
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn replace_with_shorter_chain_drops_stale_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let long = make_chain(5, "long");
    let short = make_chain(3, "short");

    store.replace_chain(&long).unwrap();
    store.replace_chain(&short).unwrap();

    assert_eq!(store.len().unwrap(), 3);
    assert_eq!(store.get_block(3).unwrap(), None);
    assert_eq!(store.get_block(4).unwrap(), None);
    assert_eq!(store.load_chain().unwrap(), Some(short));
}

#[test]
fn replace_rejects_misnumbered_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let chain = make_chain(3, "a");
    let skipping = vec![chain[0].clone(), chain[2].clone()];
    assert!(store.replace_chain(&skipping).is_err());
    assert!(store.is_empty().unwrap());
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let chain = make_chain(3, "a");
    {
        let store = RocksStore::open(dir.path()).unwrap();
        store.replace_chain(&chain).unwrap();
        store.flush().unwrap();
        store.compact().unwrap();
    }
    let store = RocksStore::open(dir.path()).unwrap();
    assert_eq!(store.load_chain().unwrap(), Some(chain));
}

#[test]
fn ledger_over_rocks_store_reopens_with_index() {
    let dir = tempfile::tempdir().unwrap();
    let rules = || App::Transfers.rules(1);
    let transfer = |v: i64| {
        Record::new()
            .with("from", "a")
            .with("to", "b")
            .with("value", v)
            .with("description", "x")
    };
    let before = {
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let ledger = Ledger::open("transfers", rules(), Some(store)).unwrap();
        ledger.submit(transfer(1));
        ledger.seal().unwrap();
        ledger.submit(transfer(2));
        ledger.seal().unwrap();
        ledger.index().unwrap().snapshot_hash()
    };

    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let ledger = Ledger::open("transfers", rules(), Some(store)).unwrap();
    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger.index().unwrap().snapshot_hash(), before);
    assert!(ledger.validate().is_ok());
}
