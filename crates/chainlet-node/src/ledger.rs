//! The ledger: chain, pending pool, and secondary index.
//!
//! Concurrency model:
//!
//! - Readers clone an `Arc<LedgerSnapshot>` under a brief read lock and never
//!   wait on mining.
//! - [`Ledger::seal`] takes the pending pool, then mines without holding any
//!   ledger lock. The search polls a [`HeadToken`]; any head change (a sealed
//!   or received block, or an adopted chain) cancels it, and the taken records
//!   go back to the front of the pool in their original order.
//! - Every head change goes through the commit lock, is persisted, and is then
//!   published together with a head-version bump under the state write lock.
//!
//! Mining is CPU-bound; async callers should run `seal` on a blocking worker.

use std::collections::VecDeque;
use std::sync::Arc;

use chainlet_consensus::pow::{self, HeadToken, HeadVersion};
use chainlet_consensus::reconcile::{self, Reconciliation};
use chainlet_core::error::ChainValidationError;
use chainlet_core::store::LedgerStore;
use chainlet_core::types::now_secs;
use chainlet_core::validation::{self, ChainRules};
use chainlet_core::{
    Block, Hash256, IndexValue, LedgerError, MiningError, Record, SecondaryIndex, ValidationError,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// An immutable view of the ledger at one head version.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub chain: Arc<Vec<Block>>,
    pub index: Option<Arc<SecondaryIndex>>,
    pub version: u64,
}

impl LedgerSnapshot {
    /// Tip block. The chain always holds at least genesis.
    pub fn tip(&self) -> Option<&Block> {
        self.chain.last()
    }

    fn index_hash(&self) -> Hash256 {
        self.index
            .as_ref()
            .map(|idx| idx.snapshot_hash())
            .unwrap_or(Hash256::ZERO)
    }
}

/// Result of a [`Ledger::seal`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealOutcome {
    /// A block was mined and appended.
    Sealed(Block),
    /// The pending pool was empty.
    NothingPending,
    /// The head moved during mining; the records are back in the pool.
    Cancelled,
}

impl SealOutcome {
    pub fn block(&self) -> Option<&Block> {
        match self {
            Self::Sealed(block) => Some(block),
            _ => None,
        }
    }

    pub fn into_block(self) -> Option<Block> {
        match self {
            Self::Sealed(block) => Some(block),
            _ => None,
        }
    }
}

pub struct Ledger {
    name: String,
    rules: ChainRules,
    mining_threads: usize,
    state: RwLock<Arc<LedgerSnapshot>>,
    pending: Mutex<VecDeque<Record>>,
    seal_lock: Mutex<()>,
    commit_lock: Mutex<()>,
    head: HeadVersion,
    store: Option<Arc<dyn LedgerStore>>,
    clock: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("name", &self.name)
            .field("difficulty", &self.rules.difficulty)
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open a ledger.
    ///
    /// With a store that already holds a chain, the chain is validated and the
    /// index rebuilt by replay; a chain that fails validation is refused.
    /// Otherwise the ledger starts from the mined genesis block, which is
    /// persisted immediately.
    pub fn open(
        name: impl Into<String>,
        rules: ChainRules,
        store: Option<Arc<dyn LedgerStore>>,
    ) -> Result<Self, LedgerError> {
        let name = name.into();
        let stored = match &store {
            Some(store) => store.load_chain()?,
            None => None,
        };

        let (chain, index) = match stored {
            Some(chain) => {
                let index = validation::validate_with_rules(&chain, &rules)
                    .map_err(LedgerError::CorruptChain)?;
                info!(ledger = %name, length = chain.len(), "loaded chain from store");
                (chain, index)
            }
            None => {
                let genesis = pow::mine_genesis(&rules)?;
                if let Some(store) = &store {
                    store.replace_chain(std::slice::from_ref(&genesis))?;
                }
                info!(ledger = %name, hash = %genesis.hash(), "initialised genesis");
                (vec![genesis], rules.empty_index())
            }
        };

        let snapshot = LedgerSnapshot {
            chain: Arc::new(chain),
            index: index.map(Arc::new),
            version: 0,
        };

        Ok(Self {
            name,
            rules,
            mining_threads: 1,
            state: RwLock::new(Arc::new(snapshot)),
            pending: Mutex::new(VecDeque::new()),
            seal_lock: Mutex::new(()),
            commit_lock: Mutex::new(()),
            head: HeadVersion::new(),
            store,
            clock: Box::new(now_secs),
        })
    }

    /// In-memory ledger with no persistence.
    pub fn in_memory(name: impl Into<String>, rules: ChainRules) -> Result<Self, LedgerError> {
        Self::open(name, rules, None)
    }

    /// Number of worker threads used per mining attempt.
    pub fn with_mining_threads(mut self, threads: usize) -> Self {
        self.mining_threads = threads.max(1);
        self
    }

    /// Replace the block timestamp source.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &ChainRules {
        &self.rules
    }

    // --- Read path ---

    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        Arc::clone(&self.state.read())
    }

    pub fn chain(&self) -> Arc<Vec<Block>> {
        Arc::clone(&self.snapshot().chain)
    }

    pub fn len(&self) -> usize {
        self.snapshot().chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the tip block.
    pub fn height(&self) -> u64 {
        self.snapshot().tip().map_or(0, |b| b.index)
    }

    pub fn last_block(&self) -> Option<Block> {
        self.snapshot().tip().cloned()
    }

    pub fn index(&self) -> Option<Arc<SecondaryIndex>> {
        self.snapshot().index.clone()
    }

    pub fn lookup(&self, key: &str) -> Option<IndexValue> {
        self.snapshot()
            .index
            .as_ref()
            .and_then(|idx| idx.lookup(key).cloned())
    }

    pub fn pending(&self) -> Vec<Record> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn head_version(&self) -> u64 {
        self.head.current()
    }

    /// Re-validate the current chain from genesis.
    pub fn validate(&self) -> Result<(), ChainValidationError> {
        validation::validate_with_rules(&self.snapshot().chain, &self.rules).map(|_| ())
    }

    // --- Mutations ---

    /// Queue a record for the next block.
    pub fn submit(&self, record: Record) {
        self.pending.lock().push_back(record);
    }

    /// Take the pending pool, mine a block around it, and append it.
    pub fn seal(&self) -> Result<SealOutcome, LedgerError> {
        let _seal = self.seal_lock.lock();

        let (records, snapshot, token) = {
            let state = self.state.read();
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(SealOutcome::NothingPending);
            }
            let records: Vec<Record> = pending.drain(..).collect();
            (records, Arc::clone(&state), self.head.token())
        };

        let Some(tip) = snapshot.tip() else {
            self.restore(records);
            return Err(ValidationError::EmptyChain.into());
        };
        let tip_hash = tip.hash();
        let mut block = Block::new(
            tip.index + 1,
            records,
            (self.clock)(),
            tip_hash,
            snapshot.index_hash(),
        );
        debug!(ledger = %self.name, index = block.index, records = block.records.len(), "mining");

        let mined = pow::mine_parallel(&block, self.rules.difficulty, self.mining_threads, &token);
        let nonce = match mined {
            Ok(nonce) => nonce,
            Err(MiningError::Cancelled) => {
                info!(ledger = %self.name, index = block.index, "mining cancelled by head change");
                self.restore(block.records);
                return Ok(SealOutcome::Cancelled);
            }
            Err(e) => {
                self.restore(block.records);
                return Err(e.into());
            }
        };
        block.nonce = nonce;

        self.commit_sealed(block, tip, &tip_hash, &snapshot, &token)
    }

    fn commit_sealed(
        &self,
        block: Block,
        tip: &Block,
        tip_hash: &Hash256,
        snapshot: &LedgerSnapshot,
        token: &HeadToken,
    ) -> Result<SealOutcome, LedgerError> {
        let _commit = self.commit_lock.lock();
        if self.head.current() != token.expected() {
            info!(ledger = %self.name, index = block.index, "head moved before commit");
            self.restore(block.records);
            return Ok(SealOutcome::Cancelled);
        }

        let checked = validation::check_successor(tip, tip_hash, &block)
            .and_then(|()| validation::check_proof(&block, self.rules.difficulty));
        let hash = match checked {
            Ok(hash) => hash,
            Err(e) => {
                self.restore(block.records);
                return Err(e.into());
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.append_block(&block) {
                self.restore(block.records);
                return Err(e.into());
            }
        }

        let index = self.next_index(snapshot, &block);
        let mut chain = Vec::with_capacity(snapshot.chain.len() + 1);
        chain.extend_from_slice(&snapshot.chain);
        chain.push(block.clone());
        self.publish(chain, index);

        info!(
            ledger = %self.name,
            index = block.index,
            hash = %hash,
            nonce = block.nonce,
            records = block.records.len(),
            "sealed block"
        );
        Ok(SealOutcome::Sealed(block))
    }

    /// Append a block mined elsewhere, if it extends the current tip.
    ///
    /// Beyond link, index, and proof, the block's `previous_index_hash` must
    /// match the local index snapshot.
    pub fn receive_block(&self, block: Block) -> Result<Hash256, LedgerError> {
        let _commit = self.commit_lock.lock();
        let snapshot = self.snapshot();

        let mut chain = Vec::with_capacity(snapshot.chain.len() + 1);
        chain.extend_from_slice(&snapshot.chain);
        let nonce = block.nonce;
        let hash = validation::accept(&mut chain, block, nonce, self.rules.difficulty)?;
        let Some(appended) = chain.last() else {
            return Err(ValidationError::EmptyChain.into());
        };

        let expected = snapshot.index_hash();
        if appended.previous_index_hash != expected {
            return Err(ValidationError::IndexInconsistency {
                index: appended.index,
                expected,
                got: appended.previous_index_hash,
            }
            .into());
        }

        if let Some(store) = &self.store {
            store.append_block(appended)?;
        }
        let index = self.next_index(&snapshot, appended);
        let height = appended.index;
        self.publish(chain, index);

        info!(ledger = %self.name, index = height, hash = %hash, "accepted peer block");
        Ok(hash)
    }

    /// Replace the chain with `candidate` if it is valid and strictly longer.
    pub fn adopt_chain(&self, candidate: Vec<Block>) -> Result<bool, LedgerError> {
        self.reconcile(vec![candidate])
    }

    /// Adopt the longest valid candidate strictly longer than the local chain.
    ///
    /// Validation and replay run outside the commit lock. If the head moved in
    /// the meantime, the winner is re-checked against the new head. The pending
    /// pool is left as is.
    pub fn reconcile(&self, candidates: Vec<Vec<Block>>) -> Result<bool, LedgerError> {
        let before = self.snapshot();
        let mut adoption = match reconcile::reconcile(&before.chain, candidates, &self.rules) {
            Reconciliation::Replaced(adoption) => adoption,
            Reconciliation::Kept => {
                debug!(ledger = %self.name, "local chain kept");
                return Ok(false);
            }
        };

        let _commit = self.commit_lock.lock();
        let current = self.snapshot();
        if current.version != before.version {
            warn!(ledger = %self.name, "head moved during reconciliation, re-checking");
            adoption = match reconcile::reconcile(&current.chain, [adoption.chain], &self.rules) {
                Reconciliation::Replaced(adoption) => adoption,
                Reconciliation::Kept => return Ok(false),
            };
        }

        if let Some(store) = &self.store {
            store.replace_chain(&adoption.chain)?;
        }
        let length = adoption.chain.len();
        self.publish(adoption.chain, adoption.index.map(Arc::new));

        info!(ledger = %self.name, from = current.chain.len(), to = length, "adopted longer chain");
        Ok(true)
    }

    fn next_index(&self, snapshot: &LedgerSnapshot, block: &Block) -> Option<Arc<SecondaryIndex>> {
        match (&snapshot.index, &self.rules.index) {
            (Some(index), Some(config)) => {
                Some(Arc::new(index.apply(&block.records, config.projection.as_ref())))
            }
            _ => None,
        }
    }

    /// Swap in a new head and cancel in-flight mining. Caller holds the commit lock.
    fn publish(&self, chain: Vec<Block>, index: Option<Arc<SecondaryIndex>>) {
        let mut state = self.state.write();
        let version = self.head.bump();
        *state = Arc::new(LedgerSnapshot {
            chain: Arc::new(chain),
            index,
            version,
        });
    }

    /// Put taken records back at the front of the pool, in their original order.
    fn restore(&self, records: Vec<Record>) {
        let mut pending = self.pending.lock();
        for record in records.into_iter().rev() {
            pending.push_front(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlet_core::store::MemoryStore;
    use chainlet_core::{IndexConfig, IndexEntry, IndexShape, StoreError};
    use serde_json::json;

    fn key_value(record: &Record) -> Vec<IndexEntry> {
        match (record.get_str("k"), record.get("v")) {
            (Some(k), Some(v)) => vec![IndexEntry::new(k, v.clone())],
            _ => vec![],
        }
    }

    fn rules(difficulty: u32) -> ChainRules {
        ChainRules::new(difficulty).with_index(IndexConfig::new(IndexShape::Multimap, key_value))
    }

    fn rec(k: &str, v: i64) -> Record {
        Record::new().with("k", k).with("v", v)
    }

    #[test]
    fn new_ledger_holds_mined_genesis() {
        let ledger = Ledger::in_memory("t", rules(2)).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.height(), 0);
        assert!(ledger.last_block().unwrap().hash().meets_difficulty(2));
        assert!(ledger.index().unwrap().is_empty());
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn seal_with_empty_pool_does_nothing() {
        let ledger = Ledger::in_memory("t", rules(1)).unwrap();
        assert_eq!(ledger.seal().unwrap(), SealOutcome::NothingPending);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.head_version(), 0);
    }

    #[test]
    fn seal_appends_block_and_updates_index() {
        let ledger = Ledger::in_memory("t", rules(2)).unwrap().with_clock(|| 1_800_000_000);
        let genesis_hash = ledger.last_block().unwrap().hash();
        let empty_hash = ledger.index().unwrap().snapshot_hash();

        ledger.submit(Record::new().with("a", 1));
        ledger.submit(rec("x", 7));
        let block = ledger.seal().unwrap().into_block().unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, genesis_hash);
        assert_eq!(block.previous_index_hash, empty_hash);
        assert_eq!(block.timestamp, 1_800_000_000);
        assert!(block.hash().to_hex().starts_with("00"));
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.lookup("x"), Some(IndexValue::Sequence(vec![json!(7)])));
        assert_eq!(ledger.head_version(), 1);
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn repeated_seals_produce_valid_chain() {
        let ledger = Ledger::in_memory("t", rules(1)).unwrap().with_mining_threads(2);
        for i in 0..5 {
            ledger.submit(rec("k", i));
            assert!(ledger.seal().unwrap().block().is_some());
        }
        assert_eq!(ledger.len(), 6);
        assert!(ledger.validate().is_ok());
        let values = (0..5).map(|i| json!(i)).collect();
        assert_eq!(ledger.lookup("k"), Some(IndexValue::Sequence(values)));
    }

    #[test]
    fn cancelled_seal_returns_records_in_order() {
        // Difficulty 64 never completes, so this seal only ends by cancellation.
        let base = Ledger::in_memory("slow", ChainRules::new(1)).unwrap();
        let slow = Arc::new(Ledger {
            rules: ChainRules::new(64),
            ..base
        });
        slow.submit(rec("a", 1));
        slow.submit(rec("b", 2));

        let worker = {
            let slow = Arc::clone(&slow);
            std::thread::spawn(move || slow.seal())
        };
        while !slow.pending().is_empty() {
            std::thread::yield_now();
        }
        // Submitted while mining: must stay behind the taken records.
        slow.submit(rec("c", 3));

        {
            let _commit = slow.commit_lock.lock();
            let chain = (*slow.chain()).clone();
            slow.publish(chain, None);
        }

        assert_eq!(worker.join().unwrap().unwrap(), SealOutcome::Cancelled);
        assert_eq!(slow.pending(), vec![rec("a", 1), rec("b", 2), rec("c", 3)]);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow.head_version(), 1);
    }

    #[test]
    fn receive_block_accepts_valid_successor() {
        let a = Ledger::in_memory("a", rules(1)).unwrap();
        let b = Ledger::in_memory("b", rules(1)).unwrap();
        a.submit(rec("x", 1));
        let block = a.seal().unwrap().into_block().unwrap();

        let hash = b.receive_block(block.clone()).unwrap();
        assert_eq!(hash, block.hash());
        assert_eq!(b.len(), 2);
        assert_eq!(b.lookup("x"), Some(IndexValue::Sequence(vec![json!(1)])));
    }

    #[test]
    fn receive_block_rejects_bad_blocks_without_side_effects() {
        let a = Ledger::in_memory("a", rules(1)).unwrap();
        let b = Ledger::in_memory("b", rules(1)).unwrap();
        a.submit(rec("x", 1));
        let block = a.seal().unwrap().into_block().unwrap();

        let mut wrong_link = block.clone();
        wrong_link.previous_hash = Hash256::digest(b"elsewhere");
        assert!(matches!(
            b.receive_block(wrong_link),
            Err(LedgerError::Validation(ValidationError::LinkMismatch { .. }))
        ));

        let mut wrong_index_hash = block.clone();
        wrong_index_hash.previous_index_hash = Hash256::digest(b"idx");
        assert!(matches!(
            b.receive_block(wrong_index_hash),
            Err(LedgerError::Validation(ValidationError::IndexInconsistency { .. }))
        ));

        assert_eq!(b.len(), 1);
        assert_eq!(b.head_version(), 0);
    }

    #[test]
    fn adopt_longer_chain_rebuilds_index_and_keeps_pending() {
        let local = Ledger::in_memory("local", rules(1)).unwrap();
        let peer = Ledger::in_memory("peer", rules(1)).unwrap();
        for i in 0..3 {
            peer.submit(rec("p", i));
            peer.seal().unwrap();
        }
        local.submit(rec("l", 0));
        local.seal().unwrap();
        local.submit(rec("unsealed", 9));

        assert!(local.adopt_chain((*peer.chain()).clone()).unwrap());
        assert_eq!(local.len(), 4);
        assert_eq!(local.lookup("l"), None);
        assert_eq!(
            local.lookup("p"),
            Some(IndexValue::Sequence(vec![json!(0), json!(1), json!(2)]))
        );
        assert_eq!(local.pending(), vec![rec("unsealed", 9)]);
        assert_eq!(local.index().unwrap().snapshot_hash(), peer.index().unwrap().snapshot_hash());
    }

    #[test]
    fn adopt_rejects_shorter_or_invalid_chain() {
        let local = Ledger::in_memory("local", rules(1)).unwrap();
        for i in 0..2 {
            local.submit(rec("l", i));
            local.seal().unwrap();
        }
        let before = local.snapshot();

        let peer = Ledger::in_memory("peer", rules(1)).unwrap();
        peer.submit(rec("p", 0));
        peer.seal().unwrap();
        assert!(!local.adopt_chain((*peer.chain()).clone()).unwrap());

        for i in 1..4 {
            peer.submit(rec("p", i));
            peer.seal().unwrap();
        }
        let mut tampered = (*peer.chain()).clone();
        tampered[2].records[0].insert("v", 100);
        assert!(!local.adopt_chain(tampered).unwrap());

        let after = local.snapshot();
        assert_eq!(after.chain, before.chain);
        assert_eq!(after.version, before.version);
    }

    #[test]
    fn opens_from_store_and_replays_index() {
        let store = Arc::new(MemoryStore::new());
        {
            let ledger = Ledger::open("s", rules(1), Some(store.clone())).unwrap();
            ledger.submit(rec("k", 1));
            ledger.seal().unwrap();
            ledger.submit(rec("k", 2));
            ledger.seal().unwrap();
        }
        assert_eq!(store.len(), 3);
        let reopened = Ledger::open("s", rules(1), Some(store)).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.lookup("k"), Some(IndexValue::Sequence(vec![json!(1), json!(2)])));
    }

    #[test]
    fn refuses_corrupt_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let ledger = Ledger::open("s", rules(1), Some(store.clone())).unwrap();
            for i in 0..2 {
                ledger.submit(rec("k", i));
                ledger.seal().unwrap();
            }
        }
        let mut chain = store.load_chain().unwrap().unwrap();
        chain[1].records[0].insert("v", 5);
        store.replace_chain(&chain).unwrap();
        let err = Ledger::open("s", rules(1), Some(store)).unwrap_err();
        assert!(matches!(err, LedgerError::CorruptChain(_)));
    }

    struct FailingStore;

    impl LedgerStore for FailingStore {
        fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError> {
            Ok(None)
        }
        fn append_block(&self, _: &Block) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }
        fn replace_chain(&self, _: &[Block]) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn failed_persist_leaves_state_and_returns_records() {
        let ledger = Ledger::open("f", rules(1), Some(Arc::new(FailingStore))).unwrap();
        ledger.submit(rec("k", 1));
        assert!(matches!(ledger.seal(), Err(LedgerError::Store(_))));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.pending(), vec![rec("k", 1)]);
        assert!(ledger.index().unwrap().is_empty());
    }
}
