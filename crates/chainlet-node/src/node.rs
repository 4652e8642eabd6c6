//! Node composition.
//!
//! The [`Node`] owns one [`Ledger`] per [`App`], the peer registry, and a
//! [`PeerClient`]. Peer failures never fail a node operation; they are logged
//! and the peer is skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use chainlet_core::error::RecordError;
use chainlet_core::store::LedgerStore;
use chainlet_core::{Block, Hash256, LedgerError, Record, StoreError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::apps::App;
use crate::config::NodeConfig;
use crate::ledger::{Ledger, SealOutcome};
use crate::peers::{ChainResponse, HttpPeerClient, PeerClient, PeerError, PeerSet, RegisterResponse};
use crate::storage::RocksStore;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Peer(#[from] PeerError),
}

impl From<RecordError> for NodeError {
    fn from(e: RecordError) -> Self {
        Self::Ledger(LedgerError::Record(e))
    }
}

/// Result of [`Node::mine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    /// Sealed locally, survived reconciliation, and was announced.
    Mined(Block),
    /// Sealed locally, then replaced by a longer peer chain.
    Replaced,
    NothingPending,
    /// The head moved while mining; the records are pending again.
    Cancelled,
}

pub struct Node {
    config: NodeConfig,
    ledgers: BTreeMap<App, Arc<Ledger>>,
    peers: PeerSet,
    client: Arc<dyn PeerClient>,
}

impl Node {
    /// Open every application ledger and build an HTTP peer client.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let client = HttpPeerClient::new(config.peer_timeout())?;
        Self::with_client(config, Arc::new(client))
    }

    /// Like [`Node::open`] with a caller-supplied peer client.
    pub fn with_client(
        config: NodeConfig,
        client: Arc<dyn PeerClient>,
    ) -> Result<Arc<Self>, NodeError> {
        let mut ledgers = BTreeMap::new();
        for app in App::ALL {
            let store: Option<Arc<dyn LedgerStore>> = if config.ephemeral {
                None
            } else {
                Some(Arc::new(RocksStore::open(config.db_path(app.as_str()))?))
            };
            let ledger = Ledger::open(app.as_str(), app.rules(config.difficulty), store)?
                .with_mining_threads(config.mining_threads);
            ledgers.insert(app, Arc::new(ledger));
        }

        let peers = PeerSet::new();
        peers.merge(config.bootstrap_peers.iter().map(String::as_str), &config.public_url());

        info!(
            difficulty = config.difficulty,
            ephemeral = config.ephemeral,
            peers = peers.len(),
            "node opened"
        );
        Ok(Arc::new(Self {
            config,
            ledgers,
            peers,
            client,
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn ledger(&self, app: App) -> Arc<Ledger> {
        // Every App has a ledger from construction onwards.
        Arc::clone(&self.ledgers[&app])
    }

    /// Check the record against the application's admission rules and the
    /// committed index, then queue it.
    pub fn submit(&self, app: App, record: Record) -> Result<(), NodeError> {
        let ledger = self.ledger(app);
        let index = ledger.index();
        app.check_record(&record, index.as_deref())?;
        ledger.submit(record);
        Ok(())
    }

    /// Accept a block announced by a peer.
    pub fn receive_block(&self, app: App, block: Block) -> Result<Hash256, NodeError> {
        Ok(self.ledger(app).receive_block(block)?)
    }

    pub fn chain_response(&self, app: App) -> ChainResponse {
        let chain = self.ledger(app).chain();
        ChainResponse {
            length: chain.len(),
            chain: (*chain).clone(),
            peers: self.peers.list(),
        }
    }

    /// Register `address` as a peer and hand back our chains and peer list.
    pub fn handle_register(&self, address: &str) -> RegisterResponse {
        if self.peers.register(address) {
            info!(peer = %address, "registered peer");
        }
        let chains = self
            .ledgers
            .iter()
            .map(|(app, ledger)| (*app, (*ledger.chain()).clone()))
            .collect();
        RegisterResponse {
            chains,
            peers: self.peers.list(),
        }
    }

    /// Seal pending records, reconcile with peers, and announce the block if
    /// it is still our tip afterwards.
    pub async fn mine(&self, app: App) -> Result<MineOutcome, NodeError> {
        let ledger = self.ledger(app);
        let outcome = tokio::task::spawn_blocking(move || ledger.seal())
            .await
            .map_err(|e| LedgerError::Worker(e.to_string()))??;

        let block = match outcome {
            SealOutcome::Sealed(block) => block,
            SealOutcome::NothingPending => return Ok(MineOutcome::NothingPending),
            SealOutcome::Cancelled => return Ok(MineOutcome::Cancelled),
        };

        self.reconcile(app).await?;
        let still_tip = self
            .ledger(app)
            .last_block()
            .is_some_and(|tip| tip == block);
        if !still_tip {
            info!(%app, index = block.index, "mined block superseded by peer chain");
            return Ok(MineOutcome::Replaced);
        }

        self.announce(app, &block).await;
        Ok(MineOutcome::Mined(block))
    }

    /// Fetch chains from every peer and adopt the longest valid one if it is
    /// strictly longer than ours.
    pub async fn reconcile(&self, app: App) -> Result<bool, NodeError> {
        let peers = self.peers.list();
        if peers.is_empty() {
            return Ok(false);
        }

        let mut tasks = JoinSet::new();
        for (order, peer) in peers.into_iter().enumerate() {
            let client = Arc::clone(&self.client);
            tasks.spawn(async move {
                let result = client.fetch_chain(&peer, app).await;
                (order, peer, result)
            });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((order, _, Ok(resp))) => fetched.push((order, resp.chain)),
                Ok((_, peer, Err(e))) => warn!(%peer, %app, error = %e, "skipping peer"),
                Err(e) => warn!(%app, error = %e, "peer fetch task failed"),
            }
        }
        // Tie-break by peer registration order, not by response arrival.
        fetched.sort_by_key(|(order, _)| *order);
        let candidates: Vec<Vec<Block>> = fetched.into_iter().map(|(_, chain)| chain).collect();
        debug!(%app, candidates = candidates.len(), "reconciling");

        let ledger = self.ledger(app);
        let replaced = tokio::task::spawn_blocking(move || ledger.reconcile(candidates))
            .await
            .map_err(|e| LedgerError::Worker(e.to_string()))??;
        Ok(replaced)
    }

    /// Reconcile every application ledger.
    pub async fn reconcile_all(&self) -> Result<(), NodeError> {
        for app in App::ALL {
            self.reconcile(app).await?;
        }
        Ok(())
    }

    /// Post `block` to every peer. Failures are logged.
    pub async fn announce(&self, app: App, block: &Block) {
        let mut tasks = JoinSet::new();
        for peer in self.peers.list() {
            let client = Arc::clone(&self.client);
            let block = block.clone();
            tasks.spawn(async move {
                if let Err(e) = client.announce_block(&peer, app, &block).await {
                    warn!(%peer, %app, index = block.index, error = %e, "announce failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Register with a remote node, merge its peers, and adopt any of its
    /// chains that beat ours.
    pub async fn register_with(&self, peer: &str) -> Result<(), NodeError> {
        let own = self.config.public_url();
        let resp = self.client.register_with(peer, &own).await?;
        self.peers.register(peer);
        let added = self.peers.merge(resp.peers.iter().map(String::as_str), &own);
        info!(%peer, new_peers = added, "registered with peer");

        for (app, chain) in resp.chains {
            let ledger = self.ledger(app);
            let adopted = tokio::task::spawn_blocking(move || ledger.reconcile(vec![chain]))
                .await
                .map_err(|e| LedgerError::Worker(e.to_string()))??;
            if adopted {
                info!(%peer, %app, "adopted chain from registrar");
            }
        }
        Ok(())
    }

    /// Register with every bootstrap peer. Failures are logged.
    pub async fn bootstrap(&self) {
        for peer in self.config.bootstrap_peers.clone() {
            if let Err(e) = self.register_with(&peer).await {
                warn!(%peer, error = %e, "bootstrap registration failed");
            }
        }
    }
}
