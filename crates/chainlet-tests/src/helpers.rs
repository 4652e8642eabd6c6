//! Shared helpers for integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chainlet_core::{Block, Record};
use chainlet_node_lib::apps::App;
use chainlet_node_lib::config::NodeConfig;
use chainlet_node_lib::ledger::Ledger;
use chainlet_node_lib::node::Node;
use chainlet_node_lib::peers::{ChainResponse, PeerClient, PeerError, RegisterResponse};
use parking_lot::RwLock;

/// Difficulty used throughout the suite; keeps mining to a handful of hashes.
pub const TEST_DIFFICULTY: u32 = 1;

/// In-memory node configuration reachable at `url`.
pub fn test_config(url: &str) -> NodeConfig {
    NodeConfig {
        ephemeral: true,
        difficulty: TEST_DIFFICULTY,
        public_url: Some(url.to_string()),
        ..NodeConfig::default()
    }
}

pub fn asset(token: &str, to: &str) -> Record {
    Record::new().with("from", "0").with("to", to).with("tokenId", token)
}

pub fn transfer(from: &str, to: &str, value: i64) -> Record {
    Record::new()
        .with("from", from)
        .with("to", to)
        .with("value", value)
        .with("description", format!("{from} pays {to}"))
}

/// A valid `app` chain of `len` blocks (genesis included), one record per
/// block, tagged so different tags give different chains.
pub fn build_chain(app: App, len: usize, tag: &str) -> Vec<Block> {
    let ledger = Ledger::in_memory(tag, app.rules(TEST_DIFFICULTY)).unwrap();
    for i in 1..len {
        ledger.submit(asset(&format!("{tag}-{i}"), tag));
        ledger.seal().unwrap();
    }
    (*ledger.chain()).clone()
}

/// Seal `count` blocks on `node`'s `app` ledger, one record each, without
/// talking to peers.
pub fn seal_blocks(node: &Node, app: App, count: usize, tag: &str) {
    let ledger = node.ledger(app);
    for i in 0..count {
        ledger.submit(asset(&format!("{tag}-{i}"), tag));
        assert!(ledger.seal().unwrap().block().is_some());
    }
}

/// In-process peer transport: every node registered here is reachable by its URL.
#[derive(Default)]
pub struct Network {
    nodes: RwLock<HashMap<String, Arc<Node>>>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a node reachable at `url` that talks to peers through this network.
    pub fn spawn(self: &Arc<Self>, url: &str) -> Arc<Node> {
        let client: Arc<dyn PeerClient> = self.clone();
        let node = Node::with_client(test_config(url), client).unwrap();
        self.nodes.write().insert(url.to_string(), Arc::clone(&node));
        node
    }

    /// Take a node off the network; calls to it fail as unreachable.
    pub fn disconnect(&self, url: &str) {
        self.nodes.write().remove(url);
    }

    fn get(&self, peer: &str) -> Result<Arc<Node>, PeerError> {
        self.nodes.read().get(peer).cloned().ok_or_else(|| PeerError::Transport {
            peer: peer.to_string(),
            message: "unreachable".into(),
        })
    }
}

#[async_trait]
impl PeerClient for Network {
    async fn fetch_chain(&self, peer: &str, app: App) -> Result<ChainResponse, PeerError> {
        Ok(self.get(peer)?.chain_response(app))
    }

    async fn announce_block(&self, peer: &str, app: App, block: &Block) -> Result<(), PeerError> {
        self.get(peer)?
            .receive_block(app, block.clone())
            .map(|_| ())
            .map_err(|e| PeerError::Decode {
                peer: peer.to_string(),
                message: e.to_string(),
            })
    }

    async fn register_with(&self, peer: &str, own: &str) -> Result<RegisterResponse, PeerError> {
        Ok(self.get(peer)?.handle_register(own))
    }
}

/// Serve `node`'s HTTP API on an already bound listener.
pub fn serve(node: Arc<Node>, listener: tokio::net::TcpListener) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _ = axum::serve(listener, chainlet_node_lib::router(node)).await;
    })
}

/// A node with an HTTP peer client, serving on an ephemeral local port.
pub async fn spawn_http_node() -> (Arc<Node>, String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let node = Node::open(test_config(&url)).unwrap();
    let handle = serve(Arc::clone(&node), listener);
    (node, url, handle)
}
