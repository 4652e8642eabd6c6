//! Peer registry and the HTTP client used to talk to other nodes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chainlet_core::Block;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::apps::App;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("request to {peer} failed: {message}")]
    Transport { peer: String, message: String },
    #[error("{peer} answered {status}")]
    Status { peer: String, status: u16 },
    #[error("invalid response from {peer}: {message}")]
    Decode { peer: String, message: String },
    #[error("client: {0}")]
    Client(String),
}

/// Body of `GET /{app}/chain`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChainResponse {
    pub length: usize,
    pub chain: Vec<Block>,
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Body of `POST /peers/register`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub node_address: String,
}

/// Reply to `POST /peers/register`: the registrar's chains and peer list.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterResponse {
    pub chains: BTreeMap<App, Vec<Block>>,
    pub peers: Vec<String>,
}

/// Known peer base URLs, in registration order.
///
/// Order matters: reconciliation breaks ties between equally long candidates
/// in favour of the peer asked first.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: RwLock<Vec<String>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Returns `false` if it was already known or is blank.
    pub fn register(&self, address: &str) -> bool {
        let address = normalize(address);
        if address.is_empty() {
            return false;
        }
        let mut peers = self.peers.write();
        if peers.iter().any(|p| *p == address) {
            return false;
        }
        peers.push(address);
        true
    }

    /// Register every address except `own`. Returns how many were new.
    pub fn merge<'a>(&self, addresses: impl IntoIterator<Item = &'a str>, own: &str) -> usize {
        let own = normalize(own);
        addresses
            .into_iter()
            .filter(|a| normalize(a) != own)
            .filter(|a| self.register(a))
            .count()
    }

    pub fn list(&self) -> Vec<String> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

fn normalize(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}

/// Outbound calls to another node.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn fetch_chain(&self, peer: &str, app: App) -> Result<ChainResponse, PeerError>;

    async fn announce_block(&self, peer: &str, app: App, block: &Block) -> Result<(), PeerError>;

    async fn register_with(&self, peer: &str, own_address: &str)
    -> Result<RegisterResponse, PeerError>;
}

/// [`PeerClient`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(peer: &str, path: &str) -> String {
        format!("{}{path}", peer.trim_end_matches('/'))
    }
}

fn transport(peer: &str, e: reqwest::Error) -> PeerError {
    PeerError::Transport {
        peer: peer.to_string(),
        message: e.to_string(),
    }
}

fn check_status(peer: &str, resp: reqwest::Response) -> Result<reqwest::Response, PeerError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(PeerError::Status {
            peer: peer.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str, app: App) -> Result<ChainResponse, PeerError> {
        let resp = self
            .client
            .get(Self::url(peer, &format!("/{app}/chain")))
            .send()
            .await
            .map_err(|e| transport(peer, e))?;
        check_status(peer, resp)?
            .json()
            .await
            .map_err(|e| PeerError::Decode {
                peer: peer.to_string(),
                message: e.to_string(),
            })
    }

    async fn announce_block(&self, peer: &str, app: App, block: &Block) -> Result<(), PeerError> {
        let resp = self
            .client
            .post(Self::url(peer, &format!("/{app}/blocks")))
            .json(block)
            .send()
            .await
            .map_err(|e| transport(peer, e))?;
        check_status(peer, resp)?;
        Ok(())
    }

    async fn register_with(
        &self,
        peer: &str,
        own_address: &str,
    ) -> Result<RegisterResponse, PeerError> {
        let body = RegisterRequest {
            node_address: own_address.to_string(),
        };
        let resp = self
            .client
            .post(Self::url(peer, "/peers/register"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(peer, e))?;
        check_status(peer, resp)?
            .json()
            .await
            .map_err(|e| PeerError::Decode {
                peer: peer.to_string(),
                message: e.to_string(),
            })
    }
}
