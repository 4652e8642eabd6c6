//! End-to-end tests over real HTTP.
//!
//! Each node serves its API on an ephemeral local port and talks to peers
//! through the production `HttpPeerClient`.

use std::time::Duration;

use chainlet_node_lib::apps::App;
use chainlet_node_lib::node::Node;
use chainlet_node_lib::storage::RocksStore;
use chainlet_tests::helpers::*;
use serde_json::{Value, json};

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

async fn post(url: &str, body: Value) -> (u16, Value) {
    let resp = client().post(url).json(&body).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

async fn get(url: &str) -> (u16, Value) {
    let resp = client().get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_node_round_trip() {
    let (_node, url, server) = spawn_http_node().await;

    let (status, _) = post(
        &format!("{url}/identities/records"),
        json!({"public_key": "pk-ada", "name": "Ada", "description": "analyst"}),
    )
    .await;
    assert_eq!(status, 201);

    let (status, mined) = post(&format!("{url}/identities/mine"), json!({})).await;
    assert_eq!(status, 201);
    let hash = mined["hash"].as_str().unwrap();
    assert!(hash.starts_with('0'));

    let (_, chain) = get(&format!("{url}/identities/chain")).await;
    assert_eq!(chain["length"], 2);
    assert_eq!(chain["chain"][1]["records"][0]["name"], "Ada");

    let (status, entry) = get(&format!("{url}/identities/index/pk-ada")).await;
    assert_eq!(status, 200);
    assert_eq!(entry["value"], json!({"name": "Ada", "description": "analyst"}));

    let (status, _) = get(&format!("{url}/identities/index/pk-nobody")).await;
    assert_eq!(status, 404);

    let (_, valid) = get(&format!("{url}/identities/validate")).await;
    assert_eq!(valid["valid"], true);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_nodes_register_mine_and_sync() {
    let (a, a_url, a_server) = spawn_http_node().await;
    let (b, b_url, b_server) = spawn_http_node().await;

    // A has history before B joins.
    seal_blocks(&a, App::Assets, 2, "early");

    b.register_with(&a_url).await.unwrap();
    assert_eq!(b.peers().list(), vec![a_url.clone()]);
    assert_eq!(a.peers().list(), vec![b_url.clone()]);
    assert_eq!(*b.ledger(App::Assets).chain(), *a.ledger(App::Assets).chain());

    // A mines through the API; B hears the announcement.
    let (status, _) = post(
        &format!("{a_url}/assets/records"),
        json!({"from": "0", "to": "carol", "tokenId": "nft-1"}),
    )
    .await;
    assert_eq!(status, 201);
    let (status, _) = post(&format!("{a_url}/assets/mine"), json!({})).await;
    assert_eq!(status, 201);

    assert_eq!(b.ledger(App::Assets).len(), 4);
    let (_, owner) = get(&format!("{b_url}/assets/owner/nft-1")).await;
    assert_eq!(owner["owner"], "carol");

    a_server.abort();
    b_server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_with_endpoint_joins_running_node() {
    let (a, a_url, a_server) = spawn_http_node().await;
    let (b, b_url, b_server) = spawn_http_node().await;
    seal_blocks(&a, App::Identities, 2, "hub");

    let (status, body) = post(
        &format!("{b_url}/peers/register_with"),
        json!({"node_address": a_url}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["peers"], json!([a_url]));
    assert_eq!(a.peers().list(), vec![b_url.clone()]);
    assert_eq!(*b.ledger(App::Identities).chain(), *a.ledger(App::Identities).chain());

    a_server.abort();
    b_server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconcile_endpoint_pulls_longer_chain() {
    let (a, a_url, a_server) = spawn_http_node().await;
    let (b, b_url, b_server) = spawn_http_node().await;
    seal_blocks(&a, App::Transfers, 3, "ahead");
    b.peers().register(&a_url);

    let (status, body) = post(&format!("{b_url}/transfers/reconcile"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["replaced"], true);
    assert_eq!(body["length"], 4);

    let (_, body) = post(&format!("{b_url}/transfers/reconcile"), json!({})).await;
    assert_eq!(body["replaced"], false);

    a_server.abort();
    b_server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_peer_does_not_block_mining() {
    let (node, url, server) = spawn_http_node().await;
    node.peers().register("http://127.0.0.1:1");

    let (status, _) = post(
        &format!("{url}/transfers/records"),
        json!({"from": "a", "to": "b", "value": 3, "description": "lunch"}),
    )
    .await;
    assert_eq!(status, 201);
    let (status, _) = post(&format!("{url}/transfers/mine"), json!({})).await;
    assert_eq!(status, 201);
    assert_eq!(node.ledger(App::Transfers).len(), 2);

    server.abort();
}

#[test]
fn persistent_node_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = chainlet_node_lib::NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ephemeral: false,
        ..test_config("http://persistent")
    };

    let tip = {
        let node = Node::open(config.clone()).unwrap();
        seal_blocks(&node, App::Assets, 3, "durable");
        node.ledger(App::Assets).last_block().unwrap()
    };

    let node = Node::open(config.clone()).unwrap();
    let ledger = node.ledger(App::Assets);
    assert_eq!(ledger.len(), 4);
    assert_eq!(ledger.last_block(), Some(tip));
    assert!(ledger.validate().is_ok());
    drop(ledger);
    drop(node);

    // Each application has its own database.
    let store = RocksStore::open(config.db_path("assets")).unwrap();
    assert_eq!(store.len().unwrap(), 4);
}
