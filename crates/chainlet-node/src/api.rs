//! HTTP API.
//!
//! Every ledger route is scoped by application name (`assets`, `transfers`,
//! `identities`). Errors are rendered as `{"error": "..."}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chainlet_core::error::RecordError;
use chainlet_core::{Block, LedgerError, MiningError, Record, SecondaryIndex};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::apps::{self, App};
use crate::node::{MineOutcome, Node, NodeError};
use crate::peers::{ChainResponse, RegisterRequest, RegisterResponse};

// --- Errors ---

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::BadGateway(m) => (StatusCode::BAD_GATEWAY, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        let message = e.to_string();
        match e {
            NodeError::Ledger(LedgerError::Record(RecordError::NotOwner { .. })) => {
                Self::Forbidden(message)
            }
            NodeError::Ledger(
                LedgerError::Validation(_) | LedgerError::Chain(_) | LedgerError::Record(_),
            ) => Self::BadRequest(message),
            NodeError::Ledger(LedgerError::Mining(MiningError::Cancelled)) => {
                Self::Conflict(message)
            }
            NodeError::Peer(_) => Self::BadGateway(message),
            NodeError::Ledger(_) | NodeError::Store(_) => Self::Internal(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_app(name: &str) -> ApiResult<App> {
    name.parse().map_err(|e: apps::UnknownApp| ApiError::NotFound(e.to_string()))
}

/// Ownership queries exist only for the asset ledger.
fn asset_index(node: &Node, app: &str) -> ApiResult<Arc<SecondaryIndex>> {
    if parse_app(app)? != App::Assets {
        return Err(ApiError::NotFound(format!("{app} has no ownership queries")));
    }
    node.ledger(App::Assets)
        .index()
        .ok_or_else(|| ApiError::Internal("asset index missing".into()))
}

// --- Router ---

pub fn router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/peers", get(list_peers))
        .route("/peers/register", post(register_peer))
        .route("/peers/register_with", post(register_with_peer))
        .route("/:app/owner/:token_id", get(asset_owner))
        .route("/:app/holdings/:owner", get(asset_holdings))
        .route("/:app/records", post(submit_record))
        .route("/:app/pending", get(pending))
        .route("/:app/mine", post(mine))
        .route("/:app/chain", get(chain))
        .route("/:app/blocks", post(receive_block))
        .route("/:app/index", get(index))
        .route("/:app/index/:key", get(index_entry))
        .route("/:app/validate", get(validate))
        .route("/:app/reconcile", post(reconcile))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(node)
}

// --- Node-wide ---

async fn health(State(node): State<Arc<Node>>) -> Json<Value> {
    let heights: BTreeMap<App, u64> = App::ALL
        .into_iter()
        .map(|app| (app, node.ledger(app).height()))
        .collect();
    Json(json!({
        "status": "ok",
        "heights": heights,
        "peers": node.peers().len(),
    }))
}

async fn list_peers(State(node): State<Arc<Node>>) -> Json<Vec<String>> {
    Json(node.peers().list())
}

fn peer_address(req: Result<Json<RegisterRequest>, JsonRejection>) -> ApiResult<String> {
    let Json(req) = req?;
    if req.node_address.trim().is_empty() {
        return Err(ApiError::BadRequest("node_address is required".into()));
    }
    Ok(req.node_address)
}

async fn register_peer(
    State(node): State<Arc<Node>>,
    req: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<RegisterResponse>> {
    let address = peer_address(req)?;
    Ok(Json(node.handle_register(&address)))
}

/// Register this node with a remote one and adopt its longer chains.
async fn register_with_peer(
    State(node): State<Arc<Node>>,
    req: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let address = peer_address(req)?;
    node.register_with(&address).await?;
    Ok(Json(json!({ "message": "registered", "peers": node.peers().list() })))
}

// --- Asset queries ---

async fn asset_owner(
    State(node): State<Arc<Node>>,
    Path((app, token_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let index = asset_index(&node, &app)?;
    let owner = apps::owner_of(&index, &token_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown token: {token_id}")))?;
    Ok(Json(json!({ "tokenId": token_id, "owner": owner })))
}

async fn asset_holdings(
    State(node): State<Arc<Node>>,
    Path((app, owner)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let index = asset_index(&node, &app)?;
    let tokens = apps::assets_of(&index, &owner);
    Ok(Json(json!({ "owner": owner, "tokens": tokens })))
}

// --- Per-application ---

async fn submit_record(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let app = parse_app(&app)?;
    let Json(body) = body?;
    let record = Record::try_from(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    node.submit(app, record)?;
    let pending = node.ledger(app).pending().len();
    Ok((StatusCode::CREATED, Json(json!({ "message": "record queued", "pending": pending }))))
}

async fn pending(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
) -> ApiResult<Json<Vec<Record>>> {
    let app = parse_app(&app)?;
    Ok(Json(node.ledger(app).pending()))
}

async fn mine(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let app = parse_app(&app)?;
    match node.mine(app).await? {
        MineOutcome::Mined(block) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "message": format!("block #{} is mined", block.index),
                "hash": block.hash(),
                "block": block,
            })),
        )),
        MineOutcome::Replaced => Ok((
            StatusCode::OK,
            Json(json!({ "message": "local chain was behind; adopted a longer peer chain" })),
        )),
        MineOutcome::NothingPending => {
            Err(ApiError::BadRequest("no pending records to mine".into()))
        }
        MineOutcome::Cancelled => Err(ApiError::Conflict(
            "chain head changed while mining; records returned to pending".into(),
        )),
    }
}

async fn chain(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
) -> ApiResult<Json<ChainResponse>> {
    let app = parse_app(&app)?;
    Ok(Json(node.chain_response(app)))
}

async fn receive_block(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
    block: Result<Json<Block>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let app = parse_app(&app)?;
    let Json(block) = block?;
    let index = block.index;
    let hash = node.receive_block(app, block)?;
    Ok((StatusCode::CREATED, Json(json!({ "index": index, "hash": hash }))))
}

async fn index(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
) -> ApiResult<Json<Value>> {
    let app = parse_app(&app)?;
    let index = node
        .ledger(app)
        .index()
        .ok_or_else(|| ApiError::NotFound(format!("{app} has no index")))?;
    Ok(Json(json!({
        "shape": index.shape(),
        "snapshot_hash": index.snapshot_hash(),
        "entries": index.snapshot(),
    })))
}

async fn index_entry(
    State(node): State<Arc<Node>>,
    Path((app, key)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let app = parse_app(&app)?;
    let value = node
        .ledger(app)
        .lookup(&key)
        .ok_or_else(|| ApiError::NotFound(format!("no entry for key: {key}")))?;
    Ok(Json(json!({ "key": key, "value": value })))
}

async fn validate(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
) -> ApiResult<Json<Value>> {
    let app = parse_app(&app)?;
    let ledger = node.ledger(app);
    let body = match ledger.validate() {
        Ok(()) => json!({ "valid": true, "length": ledger.len() }),
        Err(e) => json!({ "valid": false, "position": e.position, "error": e.to_string() }),
    };
    Ok(Json(body))
}

async fn reconcile(
    State(node): State<Arc<Node>>,
    Path(app): Path<String>,
) -> ApiResult<Json<Value>> {
    let app = parse_app(&app)?;
    let replaced = node.reconcile(app).await?;
    Ok(Json(json!({ "replaced": replaced, "length": node.ledger(app).len() })))
}
