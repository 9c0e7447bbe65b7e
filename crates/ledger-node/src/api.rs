//! HTTP surface of the node.
//!
//! - `GET /health`, `GET /healthz`
//! - `GET /chain` full chain, genesis included
//! - `GET /chain/head` last index and hash
//! - `GET /chain/tail?n=10` poll window, most recent first, genesis excluded
//! - `GET /chain/verify` full audit
//! - `POST /classifications` append a classification

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{
    Block, ChainStore, Classification, LedgerError, PollError, PollGateway, VerificationStatus,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::constants::REQUEST_ID_BYTES;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<ChainStore>,
    pub(crate) gateway: PollGateway,
    /// Window size used when the poller does not pass `n`.
    pub(crate) tail_size: usize,
    /// Cancelled on shutdown so in-flight polls return promptly.
    pub(crate) shutdown: CancellationToken,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain", get(full_chain))
        .route("/chain/head", get(head))
        .route("/chain/tail", get(tail))
        .route("/chain/verify", get(verify))
        .route("/classifications", post(submit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    height: u64,
    hash: String,
}

#[derive(Deserialize)]
struct TailParams {
    n: Option<i64>,
}

#[derive(Serialize)]
struct Audit {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    at: Option<u64>,
}

/// Body of `POST /classifications`. Only the classification output is
/// required; the node fills in a request id when the producer has none.
#[derive(Deserialize)]
struct ClassificationIn {
    request_id: Option<String>,
    plastic_type: String,
    confidence: f64,
    image_hash: String,
    verification_status: Option<VerificationStatus>,
}

impl ClassificationIn {
    fn into_classification(self) -> Classification {
        Classification {
            request_id: self.request_id.unwrap_or_else(new_request_id),
            plastic_type: self.plastic_type,
            confidence: self.confidence,
            image_hash: self.image_hash,
            verification_status: self.verification_status.unwrap_or_default(),
        }
    }
}

fn new_request_id() -> String {
    let bytes: [u8; REQUEST_ID_BYTES] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    at: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
    at: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl ToString) -> Self {
        Self {
            status,
            message: message.to_string(),
            at: None,
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            at: self.at,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AppendRejected { .. } => Self::new(StatusCode::UNPROCESSABLE_ENTITY, err),
            LedgerError::ChainCorrupted { at } => Self {
                at: Some(at),
                ..Self::new(StatusCode::CONFLICT, err)
            },
            LedgerError::AlreadyInitialized => Self::new(StatusCode::CONFLICT, err),
            LedgerError::QueryUnavailable { .. } => Self::new(StatusCode::SERVICE_UNAVAILABLE, err),
            LedgerError::Storage(_) => Self::internal(err),
        }
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Corrupted { at } => Self {
                at: Some(at),
                ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, &err)
            },
            _ => Self::new(StatusCode::SERVICE_UNAVAILABLE, err),
        }
    }
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn full_chain(State(state): State<AppState>) -> Json<Vec<Arc<Block>>> {
    Json(state.store.snapshot().blocks())
}

async fn head(State(state): State<AppState>) -> Result<Json<Head>, ApiError> {
    let (height, hash) = state
        .store
        .tip()
        .ok_or_else(|| LedgerError::unavailable("chain store is not initialized"))?;
    Ok(Json(Head {
        height,
        hash: hex::encode(hash),
    }))
}

/// Negative `n` asks for nothing and gets an empty window.
async fn tail(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> Result<Json<Vec<Arc<Block>>>, ApiError> {
    let n = params
        .n
        .map_or(state.tail_size, |n| usize::try_from(n).unwrap_or(0));
    let window = state.gateway.poll(n, &state.shutdown).await?;
    Ok(Json(window))
}

async fn verify(State(state): State<AppState>) -> Result<(StatusCode, Json<Audit>), ApiError> {
    let store = state.store.clone();
    let audit = tokio::task::spawn_blocking(move || store.audit())
        .await
        .map_err(ApiError::internal)?;
    match audit {
        Ok(height) => Ok((
            StatusCode::OK,
            Json(Audit {
                valid: true,
                height: Some(height),
                at: None,
            }),
        )),
        Err(LedgerError::ChainCorrupted { at }) => Ok((
            StatusCode::CONFLICT,
            Json(Audit {
                valid: false,
                height: None,
                at: Some(at),
            }),
        )),
        Err(e) => Err(e.into()),
    }
}

async fn submit(
    State(state): State<AppState>,
    Json(body): Json<ClassificationIn>,
) -> Result<(StatusCode, Json<Arc<Block>>), ApiError> {
    let classification = body.into_classification();
    let store = state.store.clone();
    // sled flushes on every append
    let block = tokio::task::spawn_blocking(move || store.append(classification))
        .await
        .map_err(ApiError::internal)??;
    Ok((StatusCode::CREATED, Json(block)))
}
