//! The relayer's HTTP surface: message result queries, bundle status, and
//! prometheus metrics.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use primitive_types::H256;
use serde::Serialize;
use tracing::{info, info_span, instrument::Instrumented, Instrument};

use courier_base::CoreMetrics;
use courier_core::{ChainId, ExecutionStatus, FeeAccount, FeeError, SettlementRecord};

use crate::fees::FeeLedger;
use crate::store::MessageStore;

#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) store: Arc<MessageStore>,
    pub(crate) fees: Arc<FeeLedger>,
    pub(crate) metrics: Arc<CoreMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleSummary {
    id: H256,
    origin: ChainId,
    destination: ChainId,
    state: String,
    message_count: usize,
    commitment: H256,
}

fn parse_h256(raw: &str) -> Option<H256> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).ok()?;
    (bytes.len() == 32).then(|| H256::from_slice(&bytes))
}

/// `GET /result/:origin/:sequence`
///
/// Total: unknown or unexecuted messages report `NotYetExecuted`.
async fn get_result(
    State(state): State<Arc<ServerState>>,
    Path((origin, sequence)): Path<(ChainId, u64)>,
) -> Result<Json<ExecutionStatus>, StatusCode> {
    let id = courier_core::MessageId { origin, sequence };
    state
        .store
        .get_result(id)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// `GET /bundle/:id`
async fn get_bundle(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<Json<BundleSummary>, StatusCode> {
    let id = parse_h256(&raw).ok_or(StatusCode::BAD_REQUEST)?;
    let bundle = state
        .store
        .bundle(id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(BundleSummary {
        id: bundle.id,
        origin: bundle.origin,
        destination: bundle.destination,
        state: bundle.state.to_string(),
        message_count: bundle.message_ids.len(),
        commitment: bundle.commitment,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeeSummary {
    account: FeeAccount,
    unsettled_pool: u128,
}

/// `GET /fees/:chain`
async fn get_fees(
    State(state): State<Arc<ServerState>>,
    Path(chain): Path<ChainId>,
) -> Result<Json<FeeSummary>, StatusCode> {
    let account = state
        .fees
        .account(chain)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let unsettled_pool = state
        .fees
        .pool_total(chain)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(FeeSummary {
        account,
        unsettled_pool,
    }))
}

/// `POST /settle/:chain`
///
/// Operator-triggered settlement of a chain's fee pool.
async fn settle_fees(
    State(state): State<Arc<ServerState>>,
    Path(chain): Path<ChainId>,
) -> Result<Json<SettlementRecord>, StatusCode> {
    match state.fees.settle(chain) {
        Ok(record) => Ok(Json(record)),
        Err(FeeError::InsufficientPool { .. }) => Err(StatusCode::CONFLICT),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `GET /metrics`
async fn get_metrics(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.metrics.gather() {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub(crate) fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/result/:origin/:sequence", get(get_result))
        .route("/bundle/:id", get(get_bundle))
        .route("/fees/:chain", get(get_fees))
        .route("/settle/:chain", post(settle_fees))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

pub(crate) fn spawn(
    state: Arc<ServerState>,
    port: u16,
) -> Instrumented<tokio::task::JoinHandle<color_eyre::Result<()>>> {
    let span = info_span!("QueryServer");
    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        info!(%addr, "starting query server");
        axum::Server::bind(&addr)
            .serve(router(state).into_make_service())
            .await?;
        Ok(())
    })
    .instrument(span)
}
