use crate::api::error::ApiError;
use crate::api::response::TransactionResponse;
use crate::db;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::debug;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/transactions/:tx_hash", get(get_transaction_fee))
        .with_state(app_state)
}

async fn health() -> &'static str {
    "Service is healthy"
}

/// GET /api/v1/transactions/{txHash}: the stored record, or 404. A FAILED
/// record is returned as-is with empty fee fields.
async fn get_transaction_fee(
    State(state): State<Arc<AppState>>,
    Path(tx_hash): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    debug!("Looking up transaction {}", tx_hash);

    let tx = db::transaction::get_transaction(&state.db_pool, &tx_hash)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(TransactionResponse::from(tx)))
}
