//! Transaction history handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    dtos::{HistoryQuery, TransactionListResponse, TransactionResponse},
    error::AppError,
    AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// A user's charge attempts, newest first.
pub async fn list_user_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<TransactionListResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let (transactions, total_count) = state
        .store
        .list_transactions_by_user(user_id, limit, offset)
        .await?;

    Ok(Json(TransactionListResponse {
        transactions: transactions.into_iter().map(TransactionResponse::from).collect(),
        total_count,
        limit,
        offset,
    }))
}
