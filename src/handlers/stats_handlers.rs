//! Node-wide totals, served through the injected TTL cache.

use crate::{errors::AppError, state::AppState};
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Serialize)]
pub struct StatsResponse {
    pub total_content_count: i64,
    pub total_size: i64,
    pub total_owner_count: i64,
}

/// `GET /api/v1/stats`
pub async fn node_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let totals = state.stats.totals(&state.meta).await?;
    Ok(Json(StatsResponse {
        total_content_count: totals.content_count,
        total_size: totals.total_size,
        total_owner_count: totals.owner_count,
    }))
}
