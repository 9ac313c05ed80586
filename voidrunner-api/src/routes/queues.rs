/// Operator queue endpoints
///
/// # Endpoints
///
/// - `GET /api/v1/queues/stats` - Depth / in-flight / delayed / DLQ counts
/// - `GET /api/v1/queues/dead` - Recent dead letters with reason groups
/// - `POST /api/v1/queues/dead/:message_id/requeue` - Requeue a dead letter
/// - `DELETE /api/v1/queues/dead` - Purge dead letters past the retention age
///
/// These are operational endpoints; they expose queue message metadata,
/// not task bodies, and still require an authenticated caller.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use voidrunner_core::auth::middleware::AuthContext;
use voidrunner_core::queue::dead_letter::DeadLetter;

use crate::{app::AppState, error::ApiResult};

/// Queue statistics response
#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    pub approx_depth: u64,
    pub in_flight: u64,
    pub delayed: u64,
    pub dead: u64,
    pub oldest_age_seconds: Option<u64>,
}

/// Dead letter listing with reason histogram
#[derive(Debug, Serialize)]
pub struct DeadLettersResponse {
    pub entries: Vec<DeadLetter>,
    pub by_reason: HashMap<String, u64>,
}

/// Purge outcome
#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: u64,
}

/// Current queue depths
pub async fn queue_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> ApiResult<Json<QueueStatsResponse>> {
    let stats = state.queue.stats().await?;

    Ok(Json(QueueStatsResponse {
        approx_depth: stats.approx_depth,
        in_flight: stats.in_flight,
        delayed: stats.delayed,
        dead: stats.dead,
        oldest_age_seconds: stats.oldest_age.map(|d| d.as_secs()),
    }))
}

/// Recent dead letters grouped by failure reason
pub async fn list_dead_letters(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> ApiResult<Json<DeadLettersResponse>> {
    let entries = state.queue.list_dead(100).await?;
    let by_reason = state.queue.dead_letter_stats().await?;

    Ok(Json(DeadLettersResponse { entries, by_reason }))
}

/// Moves a dead letter back to the task queue with attempts reset
pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(message_id): Path<String>,
) -> ApiResult<axum::http::StatusCode> {
    state.queue.requeue_dead(&message_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Purges dead letters older than the configured retention age
pub async fn purge_dead_letters(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> ApiResult<Json<PurgeResponse>> {
    let purged = state.queue.purge_old(state.config.queue.dlq_max_age).await?;
    Ok(Json(PurgeResponse { purged }))
}
