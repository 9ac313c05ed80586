/// Health check endpoint
///
/// # Endpoint
///
/// ```text
/// GET /healthz
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "queue": "connected"
/// }
/// ```

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use voidrunner_core::db::pool::health_check;

use crate::app::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status: healthy or degraded
    pub status: String,

    /// Application version
    pub version: String,

    /// Database status
    pub database: String,

    /// Queue backend status
    pub queue: String,
}

/// Health check handler
///
/// Probes the database (`SELECT 1`) and the queue backend (`PING`).
/// Returns 503 when either is unreachable so load balancers drain the
/// instance.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match health_check(&state.db).await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    let queue = match state.queue.ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    let healthy = database == "connected" && queue == "connected";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: database.to_string(),
            queue: queue.to_string(),
        }),
    )
}
