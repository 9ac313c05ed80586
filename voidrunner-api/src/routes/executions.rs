/// Execution endpoints
///
/// # Endpoints
///
/// - `POST /api/v1/tasks/:id/executions` - Submit a task for execution
/// - `GET /api/v1/tasks/:id/executions` - List a task's executions
/// - `GET /api/v1/executions/:id` - Fetch one execution
/// - `POST /api/v1/executions/:id/cancel` - Cancel an execution
///
/// Submission is queue-mediated: the coordinator persists a pending
/// execution and enqueues a message; a worker picks it up. Cancellation
/// updates the store first, then signals any worker currently running the
/// sandbox.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use voidrunner_core::auth::access::{authorize_execution, authorize_task};
use voidrunner_core::auth::middleware::AuthContext;
use voidrunner_core::models::execution::TaskExecution;
use voidrunner_core::pagination::OffsetPage;

use crate::{app::AppState, error::ApiResult};

/// Execution list query
#[derive(Debug, Default, Deserialize)]
pub struct ListExecutionsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// The cancelled execution
    pub execution: TaskExecution,

    /// Whether a worker acknowledged the teardown signal
    pub signaled_worker: bool,
}

/// Submits a task for execution
///
/// # Errors
///
/// - `404` / `403`: unknown task / not the owner
/// - `409`: the task's status does not allow submission, or an execution
///   is already in flight
pub async fn submit_execution(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<TaskExecution>> {
    let execution = state
        .coordinator
        .submit_for_execution(task_id, auth.user_id)
        .await?;

    Ok(Json(execution))
}

/// Lists a task's executions, newest first
pub async fn list_executions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> ApiResult<Json<Vec<TaskExecution>>> {
    authorize_task(&state.db, task_id, auth.user_id).await?;

    let (limit, offset) = OffsetPage {
        limit: query.limit,
        offset: query.offset,
    }
    .normalized();

    let executions = TaskExecution::list_by_task(&state.db, task_id, limit, offset).await?;
    Ok(Json(executions))
}

/// Fetches one execution; access inherits from the owning task
pub async fn get_execution(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<TaskExecution>> {
    let (execution, _task) = authorize_execution(&state.db, execution_id, auth.user_id).await?;
    Ok(Json(execution))
}

/// Cancels an execution
///
/// The store is updated first (execution cancelled, task reset to
/// pending); the teardown signal to a running worker is idempotent and
/// best-effort.
pub async fn cancel_execution(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let execution = state
        .coordinator
        .cancel_execution(execution_id, auth.user_id)
        .await?;

    let signaled_worker = match state
        .signaler
        .send_cancel(execution_id, Some("user requested".to_string()))
        .await
    {
        Ok(receivers) => receivers > 0,
        Err(e) => {
            tracing::warn!(
                execution_id = %execution_id,
                error = %e,
                "Cancel signal failed; sandbox will stop at its next finalize"
            );
            false
        }
    };

    Ok(Json(CancelResponse {
        execution,
        signaled_worker,
    }))
}
