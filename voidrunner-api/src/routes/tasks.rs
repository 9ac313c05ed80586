/// Task CRUD endpoints
///
/// # Endpoints
///
/// - `POST /api/v1/tasks` - Create a task
/// - `GET /api/v1/tasks` - List tasks (offset or cursor pagination)
/// - `GET /api/v1/tasks/:id` - Fetch one task
/// - `PUT /api/v1/tasks/:id` - Update a task
/// - `DELETE /api/v1/tasks/:id` - Delete a task (executions are kept)
///
/// Listing accepts either `limit`/`offset` or
/// `limit`/`cursor`/`sort_field`/`sort_order`; the cursor form pages
/// stably under concurrent inserts. `include=execution_count` and
/// `include=latest_execution` switch to the single-round-trip joined
/// listings, and `metadata` filters by JSON containment.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use voidrunner_core::auth::access::authorize_task;
use voidrunner_core::auth::middleware::AuthContext;
use voidrunner_core::models::task::{
    self, CreateTask, ScriptType, Task, TaskWithExecutionCount, TaskWithLatestExecution,
    UpdateTask,
};
use voidrunner_core::pagination::{
    CursorPage, CursorQuery, OffsetPage, SortField, SortOrder,
};

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
};

/// Create task request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    /// Task name
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,

    /// Optional description
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,

    /// Script source
    pub script_content: String,

    /// Script language
    pub script_type: ScriptType,

    /// Scheduling priority (0..=10, default 0)
    #[serde(default)]
    pub priority: i32,

    /// Wall-clock timeout in seconds (default 300)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i32,

    /// Free-form metadata object
    #[serde(default = "default_metadata")]
    pub metadata: JsonValue,
}

fn default_timeout() -> i32 {
    300
}

fn default_metadata() -> JsonValue {
    serde_json::json!({})
}

/// Update task request; omitted fields keep their value
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,

    pub script_content: Option<String>,
    pub script_type: Option<ScriptType>,
    pub priority: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub metadata: Option<JsonValue>,
}

/// List query parameters; cursor parameters switch to keyset pagination
#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub cursor: Option<String>,
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,

    /// JSON object; only tasks whose metadata contains it are returned
    pub metadata: Option<String>,

    /// `execution_count` or `latest_execution` joined listings
    pub include: Option<String>,
}

/// List response, shaped by the pagination mode
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ListTasksResponse {
    Cursor(CursorPage<Task>),
    Offset {
        items: Vec<Task>,
        limit: i64,
        offset: i64,
    },
    WithCounts {
        items: Vec<TaskWithExecutionCount>,
        limit: i64,
        offset: i64,
    },
    WithLatest {
        items: Vec<TaskWithLatestExecution>,
        limit: i64,
        offset: i64,
    },
}

/// Validates the fields the derive cannot express; oversized scripts are
/// a 413, everything else a 400 with the validation envelope
fn validate_script_fields(
    script_content: Option<&str>,
    priority: Option<i32>,
    timeout_seconds: Option<i32>,
) -> ApiResult<()> {
    let mut errors = Vec::new();

    if let Some(script) = script_content {
        if script.len() > task::MAX_SCRIPT_BYTES {
            return Err(ApiError::PayloadTooLarge(format!(
                "script content exceeds {} bytes",
                task::MAX_SCRIPT_BYTES
            )));
        }
        if let Err(message) = task::validate_script_content(script) {
            errors.push(ValidationErrorDetail {
                field: "script_content".to_string(),
                value: None,
                tag: Some("script".to_string()),
                message,
            });
        }
    }

    if let Some(priority) = priority {
        if let Err(message) = task::validate_priority(priority) {
            errors.push(ValidationErrorDetail {
                field: "priority".to_string(),
                value: Some(priority.to_string()),
                tag: Some("range".to_string()),
                message,
            });
        }
    }

    if let Some(timeout) = timeout_seconds {
        if let Err(message) = task::validate_timeout(timeout) {
            errors.push(ValidationErrorDetail {
                field: "timeout_seconds".to_string(),
                value: Some(timeout.to_string()),
                tag: Some("range".to_string()),
                message,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Creates a task in pending status
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Json<Task>> {
    request.validate()?;
    validate_script_fields(
        Some(&request.script_content),
        Some(request.priority),
        Some(request.timeout_seconds),
    )?;

    if !request.metadata.is_object() {
        return Err(ApiError::BadRequest("metadata must be a JSON object".to_string()));
    }

    let created = Task::create(
        &state.db,
        CreateTask {
            user_id: auth.user_id,
            name: request.name,
            description: request.description,
            script_content: request.script_content,
            script_type: request.script_type,
            priority: request.priority,
            timeout_seconds: request.timeout_seconds,
            metadata: request.metadata,
        },
    )
    .await?;

    tracing::info!(task_id = %created.id, user_id = %auth.user_id, "Task created");
    Ok(Json(created))
}

/// Lists the caller's tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<ListTasksResponse>> {
    // Cursor mode whenever any keyset parameter is present
    if query.cursor.is_some() || query.sort_field.is_some() || query.sort_order.is_some() {
        let sort_field = match query.sort_field.as_deref() {
            Some(raw) => SortField::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown sort_field: {}", raw)))?,
            None => SortField::default(),
        };
        let sort_order = match query.sort_order.as_deref() {
            Some(raw) => SortOrder::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown sort_order: {}", raw)))?,
            None => SortOrder::default(),
        };

        let page = Task::list_by_user_cursor(
            &state.db,
            auth.user_id,
            &CursorQuery {
                limit: query.limit,
                cursor: query.cursor,
                sort_field,
                sort_order,
            },
        )
        .await?;

        return Ok(Json(ListTasksResponse::Cursor(page)));
    }

    let (limit, offset) = OffsetPage {
        limit: query.limit,
        offset: query.offset,
    }
    .normalized();

    if let Some(raw_filter) = &query.metadata {
        let filter: JsonValue = serde_json::from_str(raw_filter)
            .map_err(|_| ApiError::BadRequest("metadata filter must be JSON".to_string()))?;
        let items =
            Task::search_by_metadata(&state.db, auth.user_id, &filter, limit, offset).await?;
        return Ok(Json(ListTasksResponse::Offset {
            items,
            limit,
            offset,
        }));
    }

    match query.include.as_deref() {
        Some("execution_count") => {
            let items =
                Task::list_with_execution_counts(&state.db, auth.user_id, limit, offset).await?;
            Ok(Json(ListTasksResponse::WithCounts {
                items,
                limit,
                offset,
            }))
        }
        Some("latest_execution") => {
            let items =
                Task::list_with_latest_execution(&state.db, auth.user_id, limit, offset).await?;
            Ok(Json(ListTasksResponse::WithLatest {
                items,
                limit,
                offset,
            }))
        }
        Some(other) => Err(ApiError::BadRequest(format!("unknown include: {}", other))),
        None => {
            let items = Task::list_by_user(&state.db, auth.user_id, limit, offset).await?;
            Ok(Json(ListTasksResponse::Offset {
                items,
                limit,
                offset,
            }))
        }
    }
}

/// Fetches one task, owner only
pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = authorize_task(&state.db, task_id, auth.user_id).await?;
    Ok(Json(task))
}

/// Updates a task's definition (never its status)
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<Uuid>,
    Json(request): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    request.validate()?;
    validate_script_fields(
        request.script_content.as_deref(),
        request.priority,
        request.timeout_seconds,
    )?;

    if let Some(metadata) = &request.metadata {
        if !metadata.is_object() {
            return Err(ApiError::BadRequest("metadata must be a JSON object".to_string()));
        }
    }

    authorize_task(&state.db, task_id, auth.user_id).await?;

    let updated = Task::update(
        &state.db,
        task_id,
        UpdateTask {
            name: request.name,
            description: request.description,
            script_content: request.script_content,
            script_type: request.script_type,
            priority: request.priority,
            timeout_seconds: request.timeout_seconds,
            metadata: request.metadata,
        },
    )
    .await?;

    Ok(Json(updated))
}

/// Deletes a task
///
/// Executions persist for audit; a task with recorded executions cannot
/// be deleted and the attempt yields a conflict.
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    authorize_task(&state.db, task_id, auth.user_id).await?;
    Task::delete(&state.db, task_id).await?;

    tracing::info!(task_id = %task_id, user_id = %auth.user_id, "Task deleted");
    Ok(axum::http::StatusCode::NO_CONTENT)
}
