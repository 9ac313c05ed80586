/// Task model and database operations
///
/// This module provides the Task model representing user-submitted scripts
/// executed by workers. Tasks are the core entity of the VoidRunner system.
///
/// # State Machine
///
/// ```text
/// pending ──► running ──► {completed | failed | timeout | cancelled}
/// pending ──► cancelled
/// {failed, timeout, cancelled} ──► pending   (restart)
/// completed is terminal.
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE script_type AS ENUM ('python', 'javascript', 'bash', 'go');
/// CREATE TYPE task_status AS ENUM (
///     'pending', 'running', 'completed', 'failed', 'timeout', 'cancelled'
/// );
///
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
///     name VARCHAR(255) NOT NULL,
///     description VARCHAR(1000),
///     script_content TEXT NOT NULL,
///     script_type script_type NOT NULL,
///     status task_status NOT NULL DEFAULT 'pending',
///     priority INTEGER NOT NULL DEFAULT 0,
///     timeout_seconds INTEGER NOT NULL DEFAULT 300,
///     metadata JSONB NOT NULL DEFAULT '{}',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::models::task::{CreateTask, ScriptType, Task};
/// use serde_json::json;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let task = Task::create(&pool, CreateTask {
///     user_id,
///     name: "hello".to_string(),
///     description: None,
///     script_content: "print(1)".to_string(),
///     script_type: ScriptType::Python,
///     priority: 5,
///     timeout_seconds: 30,
///     metadata: json!({}),
/// }).await?;
/// println!("created task {}", task.id);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::execution::ExecutionStatus;
use crate::pagination::{Cursor, CursorPage, CursorQuery, SortField};

const TASK_COLUMNS: &str = "id, user_id, name, description, script_content, script_type, \
     status, priority, timeout_seconds, metadata, created_at, updated_at";

/// Maximum script size in bytes
pub const MAX_SCRIPT_BYTES: usize = 65535;

/// Maximum task name length
pub const MAX_NAME_LEN: usize = 255;

/// Maximum description length
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// Valid priority range (inclusive)
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = 0..=10;

/// Valid timeout range in seconds (inclusive)
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<i32> = 1..=3600;

/// Patterns that are rejected anywhere in script content
const SCRIPT_DENYLIST: &[&str] = &["rm -rf", ":(){ :|:& };:"];

/// Script language of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "script_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Python,
    Javascript,
    Bash,
    Go,
}

impl ScriptType {
    /// Converts the script type to its wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Python => "python",
            ScriptType::Javascript => "javascript",
            ScriptType::Bash => "bash",
            ScriptType::Go => "go",
        }
    }

    /// Parses the wire string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(ScriptType::Python),
            "javascript" => Some(ScriptType::Javascript),
            "bash" => Some(ScriptType::Bash),
            "go" => Some(ScriptType::Go),
            _ => None,
        }
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued or awaiting a worker
    Pending,

    /// A worker is executing the task
    Running,

    /// Finished successfully; terminal
    Completed,

    /// Finished with an error; restartable
    Failed,

    /// Exceeded its wall-clock timeout; restartable
    Timeout,

    /// Cancelled by the user or system; restartable
    Cancelled,
}

impl TaskStatus {
    /// Converts the status to its wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Checks if the task has finished (no worker is acting on it)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    /// Checks if the task is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Checks if transition to the target state is valid
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        match (self, target) {
            // Pending can start running or be cancelled outright
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,

            // Running reaches any terminal state
            (TaskStatus::Running, TaskStatus::Completed) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Timeout) => true,
            (TaskStatus::Running, TaskStatus::Cancelled) => true,

            // Restart path; completed never leaves
            (TaskStatus::Failed, TaskStatus::Pending) => true,
            (TaskStatus::Timeout, TaskStatus::Pending) => true,
            (TaskStatus::Cancelled, TaskStatus::Pending) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task model representing a user-submitted script
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// Unique task ID
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Human-readable task name (1..=255 chars)
    pub name: String,

    /// Optional description (≤1000 chars)
    pub description: Option<String>,

    /// Script source (1..=65535 bytes)
    pub script_content: String,

    /// Script language
    pub script_type: ScriptType,

    /// Current lifecycle state
    pub status: TaskStatus,

    /// Scheduling priority, 0 (default) to 10 (highest)
    pub priority: i32,

    /// Wall-clock execution timeout in seconds (1..=3600)
    pub timeout_seconds: i32,

    /// Free-form user metadata (JSON object)
    pub metadata: JsonValue,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the task was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new task
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    /// Owning user
    pub user_id: Uuid,

    /// Task name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Script source
    pub script_content: String,

    /// Script language
    pub script_type: ScriptType,

    /// Scheduling priority (0..=10)
    pub priority: i32,

    /// Execution timeout in seconds (1..=3600)
    pub timeout_seconds: i32,

    /// Free-form metadata
    pub metadata: JsonValue,
}

/// Input for a full-row task update
///
/// `None` fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTask {
    pub name: Option<String>,
    pub description: Option<String>,
    pub script_content: Option<String>,
    pub script_type: Option<ScriptType>,
    pub priority: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub metadata: Option<JsonValue>,
}

/// Task joined with its execution count (single-round-trip listing)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskWithExecutionCount {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub task: Task,

    /// Total number of executions recorded for this task
    pub execution_count: i64,
}

/// Task joined with its most recent execution, if any
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskWithLatestExecution {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub task: Task,

    /// Latest execution id
    pub latest_execution_id: Option<Uuid>,

    /// Latest execution status
    pub latest_execution_status: Option<ExecutionStatus>,

    /// Latest execution return code
    pub latest_return_code: Option<i32>,

    /// When the latest execution was created
    pub latest_execution_created_at: Option<DateTime<Utc>>,
}

/// A pending task whose pending execution has gone stale (reconciliation)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StalePendingTask {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub execution_id: Uuid,
    pub priority: i32,
    pub script_type: ScriptType,
    pub execution_created_at: DateTime<Utc>,
}

/// Validates script content: non-empty, within the size cap, and free of
/// denylisted patterns
pub fn validate_script_content(script: &str) -> Result<(), String> {
    if script.is_empty() {
        return Err("script content must not be empty".to_string());
    }
    if script.len() > MAX_SCRIPT_BYTES {
        return Err(format!(
            "script content exceeds {} bytes",
            MAX_SCRIPT_BYTES
        ));
    }
    for pattern in SCRIPT_DENYLIST {
        if script.contains(pattern) {
            return Err(format!("script contains forbidden pattern: {}", pattern));
        }
    }
    Ok(())
}

/// Validates the priority range
pub fn validate_priority(priority: i32) -> Result<(), String> {
    if PRIORITY_RANGE.contains(&priority) {
        Ok(())
    } else {
        Err(format!(
            "priority must be between {} and {}",
            PRIORITY_RANGE.start(),
            PRIORITY_RANGE.end()
        ))
    }
}

/// Validates the timeout range
pub fn validate_timeout(timeout_seconds: i32) -> Result<(), String> {
    if TIMEOUT_RANGE.contains(&timeout_seconds) {
        Ok(())
    } else {
        Err(format!(
            "timeout_seconds must be between {} and {}",
            TIMEOUT_RANGE.start(),
            TIMEOUT_RANGE.end()
        ))
    }
}

/// Keyset predicate derived from a decoded cursor
///
/// A cursor that does not carry the ordered column's value falls back to
/// the `(created_at, id)` rule.
enum Keyset {
    None,
    ByCreated(DateTime<Utc>, Uuid),
    ByUpdated(DateTime<Utc>, Uuid),
    ByPriority(i32, DateTime<Utc>, Uuid),
    ByName(String, Uuid),
}

impl Keyset {
    fn from_cursor(sort_field: SortField, cursor: Option<Cursor>) -> Self {
        let Some(c) = cursor else {
            return Keyset::None;
        };
        match sort_field {
            SortField::CreatedAt => Keyset::ByCreated(c.created_at, c.id),
            SortField::UpdatedAt => match c.updated_at {
                Some(ts) => Keyset::ByUpdated(ts, c.id),
                None => Keyset::ByCreated(c.created_at, c.id),
            },
            SortField::Priority => match c.priority {
                Some(p) => Keyset::ByPriority(p, c.created_at, c.id),
                None => Keyset::ByCreated(c.created_at, c.id),
            },
            SortField::Name => match c.name {
                Some(name) => Keyset::ByName(name, c.id),
                None => Keyset::ByCreated(c.created_at, c.id),
            },
        }
    }
}

impl Task {
    /// Creates a new task in pending status
    pub async fn create<'e, E>(executor: E, data: CreateTask) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(&format!(
            r#"
            INSERT INTO tasks
                (user_id, name, description, script_content, script_type,
                 priority, timeout_seconds, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(data.user_id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.script_content)
        .bind(data.script_type)
        .bind(data.priority)
        .bind(data.timeout_seconds)
        .bind(data.metadata)
        .fetch_one(executor)
        .await?;

        Ok(task)
    }

    /// Finds a task by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(task)
    }

    /// Finds a task by ID, locking the row for the current transaction
    ///
    /// Only meaningful when called with a transaction executor; the lock
    /// serializes concurrent status updates to the same task.
    pub async fn find_by_id_for_update<'e, E>(executor: E, id: Uuid) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(task)
    }

    /// Applies a full-row update; the status is never touched here
    pub async fn update<'e, E>(executor: E, id: Uuid, data: UpdateTask) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(&format!(
            r#"
            UPDATE tasks
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                script_content = COALESCE($4, script_content),
                script_type = COALESCE($5, script_type),
                priority = COALESCE($6, priority),
                timeout_seconds = COALESCE($7, timeout_seconds),
                metadata = COALESCE($8, metadata),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.script_content)
        .bind(data.script_type)
        .bind(data.priority)
        .bind(data.timeout_seconds)
        .bind(data.metadata)
        .fetch_optional(executor)
        .await?;

        task.ok_or(StoreError::NotFound("task"))
    }

    /// Narrow status transition guarded by the state machine
    ///
    /// The update only applies while the row still holds `from`; callers
    /// that need a consistent read-modify-write should hold the row lock
    /// via [`Task::find_by_id_for_update`] in the same transaction.
    pub async fn transition_status<'e, E>(
        executor: E,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        if !from.can_transition_to(to) {
            return Err(StoreError::invalid_transition(from, to));
        }

        let task = sqlx::query_as::<_, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(executor)
        .await?;

        task.ok_or(StoreError::NotFound("task"))
    }

    /// Unchecked status write, used only by the submit compensation path
    /// to restore a prior status after an enqueue failure
    pub async fn restore_status<'e, E>(executor: E, id: Uuid, status: TaskStatus) -> StoreResult<()>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("task"));
        }
        Ok(())
    }

    /// Deletes a task
    ///
    /// Executions are kept for audit; the FK is RESTRICT, so deleting a
    /// task that has executions surfaces `ForeignKeyViolation`.
    pub async fn delete<'e, E>(executor: E, id: Uuid) -> StoreResult<()>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("task"));
        }
        Ok(())
    }

    /// Lists a user's tasks with offset pagination, newest first
    pub async fn list_by_user<'e, E>(
        executor: E,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Self>>
    where
        E: PgExecutor<'e>,
    {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(executor)
        .await?;

        Ok(tasks)
    }

    /// Lists a user's tasks with keyset (cursor) pagination
    ///
    /// Fetches `limit + 1` rows; the extra row signals `has_more` and is
    /// dropped from the page. The cursor of the last returned item carries
    /// the ordered column's value so the next page resumes exactly after
    /// it, with the row id as a strict tiebreak.
    pub async fn list_by_user_cursor<'e, E>(
        executor: E,
        user_id: Uuid,
        query: &CursorQuery,
    ) -> StoreResult<CursorPage<Self>>
    where
        E: PgExecutor<'e>,
    {
        let limit = query.effective_limit();
        let keyset = Keyset::from_cursor(query.sort_field, query.decoded_cursor()?);
        let dir = query.sort_order.as_sql();
        let cmp = query.sort_order.comparator();

        let order_by = match query.sort_field {
            SortField::Priority => format!("priority {dir}, created_at {dir}, id {dir}"),
            field => format!("{} {dir}, id {dir}", field.as_column()),
        };

        let mut rows: Vec<Task> = match keyset {
            Keyset::None => {
                sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = $1 \
                     ORDER BY {order_by} LIMIT $2",
                ))
                .bind(user_id)
                .bind(limit + 1)
                .fetch_all(executor)
                .await?
            }
            Keyset::ByCreated(ts, id) => {
                sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = $1 \
                     AND (created_at, id) {cmp} ($2, $3) \
                     ORDER BY {order_by} LIMIT $4",
                ))
                .bind(user_id)
                .bind(ts)
                .bind(id)
                .bind(limit + 1)
                .fetch_all(executor)
                .await?
            }
            Keyset::ByUpdated(ts, id) => {
                sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = $1 \
                     AND (updated_at, id) {cmp} ($2, $3) \
                     ORDER BY {order_by} LIMIT $4",
                ))
                .bind(user_id)
                .bind(ts)
                .bind(id)
                .bind(limit + 1)
                .fetch_all(executor)
                .await?
            }
            Keyset::ByPriority(priority, ts, id) => {
                sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = $1 \
                     AND (priority, created_at, id) {cmp} ($2, $3, $4) \
                     ORDER BY {order_by} LIMIT $5",
                ))
                .bind(user_id)
                .bind(priority)
                .bind(ts)
                .bind(id)
                .bind(limit + 1)
                .fetch_all(executor)
                .await?
            }
            Keyset::ByName(name, id) => {
                sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = $1 \
                     AND (name, id) {cmp} ($2, $3) \
                     ORDER BY {order_by} LIMIT $4",
                ))
                .bind(user_id)
                .bind(name)
                .bind(id)
                .bind(limit + 1)
                .fetch_all(executor)
                .await?
            }
        };

        let has_more = rows.len() as i64 > limit;
        if has_more {
            rows.truncate(limit as usize);
        }

        let next_cursor = if has_more {
            rows.last().map(|last| {
                Cursor {
                    id: last.id,
                    created_at: last.created_at,
                    priority: (query.sort_field == SortField::Priority).then_some(last.priority),
                    name: (query.sort_field == SortField::Name).then(|| last.name.clone()),
                    updated_at: (query.sort_field == SortField::UpdatedAt)
                        .then_some(last.updated_at),
                }
                .encode()
            })
        } else {
            None
        };

        Ok(CursorPage {
            items: rows,
            next_cursor,
            has_more,
        })
    }

    /// Counts a user's tasks
    pub async fn count_by_user<'e, E>(executor: E, user_id: Uuid) -> StoreResult<i64>
    where
        E: PgExecutor<'e>,
    {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(executor)
            .await?;

        Ok(count)
    }

    /// Lists a user's tasks joined with per-task execution counts in a
    /// single round trip (avoids N+1 fetches on the listing hot path)
    pub async fn list_with_execution_counts<'e, E>(
        executor: E,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<TaskWithExecutionCount>>
    where
        E: PgExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, TaskWithExecutionCount>(&format!(
            r#"
            SELECT t.*, COUNT(e.id) AS execution_count
            FROM tasks t
            LEFT JOIN task_executions e ON e.task_id = t.id
            WHERE t.user_id = $1
            GROUP BY t.id
            ORDER BY t.created_at DESC, t.id DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }

    /// Lists a user's tasks joined with their most recent execution in a
    /// single round trip
    pub async fn list_with_latest_execution<'e, E>(
        executor: E,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<TaskWithLatestExecution>>
    where
        E: PgExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, TaskWithLatestExecution>(&format!(
            r#"
            SELECT t.*,
                   e.id AS latest_execution_id,
                   e.status AS latest_execution_status,
                   e.return_code AS latest_return_code,
                   e.created_at AS latest_execution_created_at
            FROM tasks t
            LEFT JOIN LATERAL (
                SELECT id, status, return_code, created_at
                FROM task_executions
                WHERE task_id = t.id
                ORDER BY created_at DESC
                LIMIT 1
            ) e ON TRUE
            WHERE t.user_id = $1
            ORDER BY t.created_at DESC, t.id DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }

    /// Searches a user's tasks by metadata containment (`metadata @> $2`)
    pub async fn search_by_metadata<'e, E>(
        executor: E,
        user_id: Uuid,
        filter: &JsonValue,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Self>>
    where
        E: PgExecutor<'e>,
    {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE user_id = $1 AND metadata @> $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        ))
        .bind(user_id)
        .bind(filter)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(executor)
        .await?;

        Ok(tasks)
    }

    /// Finds pending tasks whose most recent execution is itself pending
    /// and older than the threshold (submission orphans, see the
    /// reconciler)
    pub async fn find_stale_pending<'e, E>(
        executor: E,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<StalePendingTask>>
    where
        E: PgExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, StalePendingTask>(
            r#"
            SELECT t.id AS task_id,
                   t.user_id,
                   e.id AS execution_id,
                   t.priority,
                   t.script_type,
                   e.created_at AS execution_created_at
            FROM tasks t
            JOIN LATERAL (
                SELECT id, status, created_at
                FROM task_executions
                WHERE task_id = t.id
                ORDER BY created_at DESC
                LIMIT 1
            ) e ON TRUE
            WHERE t.status = 'pending'
              AND e.status = 'pending'
              AND e.created_at < $1
            ORDER BY e.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_as_str() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(TaskStatus::Running.as_str(), "running");
        assert_eq!(TaskStatus::Completed.as_str(), "completed");
        assert_eq!(TaskStatus::Failed.as_str(), "failed");
        assert_eq!(TaskStatus::Timeout.as_str(), "timeout");
        assert_eq!(TaskStatus::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn test_task_status_is_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_task_status_is_active() {
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(!TaskStatus::Completed.is_active());
        assert!(!TaskStatus::Failed.is_active());
    }

    #[test]
    fn test_task_status_transitions() {
        // Pending transitions
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));

        // Running transitions
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Timeout));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));

        // Restart path
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Timeout.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Cancelled.can_transition_to(TaskStatus::Pending));

        // Completed is absorbing
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn test_script_type_roundtrip() {
        for (s, t) in [
            ("python", ScriptType::Python),
            ("javascript", ScriptType::Javascript),
            ("bash", ScriptType::Bash),
            ("go", ScriptType::Go),
        ] {
            assert_eq!(ScriptType::parse(s), Some(t));
            assert_eq!(t.as_str(), s);
        }
        assert_eq!(ScriptType::parse("rust"), None);
    }

    #[test]
    fn test_validate_script_content() {
        assert!(validate_script_content("print(1)").is_ok());
        assert!(validate_script_content("").is_err());
        assert!(validate_script_content("rm -rf /").is_err());

        let huge = "x".repeat(MAX_SCRIPT_BYTES + 1);
        assert!(validate_script_content(&huge).is_err());
        let max = "x".repeat(MAX_SCRIPT_BYTES);
        assert!(validate_script_content(&max).is_ok());
    }

    #[test]
    fn test_validate_priority_and_timeout() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(10).is_ok());
        assert!(validate_priority(11).is_err());
        assert!(validate_priority(-1).is_err());

        assert!(validate_timeout(1).is_ok());
        assert!(validate_timeout(3600).is_ok());
        assert!(validate_timeout(0).is_err());
        assert!(validate_timeout(3601).is_err());
    }

    #[test]
    fn test_keyset_fallback_without_ordered_value() {
        let cursor = Cursor {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            priority: None,
            name: None,
            updated_at: None,
        };
        // Priority sort with a cursor missing the priority value falls
        // back to the (created_at, id) rule
        match Keyset::from_cursor(SortField::Priority, Some(cursor)) {
            Keyset::ByCreated(_, _) => {}
            _ => panic!("expected created_at fallback"),
        }
    }
}
