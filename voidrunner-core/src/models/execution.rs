/// Task execution model and database operations
///
/// A `TaskExecution` is a single attempt to run a task. Executions capture
/// the sandbox outcome (streams, return code, timings) and are kept for
/// audit: rows are immutable once they reach a terminal status, and the
/// foreign key to tasks is RESTRICT so history survives deletion attempts.
///
/// # State Machine
///
/// ```text
/// pending ──► running ──► {completed | failed | timeout | cancelled}
/// pending ──► {failed | cancelled | timeout}      (never started)
/// all terminal states are absorbing
/// ```
///
/// Unlike tasks, an execution never restarts; a retry is a new row.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE execution_status AS ENUM (
///     'pending', 'running', 'completed', 'failed', 'timeout', 'cancelled'
/// );
///
/// CREATE TABLE task_executions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE RESTRICT,
///     status execution_status NOT NULL DEFAULT 'pending',
///     return_code INTEGER CHECK (return_code BETWEEN 0 AND 255),
///     stdout TEXT,
///     stderr TEXT,
///     execution_time_ms BIGINT CHECK (execution_time_ms >= 0),
///     memory_usage_bytes BIGINT CHECK (memory_usage_bytes >= 0),
///     started_at TIMESTAMPTZ,
///     completed_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

const EXECUTION_COLUMNS: &str = "id, task_id, status, return_code, stdout, stderr, \
     execution_time_ms, memory_usage_bytes, started_at, completed_at, created_at";

/// Execution lifecycle state
///
/// Same five states as [`crate::models::task::TaskStatus`], but every
/// terminal state is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created, waiting for a worker to claim the queue message
    Pending,

    /// A sandbox is executing the script
    Running,

    /// Finished successfully
    Completed,

    /// Finished with an error (or never started due to a permanent failure)
    Failed,

    /// Exceeded the wall-clock timeout
    Timeout,

    /// Cancelled before completion
    Cancelled,
}

impl ExecutionStatus {
    /// Converts the status to its wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Checks if the execution has finished; terminal states never leave
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }

    /// Checks if the execution is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    /// Checks if transition to the target state is valid
    ///
    /// Any non-terminal state may finalize into any terminal state (a
    /// permanently failed message may finalize an execution that never
    /// ran); terminal states are absorbing.
    pub fn can_transition_to(&self, target: ExecutionStatus) -> bool {
        match (self, target) {
            (ExecutionStatus::Pending, ExecutionStatus::Running) => true,
            (from, to) if !from.is_terminal() && to.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution model: one attempt to run a task
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskExecution {
    /// Unique execution ID
    pub id: Uuid,

    /// Task this execution belongs to
    pub task_id: Uuid,

    /// Current lifecycle state
    pub status: ExecutionStatus,

    /// Process return code (0..=255), if the script ran to exit
    pub return_code: Option<i32>,

    /// Captured standard output
    pub stdout: Option<String>,

    /// Captured standard error
    pub stderr: Option<String>,

    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: Option<i64>,

    /// Peak memory usage in bytes, if the sandbox reported it
    pub memory_usage_bytes: Option<i64>,

    /// When the sandbox started the script
    pub started_at: Option<DateTime<Utc>>,

    /// When the execution reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// When the execution row was created
    pub created_at: DateTime<Utc>,
}

/// Terminal result reported by the sandbox (or the failure classifier)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Terminal status to record
    pub status: ExecutionStatus,

    /// Process return code
    pub return_code: Option<i32>,

    /// Captured stdout
    pub stdout: Option<String>,

    /// Captured stderr
    pub stderr: Option<String>,

    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: Option<i64>,

    /// Peak memory usage in bytes
    pub memory_usage_bytes: Option<i64>,

    /// When the script started
    pub started_at: Option<DateTime<Utc>>,

    /// When the script finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Validates the result invariants before it is written
    pub fn validate(&self) -> Result<(), String> {
        if !self.status.is_terminal() {
            return Err(format!("result status must be terminal, got {}", self.status));
        }
        if let Some(code) = self.return_code {
            if !(0..=255).contains(&code) {
                return Err(format!("return_code out of range: {}", code));
            }
        }
        if let Some(ms) = self.execution_time_ms {
            if ms < 0 {
                return Err(format!("execution_time_ms must be non-negative: {}", ms));
            }
        }
        if let Some(bytes) = self.memory_usage_bytes {
            if bytes < 0 {
                return Err(format!("memory_usage_bytes must be non-negative: {}", bytes));
            }
        }
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            if completed < started {
                return Err("completed_at precedes started_at".to_string());
            }
        }
        Ok(())
    }

    /// Execution time derived from the timestamp pair when the sandbox did
    /// not pre-supply it
    pub fn effective_execution_time_ms(&self) -> Option<i64> {
        self.execution_time_ms.or_else(|| {
            match (self.started_at, self.completed_at) {
                (Some(started), Some(completed)) => {
                    Some((completed - started).num_milliseconds().max(0))
                }
                _ => None,
            }
        })
    }
}

impl TaskExecution {
    /// Creates a new pending execution for a task
    pub async fn create<'e, E>(executor: E, task_id: Uuid) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        let execution = sqlx::query_as::<_, TaskExecution>(&format!(
            r#"
            INSERT INTO task_executions (task_id)
            VALUES ($1)
            RETURNING {EXECUTION_COLUMNS}
            "#,
        ))
        .bind(task_id)
        .fetch_one(executor)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::ForeignKeyViolation(_) => StoreError::NotFound("task"),
            other => other,
        })?;

        Ok(execution)
    }

    /// Finds an execution by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let execution = sqlx::query_as::<_, TaskExecution>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(execution)
    }

    /// Finds an execution by ID, locking the row for the current transaction
    pub async fn find_by_id_for_update<'e, E>(executor: E, id: Uuid) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let execution = sqlx::query_as::<_, TaskExecution>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(execution)
    }

    /// Lists a task's executions, newest first
    pub async fn list_by_task<'e, E>(
        executor: E,
        task_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Self>>
    where
        E: PgExecutor<'e>,
    {
        let executions = sqlx::query_as::<_, TaskExecution>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM task_executions
            WHERE task_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(task_id)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(executor)
        .await?;

        Ok(executions)
    }

    /// Returns the most recent execution of a task, if any
    pub async fn latest_for_task<'e, E>(executor: E, task_id: Uuid) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let execution = sqlx::query_as::<_, TaskExecution>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM task_executions
            WHERE task_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        ))
        .bind(task_id)
        .fetch_optional(executor)
        .await?;

        Ok(execution)
    }

    /// Returns the task's non-terminal execution, if one exists
    ///
    /// The store invariant allows at most one.
    pub async fn find_active_for_task<'e, E>(
        executor: E,
        task_id: Uuid,
    ) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let execution = sqlx::query_as::<_, TaskExecution>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM task_executions
            WHERE task_id = $1 AND status IN ('pending', 'running')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        ))
        .bind(task_id)
        .fetch_optional(executor)
        .await?;

        Ok(execution)
    }

    /// Transitions a pending execution to running, stamping `started_at`
    ///
    /// Returns `InvalidTransition` if the execution is no longer pending.
    pub async fn transition_to_running<'e, E>(executor: E, id: Uuid) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        let execution = sqlx::query_as::<_, TaskExecution>(&format!(
            r#"
            UPDATE task_executions
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {EXECUTION_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        execution.ok_or_else(|| StoreError::invalid_transition("non-pending", "running"))
    }

    /// Writes the terminal result of an execution
    ///
    /// Guarded on the row still being non-terminal; finalizing an already
    /// terminal execution yields `InvalidTransition`. `execution_time_ms`
    /// is derived from the timestamp pair when not pre-supplied.
    pub async fn write_result<'e, E>(
        executor: E,
        id: Uuid,
        result: &ExecutionResult,
    ) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        result
            .validate()
            .map_err(StoreError::CheckViolation)?;

        let execution = sqlx::query_as::<_, TaskExecution>(&format!(
            r#"
            UPDATE task_executions
            SET status = $2,
                return_code = $3,
                stdout = $4,
                stderr = $5,
                execution_time_ms = $6,
                memory_usage_bytes = $7,
                started_at = COALESCE($8, started_at),
                completed_at = COALESCE($9, NOW())
            WHERE id = $1 AND status IN ('pending', 'running')
            RETURNING {EXECUTION_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(result.status)
        .bind(result.return_code)
        .bind(result.stdout.as_deref())
        .bind(result.stderr.as_deref())
        .bind(result.effective_execution_time_ms())
        .bind(result.memory_usage_bytes)
        .bind(result.started_at)
        .bind(result.completed_at)
        .fetch_optional(executor)
        .await?;

        execution.ok_or_else(|| StoreError::invalid_transition("terminal", result.status))
    }

    /// Counts a task's executions
    pub async fn count_by_task<'e, E>(executor: E, task_id: Uuid) -> StoreResult<i64>
    where
        E: PgExecutor<'e>,
    {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM task_executions WHERE task_id = $1")
                .bind(task_id)
                .fetch_one(executor)
                .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_terminal_absorbing() {
        let terminal = [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Timeout,
            ExecutionStatus::Cancelled,
        ];
        let all = [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Timeout,
            ExecutionStatus::Cancelled,
        ];

        for from in terminal {
            for to in all {
                assert!(
                    !from.can_transition_to(to),
                    "{} -> {} must be rejected",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_execution_status_forward_transitions() {
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Running));
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Cancelled));
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Failed));
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Completed));
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Timeout));
        assert!(!ExecutionStatus::Running.can_transition_to(ExecutionStatus::Pending));
        assert!(!ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Pending));
    }

    #[test]
    fn test_result_validation() {
        let mut result = ExecutionResult {
            status: ExecutionStatus::Completed,
            return_code: Some(0),
            stdout: Some("1\n".to_string()),
            stderr: None,
            execution_time_ms: Some(12),
            memory_usage_bytes: Some(1024),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        };
        assert!(result.validate().is_ok());

        result.return_code = Some(300);
        assert!(result.validate().is_err());
        result.return_code = Some(0);

        result.status = ExecutionStatus::Running;
        assert!(result.validate().is_err());
        result.status = ExecutionStatus::Completed;

        // completed_at must not precede started_at
        result.completed_at = Some(result.started_at.unwrap() - chrono::Duration::seconds(5));
        assert!(result.validate().is_err());
    }

    #[test]
    fn test_execution_time_derived_from_timestamps() {
        let started = Utc::now();
        let result = ExecutionResult {
            status: ExecutionStatus::Completed,
            return_code: Some(0),
            stdout: None,
            stderr: None,
            execution_time_ms: None,
            memory_usage_bytes: None,
            started_at: Some(started),
            completed_at: Some(started + chrono::Duration::milliseconds(1500)),
        };
        assert_eq!(result.effective_execution_time_ms(), Some(1500));

        // Pre-supplied value wins
        let result = ExecutionResult {
            execution_time_ms: Some(42),
            ..result
        };
        assert_eq!(result.effective_execution_time_ms(), Some(42));
    }
}
