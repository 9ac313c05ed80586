/// Execution coordinator
///
/// Composes the store and the queue so the outside world never observes an
/// inconsistent `(task.status, execution.status)` pair, and never loses a
/// queued message the store believes is in flight.
///
/// # Submission is two-phase
///
/// `submit_for_execution` commits the store transaction first, then
/// enqueues. An enqueue failure triggers a best-effort compensation that
/// finalizes the orphan execution as failed and restores the task's prior
/// status. A crash between commit and enqueue leaves a pending orphan; the
/// worker-side reconciler re-enqueues those, idempotently by execution id.
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::coordinator::ExecutionCoordinator;
/// use sqlx::PgPool;
/// use uuid::Uuid;
/// # use voidrunner_core::queue::task_queue::TaskQueue;
///
/// # async fn example(pool: PgPool, queue: TaskQueue, task_id: Uuid, user_id: Uuid) -> anyhow::Result<()> {
/// let coordinator = ExecutionCoordinator::new(pool, queue);
/// let execution = coordinator.submit_for_execution(task_id, user_id).await?;
/// println!("queued execution {}", execution.id);
/// # Ok(())
/// # }
/// ```

use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::access::AccessError;
use crate::error::StoreError;
use crate::models::execution::{ExecutionResult, ExecutionStatus, TaskExecution};
use crate::models::task::{Task, TaskStatus};
use crate::queue::message::TaskMessage;
use crate::queue::task_queue::TaskQueue;
use crate::queue::QueueError;

/// Coordinator error surface
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Task or execution does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The principal does not own the resource
    #[error("not authorized to access this resource")]
    Forbidden,

    /// The operation conflicts with the current lifecycle state
    #[error("{0}")]
    Conflict(String),

    /// Store failure
    #[error(transparent)]
    Store(StoreError),

    /// Queue failure
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl CoordinatorError {
    /// True if the error is worth retrying (backend transport failure)
    pub fn is_transient(&self) -> bool {
        match self {
            CoordinatorError::Store(e) => e.is_transient(),
            CoordinatorError::Queue(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CoordinatorError::NotFound(what),
            StoreError::InvalidTransition { from, to } => CoordinatorError::Conflict(format!(
                "invalid status transition: {} -> {}",
                from, to
            )),
            other => CoordinatorError::Store(other),
        }
    }
}

impl From<sqlx::Error> for CoordinatorError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

impl From<AccessError> for CoordinatorError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound(what) => CoordinatorError::NotFound(what),
            AccessError::Forbidden => CoordinatorError::Forbidden,
            AccessError::Store(e) => e.into(),
        }
    }
}

/// Terminal task status for a terminal execution status (1:1 mapping)
pub fn terminal_task_status(status: ExecutionStatus) -> Option<TaskStatus> {
    match status {
        ExecutionStatus::Completed => Some(TaskStatus::Completed),
        ExecutionStatus::Failed => Some(TaskStatus::Failed),
        ExecutionStatus::Timeout => Some(TaskStatus::Timeout),
        ExecutionStatus::Cancelled => Some(TaskStatus::Cancelled),
        ExecutionStatus::Pending | ExecutionStatus::Running => None,
    }
}

/// Transactional submit/finalize/cancel operations over store + queue
#[derive(Clone)]
pub struct ExecutionCoordinator {
    db: PgPool,
    queue: TaskQueue,
}

impl ExecutionCoordinator {
    /// Creates a coordinator over the given pool and queue
    pub fn new(db: PgPool, queue: TaskQueue) -> Self {
        Self { db, queue }
    }

    /// The queue this coordinator enqueues on
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Submits a task for execution
    ///
    /// Transactionally creates a pending execution and moves the task to
    /// pending, then enqueues the message outside the transaction. The
    /// queue message id is the execution id, so re-enqueueing the same
    /// execution is idempotent.
    pub async fn submit_for_execution(
        &self,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<TaskExecution, CoordinatorError> {
        let mut tx = self.db.begin().await?;

        let task = Task::find_by_id_for_update(&mut *tx, task_id)
            .await?
            .ok_or(CoordinatorError::NotFound("task"))?;

        if task.user_id != user_id {
            return Err(CoordinatorError::Forbidden);
        }

        match task.status {
            TaskStatus::Running
            | TaskStatus::Completed
            | TaskStatus::Failed
            | TaskStatus::Cancelled => {
                return Err(CoordinatorError::Conflict(format!(
                    "cannot execute task in status: {}",
                    task.status
                )));
            }
            TaskStatus::Pending | TaskStatus::Timeout => {}
        }

        let execution = TaskExecution::create(&mut *tx, task_id)
            .await
            .map_err(|e| match e {
                // the single-active-execution index rejected a second
                // concurrent submission
                StoreError::AlreadyExists(_) => CoordinatorError::Conflict(
                    "task already has an execution in flight".to_string(),
                ),
                other => other.into(),
            })?;

        let prior_status = task.status;
        if prior_status != TaskStatus::Pending {
            Task::transition_status(&mut *tx, task_id, prior_status, TaskStatus::Pending).await?;
        }

        tx.commit().await?;

        let message = TaskMessage::for_execution(
            task_id,
            user_id,
            execution.id,
            task.priority,
            task.script_type,
        );

        match self.queue.enqueue(&message).await {
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    execution_id = %execution.id,
                    priority = %message.priority,
                    "Task submitted for execution"
                );
                Ok(execution)
            }
            // Idempotent: the execution is already queued (reconciler or a
            // racing retry beat us)
            Err(QueueError::Duplicate(_)) => Ok(execution),
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    execution_id = %execution.id,
                    error = %e,
                    "Enqueue failed after commit, compensating"
                );
                self.compensate_failed_enqueue(task_id, execution.id, prior_status)
                    .await;
                Err(e.into())
            }
        }
    }

    /// Best-effort rollback after an enqueue failure: finalize the orphan
    /// execution as failed and restore the task's prior status
    async fn compensate_failed_enqueue(
        &self,
        task_id: Uuid,
        execution_id: Uuid,
        prior_status: TaskStatus,
    ) {
        let result = ExecutionResult {
            status: ExecutionStatus::Failed,
            return_code: None,
            stdout: None,
            stderr: Some("failed to enqueue execution".to_string()),
            execution_time_ms: None,
            memory_usage_bytes: None,
            started_at: None,
            completed_at: Some(chrono::Utc::now()),
        };

        if let Err(e) = TaskExecution::write_result(&self.db, execution_id, &result).await {
            error!(
                task_id = %task_id,
                execution_id = %execution_id,
                error = %e,
                "Compensation failed to finalize orphan execution"
            );
        }

        if let Err(e) = Task::restore_status(&self.db, task_id, prior_status).await {
            error!(
                task_id = %task_id,
                prior_status = %prior_status,
                error = %e,
                "Compensation failed to restore task status"
            );
        }
    }

    /// Marks a claimed execution as running
    ///
    /// Moves execution pending → running and task pending → running in one
    /// transaction. Callers treat this as best-effort: a failure means the
    /// state already moved on (redelivery, cancel race) and the caller
    /// decides whether to continue.
    pub async fn mark_running(&self, execution_id: Uuid) -> Result<(), CoordinatorError> {
        let mut tx = self.db.begin().await?;

        let execution = TaskExecution::find_by_id_for_update(&mut *tx, execution_id)
            .await?
            .ok_or(CoordinatorError::NotFound("execution"))?;

        let updated = TaskExecution::transition_to_running(&mut *tx, execution.id).await?;
        Task::transition_status(
            &mut *tx,
            updated.task_id,
            TaskStatus::Pending,
            TaskStatus::Running,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Finalizes an execution with its sandbox result
    ///
    /// Transactionally writes the execution result and moves the task to
    /// the matching terminal status. Rejects executions that are already
    /// terminal with a conflict.
    pub async fn finalize_execution(
        &self,
        execution_id: Uuid,
        result: &ExecutionResult,
        user_id: Uuid,
    ) -> Result<TaskExecution, CoordinatorError> {
        let task_status = terminal_task_status(result.status).ok_or_else(|| {
            CoordinatorError::Conflict(format!(
                "finalize requires a terminal status, got: {}",
                result.status
            ))
        })?;

        let mut tx = self.db.begin().await?;

        let execution = TaskExecution::find_by_id_for_update(&mut *tx, execution_id)
            .await?
            .ok_or(CoordinatorError::NotFound("execution"))?;

        if execution.status.is_terminal() {
            return Err(CoordinatorError::Conflict(format!(
                "execution already finalized: {}",
                execution.status
            )));
        }

        let task = Task::find_by_id_for_update(&mut *tx, execution.task_id)
            .await?
            .ok_or(CoordinatorError::NotFound("task"))?;

        if task.user_id != user_id {
            return Err(CoordinatorError::Forbidden);
        }

        let finalized = TaskExecution::write_result(&mut *tx, execution.id, result).await?;

        // The task may still be pending when mark_running was lost; walk
        // it through running so every stored transition is a legal edge
        match task.status {
            TaskStatus::Running => {
                Task::transition_status(&mut *tx, task.id, TaskStatus::Running, task_status)
                    .await?;
            }
            TaskStatus::Pending if task_status == TaskStatus::Cancelled => {
                Task::transition_status(
                    &mut *tx,
                    task.id,
                    TaskStatus::Pending,
                    TaskStatus::Cancelled,
                )
                .await?;
            }
            TaskStatus::Pending => {
                Task::transition_status(
                    &mut *tx,
                    task.id,
                    TaskStatus::Pending,
                    TaskStatus::Running,
                )
                .await?;
                Task::transition_status(&mut *tx, task.id, TaskStatus::Running, task_status)
                    .await?;
            }
            other => {
                return Err(CoordinatorError::Conflict(format!(
                    "cannot finalize task in status: {}",
                    other
                )));
            }
        }

        tx.commit().await?;

        info!(
            task_id = %task.id,
            execution_id = %execution_id,
            status = %result.status,
            "Execution finalized"
        );
        Ok(finalized)
    }

    /// Cancels an execution
    ///
    /// Sets the execution to cancelled and resets the task to pending so
    /// the user may resubmit. The caller separately signals the dispatcher
    /// to tear down a running sandbox; that signal is idempotent and
    /// best-effort, the store is the source of truth.
    pub async fn cancel_execution(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> Result<TaskExecution, CoordinatorError> {
        let mut tx = self.db.begin().await?;

        let execution = TaskExecution::find_by_id_for_update(&mut *tx, execution_id)
            .await?
            .ok_or(CoordinatorError::NotFound("execution"))?;

        let task = Task::find_by_id_for_update(&mut *tx, execution.task_id)
            .await?
            .ok_or(CoordinatorError::NotFound("task"))?;

        if task.user_id != user_id {
            return Err(CoordinatorError::Forbidden);
        }

        if execution.status.is_terminal() {
            return Err(CoordinatorError::Conflict(format!(
                "execution already terminal: {}",
                execution.status
            )));
        }

        let result = ExecutionResult {
            status: ExecutionStatus::Cancelled,
            return_code: None,
            stdout: None,
            stderr: None,
            execution_time_ms: None,
            memory_usage_bytes: None,
            started_at: execution.started_at,
            completed_at: Some(chrono::Utc::now()),
        };
        let cancelled = TaskExecution::write_result(&mut *tx, execution.id, &result).await?;

        // Reset the task to pending so the user may resubmit
        match task.status {
            TaskStatus::Pending => {}
            TaskStatus::Running => {
                Task::transition_status(
                    &mut *tx,
                    task.id,
                    TaskStatus::Running,
                    TaskStatus::Cancelled,
                )
                .await?;
                Task::transition_status(
                    &mut *tx,
                    task.id,
                    TaskStatus::Cancelled,
                    TaskStatus::Pending,
                )
                .await?;
            }
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled => {
                Task::transition_status(&mut *tx, task.id, task.status, TaskStatus::Pending)
                    .await?;
            }
            TaskStatus::Completed => {
                return Err(CoordinatorError::Conflict(
                    "cannot cancel execution of a completed task".to_string(),
                ));
            }
        }

        tx.commit().await?;

        info!(
            task_id = %task.id,
            execution_id = %execution_id,
            "Execution cancelled"
        );
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_mapping() {
        assert_eq!(
            terminal_task_status(ExecutionStatus::Completed),
            Some(TaskStatus::Completed)
        );
        assert_eq!(
            terminal_task_status(ExecutionStatus::Failed),
            Some(TaskStatus::Failed)
        );
        assert_eq!(
            terminal_task_status(ExecutionStatus::Timeout),
            Some(TaskStatus::Timeout)
        );
        assert_eq!(
            terminal_task_status(ExecutionStatus::Cancelled),
            Some(TaskStatus::Cancelled)
        );
        assert_eq!(terminal_task_status(ExecutionStatus::Pending), None);
        assert_eq!(terminal_task_status(ExecutionStatus::Running), None);
    }

    #[test]
    fn test_store_error_mapping() {
        let err: CoordinatorError = StoreError::NotFound("task").into();
        assert!(matches!(err, CoordinatorError::NotFound("task")));

        let err: CoordinatorError = StoreError::invalid_transition("completed", "running").into();
        assert!(matches!(err, CoordinatorError::Conflict(_)));
    }

    // Transactional behavior (submit/finalize/cancel against Postgres and
    // Redis) is covered in tests/coordinator_tests.rs
}
