/// Resource ownership checks
///
/// This module is the access gate between an authenticated principal (a
/// verified user id) and the rows it may touch. A user exclusively owns
/// their tasks; execution access inherits from the owning task.
///
/// # Policy
///
/// `NotFound` is returned when the row does not exist; `Forbidden` when it
/// exists but belongs to another principal. HTTP handlers may collapse the
/// two at their boundary, but the core always distinguishes them.
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::auth::access::{authorize_task, AccessError};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, task_id: Uuid, principal: Uuid) {
/// match authorize_task(&pool, task_id, principal).await {
///     Ok(task) => println!("authorized for {}", task.id),
///     Err(AccessError::Forbidden) => println!("someone else's task"),
///     Err(AccessError::NotFound(_)) => println!("no such task"),
///     Err(e) => println!("store failure: {}", e),
/// }
/// # }
/// ```

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::execution::TaskExecution;
use crate::models::task::Task;

/// Error type for authorization checks
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The resource does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The resource exists but is owned by another principal
    #[error("not authorized to access this resource")]
    Forbidden,

    /// Store failure during the lookup
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Checks that a loaded task belongs to the principal
pub fn ensure_task_owner(task: &Task, principal: Uuid) -> Result<(), AccessError> {
    if task.user_id == principal {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

/// Loads a task and verifies ownership
///
/// Returns the task on success so callers do not fetch twice.
pub async fn authorize_task<'e, E>(
    executor: E,
    task_id: Uuid,
    principal: Uuid,
) -> Result<Task, AccessError>
where
    E: PgExecutor<'e>,
{
    let task = Task::find_by_id(executor, task_id)
        .await?
        .ok_or(AccessError::NotFound("task"))?;

    ensure_task_owner(&task, principal)?;
    Ok(task)
}

/// Loads an execution and verifies ownership through its task
///
/// Two lookups on purpose: execution rows carry no owner column, the task
/// is the source of truth. Returns both rows on success.
pub async fn authorize_execution<'e, E>(
    executor: E,
    execution_id: Uuid,
    principal: Uuid,
) -> Result<(TaskExecution, Task), AccessError>
where
    E: PgExecutor<'e> + Copy,
{
    let execution = TaskExecution::find_by_id(executor, execution_id)
        .await?
        .ok_or(AccessError::NotFound("execution"))?;

    let task = Task::find_by_id(executor, execution.task_id)
        .await?
        .ok_or(AccessError::NotFound("task"))?;

    ensure_task_owner(&task, principal)?;
    Ok((execution, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::{ScriptType, TaskStatus};
    use chrono::Utc;

    fn make_task(user_id: Uuid) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id,
            name: "t".to_string(),
            description: None,
            script_content: "print(1)".to_string(),
            script_type: ScriptType::Python,
            status: TaskStatus::Pending,
            priority: 5,
            timeout_seconds: 30,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_owner_passes() {
        let owner = Uuid::new_v4();
        let task = make_task(owner);
        assert!(ensure_task_owner(&task, owner).is_ok());
    }

    #[test]
    fn test_other_principal_forbidden() {
        let task = make_task(Uuid::new_v4());
        let intruder = Uuid::new_v4();
        assert!(matches!(
            ensure_task_owner(&task, intruder),
            Err(AccessError::Forbidden)
        ));
    }
}
