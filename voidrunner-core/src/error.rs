/// Typed store errors
///
/// This module defines the error surface of the persistent store. Repository
/// functions translate low-level sqlx/Postgres failures into these typed
/// variants so callers can match on them instead of inspecting SQLSTATE
/// codes themselves.
///
/// # Mapping
///
/// | Postgres code | Variant |
/// |---------------|---------|
/// | 23505 (unique_violation) | `AlreadyExists` |
/// | 23503 (foreign_key_violation) | `ForeignKeyViolation` |
/// | 23514 (check_violation) | `CheckViolation` |
/// | row not found | `NotFound` |
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::error::StoreError;
/// use voidrunner_core::models::user::{CreateUser, User};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool, data: CreateUser) {
/// match User::create(&pool, data).await {
///     Ok(user) => println!("created {}", user.id),
///     Err(StoreError::AlreadyExists(_)) => println!("email taken"),
///     Err(e) => println!("store failure: {}", e),
/// }
/// # }
/// ```

use thiserror::Error;

/// Store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Unified error type for repository operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Unique constraint violated
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    /// Referenced row does not exist (or is still referenced on delete)
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// CHECK constraint violated (range or enum column)
    #[error("check violation: {0}")]
    CheckViolation(String),

    /// Cursor could not be decoded or references a different ordering
    #[error("invalid pagination cursor")]
    InvalidCursor,

    /// Status transition forbidden by the state machine
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Underlying database transport error
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Builds an invalid-transition error from any displayable pair of states
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        StoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// True if the error is worth retrying (transport-level failure)
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::RowNotFound) {
            return StoreError::NotFound("row");
        }

        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some("23505") => return StoreError::AlreadyExists("row"),
                Some("23503") => {
                    return StoreError::ForeignKeyViolation(db_err.message().to_string())
                }
                Some("23514") => return StoreError::CheckViolation(db_err.message().to_string()),
                _ => {}
            }
        }

        StoreError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = StoreError::invalid_transition("completed", "running");
        assert_eq!(
            err.to_string(),
            "invalid status transition: completed -> running"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = StoreError::NotFound("task");
        assert_eq!(err.to_string(), "task not found");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(!StoreError::NotFound("task").is_transient());
        assert!(!StoreError::InvalidCursor.is_transient());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
