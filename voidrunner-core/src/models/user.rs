/// User model and database operations
///
/// This module provides the User model and CRUD operations for managing
/// user accounts. Emails are normalized to lowercase before storage so the
/// unique index is case-insensitive in practice.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(255) NOT NULL UNIQUE,
///     password_hash VARCHAR(255) NOT NULL,
///     name VARCHAR(255) NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::models::user::{User, CreateUser};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let user = User::create(&pool, CreateUser {
///     email: "Alice@Example.com".to_string(),
///     password_hash: "$argon2id$...".to_string(),
///     name: "Alice".to_string(),
/// }).await?;
/// assert_eq!(user.email, "alice@example.com");
///
/// let found = User::find_by_email(&pool, "alice@example.com").await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

const USER_COLUMNS: &str = "id, email, password_hash, name, created_at, updated_at";

/// User model representing a user account
///
/// Passwords are stored as Argon2id hashes, never in plaintext. The hash
/// is skipped during serialization so it never leaks into API responses.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID (UUID v4)
    pub id: Uuid,

    /// Email address, stored lowercase, unique
    pub email: String,

    /// Argon2id password hash (PHC string)
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Display name
    pub name: String,

    /// When the account was created
    pub created_at: DateTime<Utc>,

    /// When the account was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new user
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    /// Email address (normalized to lowercase on insert)
    pub email: String,

    /// Pre-hashed password
    pub password_hash: String,

    /// Display name
    pub name: String,
}

/// Input for updating a user
///
/// Only provided fields are written; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUser {
    /// New email address (uniqueness enforced)
    pub email: Option<String>,

    /// New display name
    pub name: Option<String>,
}

impl User {
    /// Creates a new user
    ///
    /// The email is lowercased before insert. A duplicate email yields
    /// `StoreError::AlreadyExists`.
    pub async fn create<'e, E>(executor: E, data: CreateUser) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash, name)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(data.email.trim().to_lowercase())
        .bind(data.password_hash)
        .bind(data.name)
        .fetch_one(executor)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::AlreadyExists(_) => StoreError::AlreadyExists("user"),
            other => other,
        })?;

        Ok(user)
    }

    /// Finds a user by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    /// Finds a user by email (case-insensitive)
    pub async fn find_by_email<'e, E>(executor: E, email: &str) -> StoreResult<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    /// Updates a user's email and/or name
    ///
    /// Returns the updated row, or `StoreError::NotFound` if the user does
    /// not exist. Email uniqueness is preserved; a conflicting email yields
    /// `StoreError::AlreadyExists`.
    pub async fn update<'e, E>(executor: E, id: Uuid, data: UpdateUser) -> StoreResult<Self>
    where
        E: PgExecutor<'e>,
    {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                name = COALESCE($3, name),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(data.email.map(|e| e.trim().to_lowercase()))
        .bind(data.name)
        .fetch_optional(executor)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::AlreadyExists(_) => StoreError::AlreadyExists("user"),
            other => other,
        })?;

        user.ok_or(StoreError::NotFound("user"))
    }

    /// Deletes a user
    ///
    /// Fails with `StoreError::ForeignKeyViolation` while the user still
    /// owns tasks.
    pub async fn delete<'e, E>(executor: E, id: Uuid) -> StoreResult<()>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            name: "Alice".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("alice@example.com"));
    }

    // Database-backed CRUD tests live in tests/store_tests.rs
}
