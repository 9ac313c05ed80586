/// Database models for VoidRunner
///
/// This module contains all database models and their CRUD operations.
///
/// # Models
///
/// - `user`: User accounts
/// - `task`: User-submitted scripts with lifecycle state
/// - `execution`: Single attempts to run a task
///
/// Repository functions are generic over [`sqlx::PgExecutor`], so every
/// query runs either directly against the pool or inside a transaction
/// handle obtained from it. The coordinator uses the transactional flavor
/// for multi-step mutations.
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::models::user::{User, CreateUser};
/// use voidrunner_core::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let new_user = CreateUser {
///     email: "user@example.com".to_string(),
///     password_hash: "$argon2id$...".to_string(),
///     name: "John Doe".to_string(),
/// };
///
/// let user = User::create(&pool, new_user).await?;
/// # Ok(())
/// # }
/// ```

pub mod execution;
pub mod task;
pub mod user;
