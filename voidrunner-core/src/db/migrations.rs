/// Database migration runner
///
/// This module applies the SQL migrations embedded from the workspace
/// `migrations/` directory using sqlx's migration system.
///
/// # Migration Files
///
/// Each migration is a single `{version}_{name}.sql` file applied exactly
/// once, tracked in the `_sqlx_migrations` table.
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::db::pool::{create_pool, DatabaseConfig};
/// use voidrunner_core::db::migrations::{run_migrations, get_migration_status};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig {
///         url: std::env::var("DATABASE_URL")?,
///         ..Default::default()
///     };
///
///     let pool = create_pool(config).await?;
///     run_migrations(&pool).await?;
///
///     let status = get_migration_status(&pool).await?;
///     println!("applied {} migrations", status.applied_migrations);
///     Ok(())
/// }
/// ```

use sqlx::postgres::PgPool;
use tracing::info;

/// Embedded migrator for the workspace migrations directory
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../migrations");

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Number of migrations that have been applied
    pub applied_migrations: usize,

    /// Latest applied migration version
    pub latest_version: Option<i64>,
}

/// Runs all pending database migrations
///
/// Safe to call on every startup; already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running database migrations");
    MIGRATOR.run(pool).await?;
    info!("Database migrations up to date");
    Ok(())
}

/// Queries the applied-migration bookkeeping table
pub async fn get_migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT version FROM _sqlx_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;

    Ok(MigrationStatus {
        applied_migrations: rows.len(),
        latest_version: rows.last().map(|(v,)| *v),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrator_embeds_migrations() {
        assert!(!MIGRATOR.migrations.is_empty());
    }
}
