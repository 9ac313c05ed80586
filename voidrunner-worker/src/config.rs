/// Worker configuration
///
/// Loads every knob the worker binary needs from environment variables
/// (with `.env` support for development).
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `REDIS_URL`: Redis connection string (required)
/// - `EXECUTOR_WORKERS`: concurrent workers (default: 4)
/// - `EXECUTOR_MEMORY_LIMIT_BYTES`: default memory cap (default: 128 MiB)
/// - `EXECUTOR_CPU_QUOTA_US`: CFS quota per 100ms period (default: 50000)
/// - `EXECUTOR_PIDS_LIMIT`: pid cap (default: 128)
/// - `EXECUTOR_CLEANUP_MAX_AGE_SECONDS`: stale handle age (default: 3600)
/// - `QUEUE_TASK_NAME` / `QUEUE_RETRY_NAME` / `QUEUE_DEAD_LETTER_NAME`
/// - `QUEUE_VISIBILITY_TIMEOUT_SECONDS` (default: 600)
/// - `QUEUE_LONG_POLL_WAIT_SECONDS` (default: 10)
/// - `QUEUE_RETRY_BASE_SECONDS` / `QUEUE_RETRY_FACTOR` /
///   `QUEUE_RETRY_MAX_SECONDS` / `QUEUE_RETRY_MAX_ATTEMPTS`
/// - `QUEUE_DLQ_MAX_AGE_SECONDS` (default: 7 days)
/// - `RECONCILER_INTERVAL_SECONDS` / `RECONCILER_THRESHOLD_SECONDS`

use std::env;
use std::time::Duration;

use voidrunner_core::db::pool::DatabaseConfig;
use voidrunner_core::queue::backoff::RetryPolicy;
use voidrunner_core::queue::QueueConfig;

use crate::dispatcher::DispatcherConfig;
use crate::reconciler::ReconcilerConfig;
use crate::sandbox::ResourceLimits;

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Database pool settings
    pub database: DatabaseConfig,

    /// Queue settings
    pub queue: QueueConfig,

    /// Dispatcher pool settings
    pub dispatcher: DispatcherConfig,

    /// Reconciler settings
    pub reconciler: ReconcilerConfig,

    /// Stale sandbox handle age before forced release
    pub cleanup_max_age: Duration,

    /// Queue maintenance sweep interval
    pub maintenance_interval: Duration,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parse(key, default_secs))
}

impl WorkerConfig {
    /// Loads configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns an error when `DATABASE_URL` or `REDIS_URL` is missing.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;
        let redis_url = env::var("REDIS_URL")
            .map_err(|_| anyhow::anyhow!("REDIS_URL environment variable is required"))?;

        let database = DatabaseConfig {
            url: database_url,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 25),
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 5),
            ..DatabaseConfig::default()
        };

        let mut queue = QueueConfig {
            url: redis_url,
            visibility_timeout: env_secs("QUEUE_VISIBILITY_TIMEOUT_SECONDS", 600),
            long_poll_wait: env_secs("QUEUE_LONG_POLL_WAIT_SECONDS", 10),
            retry: RetryPolicy {
                base: env_secs("QUEUE_RETRY_BASE_SECONDS", 60),
                factor: env_parse("QUEUE_RETRY_FACTOR", 2.0),
                max_delay: env_secs("QUEUE_RETRY_MAX_SECONDS", 600),
                max_attempts: env_parse("QUEUE_RETRY_MAX_ATTEMPTS", 5),
            },
            dlq_max_age: env_secs("QUEUE_DLQ_MAX_AGE_SECONDS", 7 * 24 * 3600),
            ..QueueConfig::default()
        };
        if let Ok(name) = env::var("QUEUE_TASK_NAME") {
            queue.task_queue_name = name;
        }
        if let Ok(name) = env::var("QUEUE_RETRY_NAME") {
            queue.retry_queue_name = name;
        }
        if let Ok(name) = env::var("QUEUE_DEAD_LETTER_NAME") {
            queue.dead_letter_queue_name = name;
        }

        let default_limits = ResourceLimits {
            memory_bytes: env_parse("EXECUTOR_MEMORY_LIMIT_BYTES", 128 * 1024 * 1024),
            cpu_quota_us: env_parse("EXECUTOR_CPU_QUOTA_US", 50_000),
            pids: env_parse("EXECUTOR_PIDS_LIMIT", 128),
            ..ResourceLimits::default()
        };

        let dispatcher = DispatcherConfig {
            workers: env_parse("EXECUTOR_WORKERS", 4),
            long_poll_wait: queue.long_poll_wait,
            default_limits,
            ..DispatcherConfig::default()
        };

        let reconciler = ReconcilerConfig {
            interval: env_secs("RECONCILER_INTERVAL_SECONDS", 60),
            orphan_threshold: env_secs("RECONCILER_THRESHOLD_SECONDS", 120),
            ..ReconcilerConfig::default()
        };

        Ok(Self {
            database,
            queue,
            dispatcher,
            reconciler,
            cleanup_max_age: env_secs("EXECUTOR_CLEANUP_MAX_AGE_SECONDS", 3600),
            maintenance_interval: env_secs("QUEUE_MAINTENANCE_INTERVAL_SECONDS", 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_fallback() {
        assert_eq!(env_parse("VOIDRUNNER_TEST_UNSET_VAR", 42u32), 42);
    }

    #[test]
    fn test_env_secs_fallback() {
        assert_eq!(
            env_secs("VOIDRUNNER_TEST_UNSET_VAR", 7),
            Duration::from_secs(7)
        );
    }
}
