/// Configuration management for the API server
///
/// Loads configuration from environment variables (with `.env` support for
/// development) into a type-safe struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `REDIS_URL`: Redis connection string (required)
/// - `API_HOST`: bind host (default: 0.0.0.0)
/// - `API_PORT`: bind port (default: 8080)
/// - `JWT_SECRET`: HMAC secret, at least 32 bytes (required)
/// - `JWT_ISSUER` / `JWT_AUDIENCE`: expected token issuer/audience
/// - `JWT_ACCESS_TTL_SECONDS` / `JWT_REFRESH_TTL_SECONDS`
/// - `QUEUE_*`: queue names and timing, same keys the worker reads
///
/// # Example
///
/// ```no_run
/// use voidrunner_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("listening on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use voidrunner_core::auth::jwt::JwtConfig;
use voidrunner_core::db::pool::DatabaseConfig;
use voidrunner_core::queue::QueueConfig;

/// API server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Database pool configuration
    pub database: DatabaseConfig,

    /// Queue configuration
    pub queue: QueueConfig,

    /// JWT signing and validation configuration
    pub jwt: JwtConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or the JWT
    /// secret is shorter than 32 bytes.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api = ApiConfig {
            host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("API_PORT", 8080),
        };

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;
        let database = DatabaseConfig {
            url: database_url,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 25),
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 5),
            ..DatabaseConfig::default()
        };

        let redis_url = env::var("REDIS_URL")
            .map_err(|_| anyhow::anyhow!("REDIS_URL environment variable is required"))?;
        let mut queue = QueueConfig {
            url: redis_url,
            visibility_timeout: Duration::from_secs(env_parse(
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                600,
            )),
            dlq_max_age: Duration::from_secs(env_parse(
                "QUEUE_DLQ_MAX_AGE_SECONDS",
                7 * 24 * 3600,
            )),
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

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let jwt_defaults = JwtConfig::default_for(&jwt_secret);
        let jwt = JwtConfig {
            issuer: env::var("JWT_ISSUER").unwrap_or(jwt_defaults.issuer),
            audience: env::var("JWT_AUDIENCE").unwrap_or(jwt_defaults.audience),
            access_ttl_seconds: env_parse("JWT_ACCESS_TTL_SECONDS", jwt_defaults.access_ttl_seconds),
            refresh_ttl_seconds: env_parse(
                "JWT_REFRESH_TTL_SECONDS",
                jwt_defaults.refresh_ttl_seconds,
            ),
            secret: jwt_secret,
        };

        Ok(Self {
            api,
            database,
            queue,
            jwt,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        let config = Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            jwt: JwtConfig::default_for("test-secret-key-at-least-32-bytes!!"),
        };

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }
}
