/// Authentication and authorization utilities
///
/// This module provides the identity and access gate for VoidRunner:
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength validation
/// - [`jwt`]: Bearer token generation and validation (HS256, issuer and
///   audience checked)
/// - [`access`]: Resource ownership checks for tasks and executions
/// - [`middleware`]: Axum middleware extracting the authenticated principal
///
/// # Example
///
/// ```no_run
/// use voidrunner_core::auth::password::{hash_password, verify_password};
/// use voidrunner_core::auth::jwt::{create_token, Claims, JwtConfig, TokenKind};
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("user_password")?;
/// assert!(verify_password("user_password", &hash)?);
///
/// let config = JwtConfig::default_for("a-secret-key-at-least-32-bytes-long");
/// let claims = Claims::new(Uuid::new_v4(), "alice@example.com", TokenKind::Access, &config);
/// let token = create_token(&claims, &config)?;
/// # Ok(())
/// # }
/// ```

pub mod access;
pub mod jwt;
pub mod middleware;
pub mod password;
