/// JWT token generation and validation
///
/// Bearer credentials are signed JWTs (HS256). Validation checks the
/// signature, expiration, not-before, issuer, audience, and token kind;
/// an access token is never accepted where a refresh token is required
/// and vice versa.
///
/// # Token Kinds
///
/// - **Access**: short-lived, authenticates API requests
/// - **Refresh**: long-lived, exchanged for new access tokens
///
/// # Example
///
/// ```
/// use voidrunner_core::auth::jwt::{create_token, validate_access_token, Claims, JwtConfig, TokenKind};
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = JwtConfig::default_for("test-secret-key-at-least-32-bytes!!");
/// let user_id = Uuid::new_v4();
///
/// let claims = Claims::new(user_id, "alice@example.com", TokenKind::Access, &config);
/// let token = create_token(&claims, &config)?;
///
/// let validated = validate_access_token(&token, &config)?;
/// assert_eq!(validated.sub, user_id);
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to create token
    #[error("failed to create token: {0}")]
    CreateError(String),

    /// Failed to validate token
    #[error("failed to validate token: {0}")]
    ValidationError(String),

    /// Token has expired
    #[error("token has expired")]
    Expired,

    /// Issuer does not match the configured value
    #[error("invalid token issuer")]
    InvalidIssuer,

    /// Audience does not match the configured value
    #[error("invalid token audience")]
    InvalidAudience,

    /// Token kind mismatch (access where refresh required, or vice versa)
    #[error("wrong token kind: expected {expected}")]
    WrongKind { expected: &'static str },
}

/// JWT signing and validation configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC secret (at least 32 bytes)
    pub secret: String,

    /// Expected `iss` claim
    pub issuer: String,

    /// Expected `aud` claim
    pub audience: String,

    /// Access token lifetime in seconds
    pub access_ttl_seconds: i64,

    /// Refresh token lifetime in seconds
    pub refresh_ttl_seconds: i64,
}

impl JwtConfig {
    /// Configuration with default issuer/audience and lifetimes
    /// (15 minutes access, 7 days refresh)
    pub fn default_for(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            issuer: "voidrunner".to_string(),
            audience: "voidrunner-api".to_string(),
            access_ttl_seconds: 15 * 60,
            refresh_ttl_seconds: 7 * 24 * 3600,
        }
    }
}

/// Token kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Access token (API authentication)
    Access,

    /// Refresh token (token renewal only)
    Refresh,
}

impl TokenKind {
    /// Gets the token kind as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT claims structure
///
/// # Standard Claims
///
/// - `sub`: Subject (user ID)
/// - `iss` / `aud`: issuer and audience, both validated
/// - `iat` / `exp` / `nbf`: issued-at, expiration, not-before
///
/// # Custom Claims
///
/// - `email`: the user's email at issue time
/// - `kind`: access or refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - user ID
    pub sub: Uuid,

    /// User email at issue time
    pub email: String,

    /// Token kind
    pub kind: TokenKind,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl Claims {
    /// Creates claims for a user with the configured lifetime for the kind
    pub fn new(user_id: Uuid, email: &str, kind: TokenKind, config: &JwtConfig) -> Self {
        let ttl = match kind {
            TokenKind::Access => config.access_ttl_seconds,
            TokenKind::Refresh => config.refresh_ttl_seconds,
        };
        Self::with_ttl(user_id, email, kind, config, Duration::seconds(ttl))
    }

    /// Creates claims with an explicit lifetime
    pub fn with_ttl(
        user_id: Uuid,
        email: &str,
        kind: TokenKind,
        config: &JwtConfig,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            email: email.to_string(),
            kind,
            iss: config.issuer.clone(),
            aud: config.audience.clone(),
            exp: (now + ttl).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
        }
    }

    /// Checks if the token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Creates a signed JWT from claims
pub fn create_token(claims: &Claims, config: &JwtConfig) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(config.secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("token encoding failed: {}", e)))
}

/// Validates a JWT and extracts its claims
///
/// Verifies the HMAC signature, `exp`, `nbf`, `iss`, and `aud` against the
/// configuration. The token kind is NOT checked here; use
/// [`validate_access_token`] / [`validate_refresh_token`].
pub fn validate_token(token: &str, config: &JwtConfig) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(config.secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.set_audience(&[&config.audience]);
    validation.validate_exp = true;
    validation.validate_nbf = true;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        jsonwebtoken::errors::ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
        jsonwebtoken::errors::ErrorKind::InvalidAudience => JwtError::InvalidAudience,
        _ => JwtError::ValidationError(format!("token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

/// Validates a token and requires it to be an access token
pub fn validate_access_token(token: &str, config: &JwtConfig) -> Result<Claims, JwtError> {
    let claims = validate_token(token, config)?;

    if claims.kind != TokenKind::Access {
        return Err(JwtError::WrongKind { expected: "access" });
    }

    Ok(claims)
}

/// Validates a token and requires it to be a refresh token
pub fn validate_refresh_token(token: &str, config: &JwtConfig) -> Result<Claims, JwtError> {
    let claims = validate_token(token, config)?;

    if claims.kind != TokenKind::Refresh {
        return Err(JwtError::WrongKind { expected: "refresh" });
    }

    Ok(claims)
}

/// Exchanges a valid refresh token for a new access token
pub fn refresh_access_token(refresh_token: &str, config: &JwtConfig) -> Result<String, JwtError> {
    let refresh_claims = validate_refresh_token(refresh_token, config)?;

    let access_claims = Claims::new(
        refresh_claims.sub,
        &refresh_claims.email,
        TokenKind::Access,
        config,
    );

    create_token(&access_claims, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig::default_for("test-secret-key-at-least-32-bytes!!")
    }

    #[test]
    fn test_create_and_validate_token() {
        let config = test_config();
        let user_id = Uuid::new_v4();

        let claims = Claims::new(user_id, "alice@example.com", TokenKind::Access, &config);
        let token = create_token(&claims, &config).expect("should create token");

        let validated = validate_token(&token, &config).expect("should validate token");
        assert_eq!(validated.sub, user_id);
        assert_eq!(validated.email, "alice@example.com");
        assert_eq!(validated.kind, TokenKind::Access);
        assert_eq!(validated.iss, "voidrunner");
        assert_eq!(validated.aud, "voidrunner-api");
    }

    #[test]
    fn test_validate_with_wrong_secret() {
        let config = test_config();
        let claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Access, &config);
        let token = create_token(&claims, &config).unwrap();

        let other = JwtConfig {
            secret: "another-secret-key-also-32-bytes!!!".to_string(),
            ..test_config()
        };
        assert!(validate_token(&token, &other).is_err());
    }

    #[test]
    fn test_validate_with_wrong_issuer() {
        let mut issuing = test_config();
        issuing.issuer = "someone-else".to_string();
        let claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Access, &issuing);
        let token = create_token(&claims, &issuing).unwrap();

        let result = validate_token(&token, &test_config());
        assert!(matches!(result, Err(JwtError::InvalidIssuer)));
    }

    #[test]
    fn test_validate_with_wrong_audience() {
        let mut issuing = test_config();
        issuing.audience = "other-service".to_string();
        let claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Access, &issuing);
        let token = create_token(&claims, &issuing).unwrap();

        let result = validate_token(&token, &test_config());
        assert!(matches!(result, Err(JwtError::InvalidAudience)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = test_config();
        let claims = Claims::with_ttl(
            Uuid::new_v4(),
            "a@b.c",
            TokenKind::Access,
            &config,
            Duration::seconds(-3600),
        );
        assert!(claims.is_expired());

        let token = create_token(&claims, &config).unwrap();
        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(JwtError::Expired)));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let config = test_config();

        let access_claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Access, &config);
        let access_token = create_token(&access_claims, &config).unwrap();
        assert!(validate_access_token(&access_token, &config).is_ok());
        assert!(matches!(
            validate_refresh_token(&access_token, &config),
            Err(JwtError::WrongKind { expected: "refresh" })
        ));

        let refresh_claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Refresh, &config);
        let refresh_token = create_token(&refresh_claims, &config).unwrap();
        assert!(validate_refresh_token(&refresh_token, &config).is_ok());
        assert!(matches!(
            validate_access_token(&refresh_token, &config),
            Err(JwtError::WrongKind { expected: "access" })
        ));
    }

    #[test]
    fn test_refresh_flow() {
        let config = test_config();
        let user_id = Uuid::new_v4();

        let refresh_claims = Claims::new(user_id, "alice@example.com", TokenKind::Refresh, &config);
        let refresh_token = create_token(&refresh_claims, &config).unwrap();

        let new_access = refresh_access_token(&refresh_token, &config).unwrap();
        let validated = validate_access_token(&new_access, &config).unwrap();
        assert_eq!(validated.sub, user_id);
        assert_eq!(validated.email, "alice@example.com");
    }

    #[test]
    fn test_refresh_with_access_token_fails() {
        let config = test_config();
        let access_claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Access, &config);
        let access_token = create_token(&access_claims, &config).unwrap();

        assert!(refresh_access_token(&access_token, &config).is_err());
    }
}
