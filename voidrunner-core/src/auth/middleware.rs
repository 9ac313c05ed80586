/// Authentication middleware for Axum
///
/// Extracts the `Authorization: Bearer <token>` header, validates the
/// access token, and adds an [`AuthContext`] to the request extensions.
/// Handlers take `AuthContext` as an extractor to receive the
/// authenticated principal.
///
/// # Example
///
/// ```no_run
/// use axum::{middleware, routing::get, Router};
/// use voidrunner_core::auth::jwt::JwtConfig;
/// use voidrunner_core::auth::middleware::{jwt_auth_middleware, AuthContext};
///
/// async fn protected_handler(auth: AuthContext) -> String {
///     format!("hello, user {}", auth.user_id)
/// }
///
/// let config = JwtConfig::default_for("a-secret-key-at-least-32-bytes-long");
/// let app: Router = Router::new()
///     .route("/protected", get(protected_handler))
///     .layer(middleware::from_fn(move |req, next| {
///         jwt_auth_middleware(config.clone(), req, next)
///     }));
/// ```

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jwt::{validate_access_token, JwtConfig, JwtError};

/// Authenticated principal added to request extensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Verified user ID (the token subject)
    pub user_id: Uuid,

    /// Email carried by the token
    pub email: String,
}

/// Error type for authentication middleware
#[derive(Debug)]
pub enum AuthError {
    /// Missing authorization header
    MissingCredentials,

    /// Invalid authorization header format
    InvalidFormat(String),

    /// Token validation failed
    InvalidToken(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::MissingCredentials => {
                (StatusCode::UNAUTHORIZED, "Missing credentials").into_response()
            }
            AuthError::InvalidFormat(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AuthError::InvalidToken(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
        }
    }
}

/// JWT authentication middleware
///
/// Validates bearer access tokens and injects [`AuthContext`]. Returns 401
/// for missing, expired, wrong-kind, or otherwise invalid tokens.
pub async fn jwt_auth_middleware(
    config: JwtConfig,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?;

    let claims = validate_access_token(token, &config).map_err(|e| match e {
        JwtError::Expired => AuthError::InvalidToken("Token expired".to_string()),
        JwtError::InvalidIssuer => AuthError::InvalidToken("Invalid issuer".to_string()),
        JwtError::InvalidAudience => AuthError::InvalidToken("Invalid audience".to_string()),
        JwtError::WrongKind { .. } => {
            AuthError::InvalidToken("Access token required".to_string())
        }
        _ => AuthError::InvalidToken(format!("Invalid token: {}", e)),
    })?;

    let auth_context = AuthContext {
        user_id: claims.sub,
        email: claims.email,
    };
    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{create_token, Claims, TokenKind};
    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn test_config() -> JwtConfig {
        JwtConfig::default_for("test-secret-key-at-least-32-bytes!!")
    }

    fn app(config: JwtConfig) -> Router {
        async fn handler(auth: AuthContext) -> String {
            auth.user_id.to_string()
        }

        Router::new().route("/", get(handler)).layer(middleware::from_fn(
            move |req, next| jwt_auth_middleware(config.clone(), req, next),
        ))
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let response = app(test_config())
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        let config = test_config();
        let claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Access, &config);
        let token = create_token(&claims, &config).unwrap();

        let response = app(config)
            .oneshot(
                HttpRequest::builder()
                    .uri("/")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_token_rejected() {
        let config = test_config();
        let claims = Claims::new(Uuid::new_v4(), "a@b.c", TokenKind::Refresh, &config);
        let token = create_token(&claims, &config).unwrap();

        let response = app(config)
            .oneshot(
                HttpRequest::builder()
                    .uri("/")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
