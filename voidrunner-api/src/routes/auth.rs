/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /api/v1/auth/register` - Register a new user
/// - `POST /api/v1/auth/login` - Login and receive tokens
/// - `POST /api/v1/auth/refresh` - Exchange a refresh token for a new
///   access token

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use voidrunner_core::auth::{jwt, password};
use voidrunner_core::models::user::{CreateUser, User};

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
};

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Email address
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Password (validated for strength separately)
    pub password: String,

    /// Display name
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Email address
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Password
    pub password: String,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// Refresh token
    pub refresh_token: String,
}

/// Token pair response
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// User ID
    pub user_id: Uuid,

    /// Account email
    pub email: String,

    /// Short-lived access token
    pub access_token: String,

    /// Long-lived refresh token
    pub refresh_token: String,
}

/// Refresh response
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// New access token
    pub access_token: String,
}

fn issue_token_pair(state: &AppState, user: &User) -> ApiResult<TokenResponse> {
    let access_claims = jwt::Claims::new(
        user.id,
        &user.email,
        jwt::TokenKind::Access,
        &state.config.jwt,
    );
    let refresh_claims = jwt::Claims::new(
        user.id,
        &user.email,
        jwt::TokenKind::Refresh,
        &state.config.jwt,
    );

    Ok(TokenResponse {
        user_id: user.id,
        email: user.email.clone(),
        access_token: jwt::create_token(&access_claims, &state.config.jwt)?,
        refresh_token: jwt::create_token(&refresh_claims, &state.config.jwt)?,
    })
}

/// Registers a new user
///
/// # Errors
///
/// - `400`: validation failure (email format, name length, password policy)
/// - `409`: email already registered
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<TokenResponse>> {
    request.validate()?;

    if let Err(message) = password::validate_password_strength(&request.password) {
        return Err(ApiError::Validation(vec![ValidationErrorDetail {
            field: "password".to_string(),
            value: None,
            tag: Some("strength".to_string()),
            message,
        }]));
    }

    let password_hash = password::hash_password(&request.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            email: request.email,
            password_hash,
            name: request.name,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "User registered");
    Ok(Json(issue_token_pair(&state, &user)?))
}

/// Authenticates a user and issues a token pair
///
/// # Errors
///
/// - `401`: unknown email or wrong password (indistinguishable on purpose)
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    request.validate()?;

    let user = User::find_by_email(&state.db, &request.email)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid email or password".to_string()))?;

    let verified = password::verify_password(&request.password, &user.password_hash)?;
    if !verified {
        return Err(ApiError::Unauthorized(
            "invalid email or password".to_string(),
        ));
    }

    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(issue_token_pair(&state, &user)?))
}

/// Exchanges a valid refresh token for a new access token
///
/// # Errors
///
/// - `401`: invalid, expired, or wrong-kind token
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let access_token = jwt::refresh_access_token(&request.refresh_token, &state.config.jwt)?;

    Ok(Json(RefreshResponse { access_token }))
}
