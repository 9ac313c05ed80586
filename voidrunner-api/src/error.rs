/// Error handling for the API server
///
/// One unified error type that maps the core error taxonomy to HTTP
/// responses. Handlers return `ApiResult<T>`; conversion into the wire
/// envelope happens in one place.
///
/// # Envelope
///
/// ```json
/// {
///   "error": "conflict",
///   "details": "cannot execute task in status: running",
///   "validation_errors": [
///     {"field": "priority", "value": "11", "tag": "range", "message": "..."}
///   ]
/// }
/// ```
///
/// Internal errors are logged server-side with correlation fields and
/// surface only a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use voidrunner_core::auth::access::AccessError;
use voidrunner_core::auth::jwt::JwtError;
use voidrunner_core::auth::password::PasswordError;
use voidrunner_core::coordinator::CoordinatorError;
use voidrunner_core::error::StoreError;
use voidrunner_core::queue::QueueError;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409): state machine rejection, duplicate email
    Conflict(String),

    /// Payload too large (413): oversized script content
    PayloadTooLarge(String),

    /// Validation failure (400 with the validation envelope)
    Validation(Vec<ValidationErrorDetail>),

    /// Internal server error (500)
    Internal(String),

    /// Service unavailable (503): queue or database down
    ServiceUnavailable(String),
}

/// One field-level validation failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Offending value, when safe to echo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Rule tag (e.g. "length", "range", "email")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Human-readable message
    pub message: String,
}

/// Error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error class (e.g. "not_found", "conflict")
    pub error: String,

    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Field-level validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<ValidationErrorDetail>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            ApiError::Validation(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, details, validation_errors) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg), None),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", Some(msg), None)
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg), None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg), None),
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                Some(msg),
                None,
            ),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "validation_failed",
                None,
                Some(errors),
            ),
            ApiError::Internal(msg) => {
                // Log the detail, never expose it
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                    None,
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                tracing::error!(error = %msg, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    Some("A backing service is unavailable".to_string()),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            details,
            validation_errors,
        });

        (status, body).into_response()
    }
}

/// Convert store errors to API errors
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::AlreadyExists(what) => {
                ApiError::Conflict(format!("{} already exists", what))
            }
            StoreError::ForeignKeyViolation(msg) => ApiError::Conflict(msg),
            StoreError::CheckViolation(msg) => ApiError::BadRequest(msg),
            StoreError::InvalidCursor => ApiError::BadRequest("invalid pagination cursor".to_string()),
            StoreError::InvalidTransition { from, to } => {
                ApiError::Conflict(format!("invalid status transition: {} -> {}", from, to))
            }
            StoreError::Database(e) => ApiError::Internal(format!("database error: {}", e)),
        }
    }
}

/// Convert access gate errors to API errors
impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            AccessError::Forbidden => {
                ApiError::Forbidden("not authorized to access this resource".to_string())
            }
            AccessError::Store(e) => e.into(),
        }
    }
}

/// Convert coordinator errors to API errors
impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            CoordinatorError::Forbidden => {
                ApiError::Forbidden("not authorized to access this resource".to_string())
            }
            CoordinatorError::Conflict(msg) => ApiError::Conflict(msg),
            CoordinatorError::Store(e) => e.into(),
            CoordinatorError::Queue(e) => e.into(),
        }
    }
}

/// Convert queue errors to API errors
impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Duplicate(id) => {
                ApiError::Conflict(format!("message already queued: {}", id))
            }
            QueueError::MessageNotFound(id) => {
                ApiError::NotFound(format!("queue message not found: {}", id))
            }
            QueueError::Redis(e) => ApiError::ServiceUnavailable(format!("queue error: {}", e)),
            other => ApiError::Internal(format!("queue error: {}", other)),
        }
    }
}

/// Convert JWT errors to API errors
impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("token expired".to_string()),
            JwtError::InvalidIssuer => ApiError::Unauthorized("invalid token issuer".to_string()),
            JwtError::InvalidAudience => {
                ApiError::Unauthorized("invalid token audience".to_string())
            }
            JwtError::WrongKind { expected } => {
                ApiError::Unauthorized(format!("{} token required", expected))
            }
            other => ApiError::Unauthorized(format!("invalid token: {}", other)),
        }
    }
}

/// Convert password errors to API errors
impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::Internal(format!("password operation failed: {}", err))
    }
}

/// Convert validator derive output to the validation envelope
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, field_errors)| {
                field_errors.iter().map(move |e| ValidationErrorDetail {
                    field: field.to_string(),
                    value: None,
                    tag: Some(e.code.to_string()),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field)),
                })
            })
            .collect();

        ApiError::Validation(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");

        let err = ApiError::NotFound("task not found".to_string());
        assert_eq!(err.to_string(), "Not found: task not found");
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            ApiError::from(StoreError::NotFound("task")),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(StoreError::AlreadyExists("user")),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(StoreError::InvalidCursor),
            ApiError::BadRequest(_)
        ));
    }

    #[test]
    fn test_access_error_mapping_distinguishes_404_and_403() {
        assert!(matches!(
            ApiError::from(AccessError::NotFound("task")),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(AccessError::Forbidden),
            ApiError::Forbidden(_)
        ));
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = ErrorResponse {
            error: "validation_failed".to_string(),
            details: None,
            validation_errors: Some(vec![ValidationErrorDetail {
                field: "priority".to_string(),
                value: Some("11".to_string()),
                tag: Some("range".to_string()),
                message: "priority must be between 0 and 10".to_string(),
            }]),
        };

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"validation_errors\""));
        assert!(!json.contains("\"details\""));
    }
}
