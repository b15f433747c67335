//! API error types and JSON error response formatting.
//!
//! Engine errors map onto HTTP status codes here, so handlers can use `?`
//! on service calls directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use reveille_engine::EngineError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "not_found", "conflict").
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - malformed query parameters.
    BadRequest(String),
    /// 404 - unknown item.
    NotFound(String),
    /// 409 - the item is not in a state that allows the command.
    Conflict(String),
    /// 422 - well-formed request that fails validation or policy.
    UnprocessableEntity(String, Option<serde_json::Value>),
    /// 502 - the media device or an entity backend failed.
    BadGateway(String),
    /// 503 - persistence is unavailable; retry later.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::UnprocessableEntity(msg, details) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable_entity",
                msg,
                details,
            ),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg, None),
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                None,
            ),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::NotFound(_) => ApiError::NotFound(message),
            EngineError::InvalidState(_) => ApiError::Conflict(message),
            EngineError::PolicyViolation(entity) => {
                ApiError::UnprocessableEntity(message, Some(json!({ "entity": entity })))
            }
            EngineError::Pattern(_) | EngineError::Validation(_) => {
                ApiError::UnprocessableEntity(message, None)
            }
            EngineError::DeviceCommand(_) => ApiError::BadGateway(message),
            EngineError::Persistence(_) => ApiError::ServiceUnavailable(message),
        }
    }
}
