//! Maps the core's closed error taxonomy (§7) onto the HTTP surface's
//! standard error shape: `{error: {code, message}}` with the status
//! mapping table from §6.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relayhive_schema::EngineError;
use serde::Serialize;

pub struct ApiError(StatusCode, String);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(StatusCode::UNAUTHORIZED, message.into())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::DuplicateEvent => Self(StatusCode::OK, "duplicate event".to_string()),
            EngineError::NotFound(msg) => Self(StatusCode::NOT_FOUND, msg),
            EngineError::InvalidInput(msg) => Self(StatusCode::BAD_REQUEST, msg),
            EngineError::Unauthorized(msg) => Self(StatusCode::UNAUTHORIZED, msg),
            EngineError::Conflict(msg) => Self(StatusCode::CONFLICT, msg),
            EngineError::Internal(err) => Self(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match self.0 {
            StatusCode::BAD_REQUEST => "validation_error",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::CONFLICT => "conflict",
            _ => "internal_error",
        };
        let body = ErrorBody {
            error: ErrorDetail { code, message: self.1 },
        };
        (self.0, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
