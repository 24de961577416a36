//! Response envelope and API errors.
//!
//! Every JSON response, success or failure, has the shape
//!
//! ```json
//! {"status":"success","message":"Roles retrieved successfully","data":{...},"timestamp":"2026-01-15T10:30:00.000Z"}
//! {"status":"error","message":"Validation failed","code":400,"errors":[{"field":"page","message":"..."}],"timestamp":"..."}
//! ```
//!
//! `code` mirrors the HTTP status and appears on errors only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use keyhold_domain::query::coerce::format_timestamp;
use keyhold_domain::FieldError;
use keyhold_server::ServiceError;
use keyhold_storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

/// The JSON body of every response.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub status: EnvelopeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    pub timestamp: String,
}

impl Envelope {
    pub fn success(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            message: message.into(),
            data,
            code: None,
            errors: None,
            timestamp: format_timestamp(Utc::now()),
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>, errors: Option<Vec<FieldError>>) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            message: message.into(),
            data: None,
            code: Some(status.as_u16()),
            errors,
            timestamp: format_timestamp(Utc::now()),
        }
    }
}

/// A successful response: status code plus envelope.
pub struct Success {
    status: StatusCode,
    envelope: Envelope,
}

impl Success {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::with_status(StatusCode::OK, message, data)
    }

    pub fn created(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::with_status(StatusCode::CREATED, message, data)
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status,
            envelope: Envelope::success(message, data),
        }
    }
}

impl IntoResponse for Success {
    fn into_response(self) -> Response {
        (self.status, Json(self.envelope)).into_response()
    }
}

/// Message returned in place of internal failure details.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Message returned when the storage backend cannot be reached.
pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable";

/// An error response.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub errors: Option<Vec<FieldError>>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 400 carrying one entry per offending field.
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Validation failed".to_string(),
            errors: Some(errors),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
    }

    pub fn unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = Envelope::error(self.status, self.message, self.errors);
        (self.status, Json(envelope)).into_response()
    }
}

/// Storage failures that mean the backend is unreachable rather than broken.
fn is_unavailable(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::ConnectionError { .. }
            | StorageError::QueryTimeout { .. }
            | StorageError::HealthCheckFailed { .. }
    )
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(errors) => ApiError::validation(errors.errors().to_vec()),
            ServiceError::Unauthorized { message } => ApiError::unauthorized(message),
            ServiceError::NotFound { entity, id } => {
                ApiError::not_found(format!("{} with id '{id}' not found", entity.name()))
            }
            ServiceError::Conflict { message } => ApiError::new(StatusCode::CONFLICT, message),
            ServiceError::Storage(e) if is_unavailable(&e) => {
                warn!(error = %e, "storage unavailable");
                ApiError::unavailable()
            }
            ServiceError::Storage(e) => {
                error!(error = %e, "storage operation failed");
                ApiError::internal()
            }
            ServiceError::Internal { message } => {
                error!(error = %message, "internal service error");
                ApiError::internal()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
