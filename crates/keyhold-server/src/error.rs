//! Service-layer error types.

use thiserror::Error;

use keyhold_domain::{DomainError, Entity, ValidationErrors};
use keyhold_storage::StorageError;

/// Message returned for every failed login, whichever factor failed.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Errors returned by the service handlers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Credentials or session rejected.
    #[error("{message}")]
    Unauthorized { message: String },

    /// No live document with this id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    /// A unique key is already taken.
    #[error("{message}")]
    Conflict { message: String },

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Unexpected failure inside the service.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn invalid_credentials() -> Self {
        ServiceError::Unauthorized {
            message: INVALID_CREDENTIALS.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation(ValidationErrors::single(field, message))
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => ServiceError::NotFound { entity, id },
            StorageError::UniqueViolation { entity, fields } => ServiceError::Conflict {
                message: format!("{} with the same {fields} already exists", entity.name()),
            },
            StorageError::DuplicateId { entity, .. } => ServiceError::Conflict {
                message: format!("{} id already in use", entity.name()),
            },
            other => ServiceError::Storage(other),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(errors) => ServiceError::Validation(errors),
            DomainError::InvalidToken { .. } => ServiceError::Unauthorized {
                message: "Invalid or expired session".to_string(),
            },
            DomainError::UnknownVariant { kind, value } => {
                ServiceError::validation(kind, format!("unknown {kind} value: {value}"))
            }
            DomainError::PasswordHash { message } | DomainError::TokenSigning { message } => {
                ServiceError::Internal { message }
            }
        }
    }
}
