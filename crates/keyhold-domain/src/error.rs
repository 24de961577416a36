//! Domain error types.

use serde::Serialize;
use thiserror::Error;

/// A single field-tagged validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// One or more validation failures collected from a single input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", summarize(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// True when some error is tagged with `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(value)` when no error was collected.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

/// Domain-level failures outside query validation.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// The password hasher rejected its input or parameters.
    #[error("password hashing failed: {message}")]
    PasswordHash { message: String },

    /// A session token could not be signed.
    #[error("token signing failed: {message}")]
    TokenSigning { message: String },

    /// A session token failed verification.
    #[error("invalid session token: {reason}")]
    InvalidToken { reason: String },

    /// A value is not one of the enum's declared variants.
    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_display_lists_fields() {
        let mut errors = ValidationErrors::new();
        errors.push("page", "must be a positive integer");
        errors.push("order", "must be 'asc' or 'desc'");
        let text = errors.to_string();
        assert!(text.contains("page: must be a positive integer"));
        assert!(text.contains("order: must be 'asc' or 'desc'"));
        assert!(errors.has_field("order"));
        assert!(!errors.has_field("limit"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(ValidationErrors::new().into_result(3), Ok(3));
        assert!(ValidationErrors::single("limit", "bad").into_result(3).is_err());
    }
}
