//! Storage error types.

use thiserror::Error;

use keyhold_domain::Entity;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No live document with this id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    /// A live document already holds these unique key values.
    #[error("{entity} already exists with the same {fields}")]
    UniqueViolation { entity: Entity, fields: String },

    /// A document with this id already exists.
    #[error("{entity} id already in use: {id}")]
    DuplicateId { entity: Entity, id: String },

    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Query exceeded its timeout.
    #[error("query timeout: {operation} exceeded {timeout:?}")]
    QueryTimeout {
        operation: String,
        timeout: std::time::Duration,
    },

    /// Transaction error.
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Health check failed.
    #[error("health check failed: {message}")]
    HealthCheckFailed { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Connection pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active_connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
}

/// Result of a storage health check.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency: std::time::Duration,
    pub pool_stats: Option<PoolStats>,
    pub message: Option<String>,
}
