//! keyhold-server: configuration and business logic
//!
//! This crate contains the service layer including:
//! - List handler running the query engine against storage
//! - Entity handler for get/create/update/soft delete
//! - Auth handler for register, login and password changes
//! - Permission handler for idempotent grants and checks
//! - Configuration management
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               keyhold-server                 │
//! ├─────────────────────────────────────────────┤
//! │  config.rs   - Configuration management     │
//! │  error.rs    - Service errors               │
//! │  handlers/   - Request handlers             │
//! │    list.rs       - List pipeline            │
//! │    entity.rs     - Single-document CRUD     │
//! │    auth.rs       - Credentials and sessions │
//! │    permission.rs - Grants and checks        │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;

// Re-exports for convenience
pub use config::{ConfigLoadError, ServerConfig};
pub use error::{ServiceError, ServiceResult};
