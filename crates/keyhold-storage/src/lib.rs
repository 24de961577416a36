//! keyhold-storage: document storage layer
//!
//! This crate stores entity documents and evaluates compiled conditions:
//! - DataStore trait for reads, counts and atomic writes
//! - In-memory implementation for tests and local runs
//! - PostgreSQL implementation over a single JSONB documents table
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              keyhold-storage                 │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - DataStore trait definition   │
//! │  document.rs - Ids, timestamps, soft delete │
//! │  memory.rs   - In-memory implementation     │
//! │  sql.rs      - Condition → SQL compiler     │
//! │  postgres.rs - PostgreSQL implementation    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
mod sql;
pub mod traits;

// Re-export commonly used types
pub use error::{HealthStatus, PoolStats, StorageError, StorageResult};
pub use memory::MemoryDataStore;
pub use postgres::{PostgresConfig, PostgresDataStore};
pub use traits::{DataStore, Document, FindQuery, WriteOp};
