//! keyhold-domain: query engine and auth core
//!
//! This crate holds the pure logic of the backend:
//! - Static schema metadata and write-body checking
//! - The list query engine (validation, filters, selection, response shapes)
//! - Password hashing, session tokens and cookies
//! - The role permission model
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               keyhold-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  schema/     - Entities, fields, relations  │
//! │  query/      - Params → condition → shape   │
//! │  auth/       - Argon2, JWT, cookies         │
//! │  permission/ - Resource/action grants       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Nothing here performs I/O; storage and HTTP live in the other crates.

pub mod auth;
pub mod error;
pub mod permission;
pub mod query;
pub mod schema;

pub use error::{DomainError, DomainResult, FieldError, ValidationErrors};
pub use schema::Entity;
