//! Request handlers, one per concern. Each is generic over the storage
//! backend and holds it behind an `Arc`.

pub mod auth;
pub mod entity;
mod include;
pub mod list;
pub mod permission;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthHandler, LoginOutcome, LoginRequest, RegisterRequest, UpdatePasswordRequest};
pub use entity::EntityHandler;
pub use list::ListHandler;
pub use permission::{Created, PermissionHandler};
