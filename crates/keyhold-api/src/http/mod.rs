//! REST endpoints.
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/{collection}` | GET | List with paging, filters, selection |
//! | `/{collection}` | POST | Create (not for `users`) |
//! | `/{collection}/:id` | GET, PATCH, DELETE | Read, patch, soft delete |
//! | `/permissions/check` | GET | Does a role hold an action on a resource |
//! | `/auth/register` | POST | Create person, user and role links |
//! | `/auth/login` | POST | Verify credentials, set session cookie |
//! | `/auth/logout` | POST | Clear session cookie |
//! | `/auth/password` | PATCH | Change password (session required) |
//! | `/auth/session` | GET | Claims of the current session |
//! | `/health`, `/ready` | GET | Liveness and storage readiness |
//!
//! Collections: `users`, `persons`, `organizations`, `roles`, `user-roles`,
//! `access-policies`, `permissions`, `apps`.

pub mod envelope;
pub mod extract;
pub mod routes;
pub mod state;

pub use envelope::{ApiError, ApiResult, Envelope, Success};
pub use routes::{
    collection_path, create_router, create_router_with_body_limit,
    create_router_with_observability, DEFAULT_BODY_LIMIT,
};
pub use state::AppState;
