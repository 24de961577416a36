//! keyhold-api: HTTP layer
//!
//! Axum routes over the keyhold handlers, the JSON response envelope,
//! session-cookie transport, tower middleware and observability setup.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 keyhold-api                  │
//! ├─────────────────────────────────────────────┤
//! │  http/          - Routes, envelope, errors  │
//! │  middleware/    - Request id, logging,      │
//! │                   metrics, CORS             │
//! │  observability/ - Subscriber, Prometheus    │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │  keyhold-server (handlers, config)           │
//! └─────────────────────────────────────────────┘
//! ```

pub mod http;
pub mod middleware;
pub mod observability;
