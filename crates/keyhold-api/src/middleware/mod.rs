//! Tower middleware for the HTTP surface.
//!
//! - Request ID propagation (`x-request-id`)
//! - Request logging
//! - Request metrics
//! - CORS

mod logging;
mod metrics;
mod request_id;

pub use logging::RequestLoggingLayer;
pub use metrics::{MetricsLayer, RequestMetrics};
pub use request_id::{RequestIdLayer, REQUEST_ID_HEADER};

use std::sync::Arc;
use std::time::Duration;

use axum::{error_handling::HandleErrorLayer, http::StatusCode, Router};
use tower::{timeout::error::Elapsed, BoxError, ServiceBuilder};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::http::ApiError;

/// Permissive CORS for local development.
///
/// Browsers refuse credentialed requests against a wildcard origin, so
/// cookie sessions across origins need a fronting proxy.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}

/// Wraps `router` in the full middleware stack. Outermost first: CORS,
/// request id, metrics, logging, timeout.
pub fn apply(router: Router, metrics: Arc<RequestMetrics>, timeout: Duration) -> Router {
    router
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(timeout),
        )
        .layer(RequestLoggingLayer::new())
        .layer(MetricsLayer::new(metrics))
        .layer(RequestIdLayer::new())
        .layer(cors_layer())
}

async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<Elapsed>() {
        ApiError::new(StatusCode::REQUEST_TIMEOUT, "Request timed out")
    } else {
        error!(error = %err, "unhandled middleware error");
        ApiError::internal()
    }
}
