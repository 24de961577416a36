//! Prometheus exposition.
//!
//! Metrics recorded across the workspace:
//!
//! - `keyhold_http_requests_total`, `keyhold_http_request_duration_seconds`
//!   (request middleware)
//! - `keyhold_auth_logins_total` (login route, labelled by outcome)
//! - `keyhold_storage_query_duration_seconds`,
//!   `keyhold_storage_query_timeout_total`,
//!   `keyhold_storage_health_check_duration_seconds` (PostgreSQL backend)

use std::sync::Arc;

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Handle used by `/metrics` to render the registry.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the global Prometheus recorder. Only one recorder may exist
/// per process.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    register_default_metrics();

    Ok(MetricsState::new(handle))
}

fn register_default_metrics() {
    metrics::describe_counter!("keyhold_http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "keyhold_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    metrics::describe_counter!(
        "keyhold_auth_logins_total",
        "Login attempts by outcome (success, rejected, error)"
    );
    metrics::describe_histogram!(
        "keyhold_storage_query_duration_seconds",
        "Storage query duration in seconds by operation and status"
    );
    metrics::describe_counter!(
        "keyhold_storage_query_timeout_total",
        "Storage queries that exceeded the configured timeout"
    );
    metrics::describe_histogram!(
        "keyhold_storage_health_check_duration_seconds",
        "Storage health check duration in seconds"
    );
}

/// Counts one login attempt.
pub fn record_login(outcome: &'static str) {
    metrics::counter!("keyhold_auth_logins_total", "outcome" => outcome).increment(1);
}

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_from_unattached_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let state = MetricsState::new(recorder.handle());
        let cloned = state.clone();
        assert!(cloned.render().is_empty());
    }

    #[test]
    fn test_record_login_without_recorder_is_a_noop() {
        record_login("success");
        record_login("rejected");
    }
}
