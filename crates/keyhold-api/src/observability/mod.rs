//! Logging and metrics setup for the keyhold binary.

mod logging;
mod metrics;

pub use logging::{create_json_layer, init_logging, LoggingConfig};
pub use metrics::{init_metrics, metrics_handler, record_login, MetricsError, MetricsState};
