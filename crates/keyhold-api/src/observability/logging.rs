//! Structured logging setup.
//!
//! JSON output is meant for production log shippers; the pretty formatter is
//! for local development. `RUST_LOG` overrides the configured level.
//!
//! ```json
//! {"timestamp":"2026-01-15T10:30:00.000Z","level":"INFO","target":"keyhold::http","fields":{"message":"request completed","status":200}}
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use keyhold_server::config::LoggingSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub json_format: bool,
    /// Level used when `RUST_LOG` is unset.
    pub default_level: Level,
    /// Emit span enter/exit events.
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the subscriber settings from the `logging` config section.
    /// An unrecognised level falls back to INFO; config validation rejects
    /// those before this runs.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            json_format: settings.json,
            default_level: Level::from_str(&settings.level).unwrap_or(Level::INFO),
            include_spans: false,
        }
    }

    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let span_events = if config.include_spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_target(true),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// JSON subscriber writing to `writer`, for capturing log output in tests.
pub fn create_json_layer<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn output(&self) -> String {
            String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_from_settings() {
        let config = LoggingConfig::from_settings(&LoggingSettings {
            level: "debug".to_string(),
            json: true,
        });
        assert!(config.json_format);
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(!config.include_spans);
        assert!(config.with_spans().include_spans);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let config = LoggingConfig::from_settings(&LoggingSettings {
            level: "chatty".to_string(),
            json: false,
        });
        assert_eq!(config.default_level, Level::INFO);
    }

    #[test]
    fn test_json_lines_carry_level_and_target() {
        use tracing::info;

        let writer = CaptureWriter::default();
        let subscriber = create_json_layer(writer.clone());
        tracing::subscriber::with_default(subscriber, || {
            info!(target: "keyhold::http", status = 200, "request completed");
        });

        let output = writer.output();
        assert!(!output.is_empty());
        for line in output.lines().filter(|l| !l.is_empty()) {
            let json: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(json["level"], "INFO");
            assert_eq!(json["target"], "keyhold::http");
            assert_eq!(json["fields"]["status"], 200);
        }
    }
}
