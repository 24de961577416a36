//! keyhold server binary.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! keyhold --config config.yaml
//!
//! # With environment variables only
//! KEYHOLD_STORAGE__BACKEND=memory keyhold
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use keyhold_api::http::{create_router_with_body_limit, create_router_with_observability, AppState};
use keyhold_api::middleware::{self, RequestMetrics};
use keyhold_api::observability::{init_logging, init_metrics, LoggingConfig};
use keyhold_server::ServerConfig;
use keyhold_storage::{DataStore, MemoryDataStore, PostgresConfig, PostgresDataStore};

/// keyhold - user, role and permission backend
#[derive(Parser, Debug)]
#[command(name = "keyhold")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::from_env()?,
    };

    init_logging(LoggingConfig::from_settings(&config.logging));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.server.environment,
        "starting keyhold"
    );
    if config.auth.jwt_secret.is_none() {
        warn!("auth.jwt_secret is not set; using the development signing secret");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    match config.storage.backend.as_str() {
        "memory" => {
            info!("using in-memory storage backend");
            run(Arc::new(MemoryDataStore::new()), addr, &config).await
        }
        "postgres" => {
            let database_url = config
                .storage
                .database_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.database_url is required for postgres"))?;

            info!("connecting to PostgreSQL");
            let pg_config = PostgresConfig {
                database_url,
                max_connections: config.storage.pool_size,
                min_connections: 1,
                connect_timeout_secs: config.storage.connection_timeout_secs,
                query_timeout_secs: config.storage.query_timeout_secs,
                ..Default::default()
            };
            let storage = PostgresDataStore::from_config(&pg_config).await?;

            info!("running database migrations");
            storage.run_migrations().await?;
            info!("database migrations complete");

            run(Arc::new(storage), addr, &config).await
        }
        other => {
            error!(backend = %other, "unknown storage backend");
            anyhow::bail!("unknown storage backend: {other}");
        }
    }
}

async fn run<S: DataStore>(storage: Arc<S>, addr: SocketAddr, config: &ServerConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(storage, config)?;

    let router = if config.metrics.enabled {
        let metrics_state = init_metrics()?;
        info!(path = %config.metrics.path, "metrics enabled");
        create_router_with_observability(
            state,
            metrics_state,
            &config.metrics.path,
            config.server.body_limit_bytes,
        )
    } else {
        create_router_with_body_limit(state, config.server.body_limit_bytes)
    };

    let router = middleware::apply(
        router,
        Arc::new(RequestMetrics::new()),
        Duration::from_secs(config.server.request_timeout_secs),
    );

    run_http_server(router, addr).await
}

async fn run_http_server(router: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and that signal is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = Args::try_parse_from(["keyhold"]).unwrap();
        assert!(args.config.is_none());

        let args = Args::try_parse_from(["keyhold", "--config", "config.yaml"]).unwrap();
        assert_eq!(args.config.as_deref(), Some("config.yaml"));

        let args = Args::try_parse_from(["keyhold", "-c", "test.yaml"]).unwrap();
        assert_eq!(args.config.as_deref(), Some("test.yaml"));
    }
}
