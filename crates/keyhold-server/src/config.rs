//! Configuration management for the keyhold server.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use keyhold_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;

use keyhold_domain::auth::{CookiePolicy, HashParams};
use keyhold_domain::query::QueryDefaults;

/// Secret used to sign tokens outside production when none is configured.
const DEVELOPMENT_JWT_SECRET: &str = "keyhold-development-secret-change-me";

/// Minimum accepted length of a production signing secret, in bytes.
const MIN_JWT_SECRET_LEN: usize = 32;

/// Server configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,

    /// Session and password settings
    #[serde(default)]
    pub auth: AuthSettings,

    /// List query limits
    #[serde(default)]
    pub query: QuerySettings,
}

/// Server network settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// "development" or "production"
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl ServerSettings {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            request_timeout_secs: default_request_timeout(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_body_limit() -> usize {
    1024 * 1024
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type: "memory" or "postgres"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database connection URL (required if backend is "postgres")
    pub database_url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    30
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// Enable metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Session token, cookie and password hashing settings.
///
/// `jwt_secret` is never serialized; set it with `KEYHOLD_AUTH__JWT_SECRET`.
#[derive(Debug, Deserialize, Serialize)]
pub struct AuthSettings {
    /// HMAC secret for session tokens. Required in production.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<SecretString>,

    /// Name of the session cookie
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Argon2 cost parameters
    #[serde(default)]
    pub hashing: HashParams,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            cookie_name: default_cookie_name(),
            hashing: HashParams::default(),
        }
    }
}

fn default_cookie_name() -> String {
    keyhold_domain::auth::cookie::DEFAULT_COOKIE_NAME.to_string()
}

/// List query limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuerySettings {
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Larger `limit` values are clamped to this
    #[serde(default = "default_max_limit")]
    pub max_limit: Option<u32>,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_limit() -> u32 {
    keyhold_domain::query::params::DEFAULT_LIMIT
}

fn default_max_limit() -> Option<u32> {
    Some(100)
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `KEYHOLD_` and use `__` as separator.
    /// For example:
    /// - `KEYHOLD_SERVER__PORT=9090` overrides `server.port`
    /// - `KEYHOLD_STORAGE__DATABASE_URL=...` overrides `storage.database_url`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            // KEYHOLD_SERVER__PORT -> server.port
            .add_source(
                Environment::with_prefix("KEYHOLD")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(
                Environment::with_prefix("KEYHOLD")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.port == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        let valid_environments = ["development", "production"];
        if !valid_environments.contains(&self.server.environment.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "server.environment must be one of: {:?}, got: {}",
                    valid_environments, self.server.environment
                ),
            });
        }

        let valid_backends = ["memory", "postgres"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        if self.storage.backend == "postgres"
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid {
                message: "storage.database_url is required when backend is 'postgres'".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        if self.server.is_production() {
            let secret_len = self
                .auth
                .jwt_secret
                .as_ref()
                .map_or(0, |s| s.expose_secret().len());
            if secret_len < MIN_JWT_SECRET_LEN {
                return Err(ConfigLoadError::Invalid {
                    message: format!(
                        "auth.jwt_secret must be at least {MIN_JWT_SECRET_LEN} bytes in production"
                    ),
                });
            }
        }

        if self.query.default_limit == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "query.default_limit must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// The signing secret, falling back to a fixed development secret.
    pub fn jwt_secret(&self) -> SecretString {
        match &self.auth.jwt_secret {
            Some(secret) => SecretString::from(secret.expose_secret().to_string()),
            None => SecretString::from(DEVELOPMENT_JWT_SECRET.to_string()),
        }
    }

    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy::new(self.auth.cookie_name.clone(), self.server.is_production())
    }

    pub fn query_defaults(&self) -> QueryDefaults {
        QueryDefaults {
            limit: self.query.default_limit,
            max_limit: self.query.max_limit,
            ..QueryDefaults::default()
        }
    }
}
