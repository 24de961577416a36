//! PostgreSQL storage implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, instrument};

use keyhold_domain::Entity;

use crate::document::{apply_patch, mark_deleted, stamp_new};
use crate::error::{HealthStatus, PoolStats, StorageError, StorageResult};
use crate::sql::{count_query, select_query, unique_index_ddl, unique_index_name};
use crate::traits::{DataStore, Document, FindQuery, WriteOp};

/// Default health check timeout in seconds.
/// Uses a shorter timeout than regular queries since health checks should be fast.
const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Default query timeout in seconds.
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// PostgreSQL unique_violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Maximum time to wait for a query before failing with
    /// `StorageError::QueryTimeout`.
    pub query_timeout_secs: u64,
    /// Timeout for health checks in seconds.
    pub health_check_timeout_secs: u64,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("health_check_timeout_secs", &self.health_check_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/keyhold".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            health_check_timeout_secs: DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
        }
    }
}

/// PostgreSQL implementation of DataStore.
///
/// Every entity shares one `documents` table keyed by `(entity, id)` with
/// the document body in a JSONB column. Unique keys are partial expression
/// indexes over live rows.
pub struct PostgresDataStore {
    pool: PgPool,
    query_timeout: std::time::Duration,
    health_check_timeout: std::time::Duration,
}

impl PostgresDataStore {
    /// Creates a new PostgreSQL data store from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: std::time::Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            health_check_timeout: std::time::Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
        }
    }

    /// Creates a new PostgreSQL data store with the given configuration.
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self {
            pool,
            query_timeout: std::time::Duration::from_secs(config.query_timeout_secs),
            health_check_timeout: std::time::Duration::from_secs(config.health_check_timeout_secs),
        })
    }

    /// Creates a new PostgreSQL data store from a database URL.
    pub async fn from_url(database_url: &str) -> StorageResult<Self> {
        let config = PostgresConfig {
            database_url: database_url.to_string(),
            ..Default::default()
        };
        Self::from_config(&config).await
    }

    /// Wraps an async operation with a timeout and records metrics.
    ///
    /// # Metrics
    /// - `keyhold_storage_query_duration_seconds` - Histogram of query durations
    /// - `keyhold_storage_query_timeout_total` - Counter of timeout events
    async fn execute_with_timeout_and_metrics<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(self.query_timeout, future).await;
        let duration = start.elapsed().as_secs_f64();

        let (status, final_result) = match result {
            Ok(Ok(value)) => ("success", Ok(value)),
            Ok(Err(e)) => ("error", Err(e)),
            Err(_elapsed) => (
                "timeout",
                Err(StorageError::QueryTimeout {
                    operation: operation.to_string(),
                    timeout: self.query_timeout,
                }),
            ),
        };

        metrics::histogram!(
            "keyhold_storage_query_duration_seconds",
            "operation" => operation.to_string(),
            "backend" => "postgres",
            "status" => status.to_string()
        )
        .record(duration);

        if status == "timeout" {
            metrics::counter!(
                "keyhold_storage_query_timeout_total",
                "operation" => operation.to_string(),
                "backend" => "postgres"
            )
            .increment(1);
        }

        final_result
    }

    /// Creates the documents table and unique indexes if missing.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                entity VARCHAR(64) NOT NULL,
                id VARCHAR(64) NOT NULL,
                data JSONB NOT NULL,
                PRIMARY KEY (entity, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError {
            message: format!("Failed to create documents table: {e}"),
        })?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_live ON documents (entity) \
             WHERE (data ->> 'deletedAt') IS NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError {
            message: format!("Failed to create live-documents index: {e}"),
        })?;

        for entity in Entity::ALL {
            for ddl in unique_index_ddl(entity) {
                sqlx::query(&ddl)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::QueryError {
                        message: format!("Failed to create unique index for {entity}: {e}"),
                    })?;
            }
        }

        debug!("Database migrations completed");
        Ok(())
    }

    async fn locked_live(
        tx: &mut Transaction<'_, Postgres>,
        entity: Entity,
        id: &str,
    ) -> StorageResult<Document> {
        let row = sqlx::query(
            "SELECT data FROM documents WHERE entity = $1 AND id = $2 \
             AND (data ->> 'deletedAt') IS NULL FOR UPDATE",
        )
        .bind(entity.name())
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_write_error(entity, e))?;

        match row {
            Some(row) => decode_document(&row),
            None => Err(StorageError::NotFound {
                entity,
                id: id.to_string(),
            }),
        }
    }

    async fn apply(tx: &mut Transaction<'_, Postgres>, op: WriteOp) -> StorageResult<Document> {
        let now = chrono::Utc::now();
        match op {
            WriteOp::Insert { entity, id, data } => {
                let doc = stamp_new(&id, data, now);
                let inserted = sqlx::query(
                    "INSERT INTO documents (entity, id, data) VALUES ($1, $2, $3) \
                     ON CONFLICT (entity, id) DO NOTHING",
                )
                .bind(entity.name())
                .bind(&id)
                .bind(Json(&doc))
                .execute(&mut **tx)
                .await
                .map_err(|e| map_write_error(entity, e))?;

                if inserted.rows_affected() == 0 {
                    return Err(StorageError::DuplicateId { entity, id });
                }
                Ok(doc)
            }
            WriteOp::Update { entity, id, patch } => {
                let current = Self::locked_live(tx, entity, &id).await?;
                let doc = apply_patch(&current, patch, now);
                Self::replace(tx, entity, &id, &doc).await?;
                Ok(doc)
            }
            WriteOp::SoftDelete { entity, id } => {
                let current = Self::locked_live(tx, entity, &id).await?;
                let doc = mark_deleted(&current, now);
                Self::replace(tx, entity, &id, &doc).await?;
                Ok(doc)
            }
        }
    }

    async fn replace(
        tx: &mut Transaction<'_, Postgres>,
        entity: Entity,
        id: &str,
        doc: &Document,
    ) -> StorageResult<()> {
        sqlx::query("UPDATE documents SET data = $3 WHERE entity = $1 AND id = $2")
            .bind(entity.name())
            .bind(id)
            .bind(Json(doc))
            .execute(&mut **tx)
            .await
            .map_err(|e| map_write_error(entity, e))?;
        Ok(())
    }
}

fn decode_document(row: &sqlx::postgres::PgRow) -> StorageResult<Document> {
    row.try_get::<Json<Document>, _>("data")
        .map(|Json(doc)| doc)
        .map_err(|e| StorageError::SerializationError {
            message: format!("Failed to decode document: {e}"),
        })
}

/// Maps a write failure, turning unique index violations into
/// `StorageError::UniqueViolation` with the offending key.
fn map_write_error(entity: Entity, error: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let constraint = db.constraint().unwrap_or_default();
            let fields = entity
                .unique_keys()
                .iter()
                .find(|fields| unique_index_name(entity, fields) == constraint)
                .map(|fields| fields.join(", "))
                .unwrap_or_else(|| constraint.to_string());
            return StorageError::UniqueViolation { entity, fields };
        }
    }
    StorageError::QueryError {
        message: error.to_string(),
    }
}

#[async_trait]
impl DataStore for PostgresDataStore {
    #[instrument(skip(self, query), fields(entity = %entity))]
    async fn find_many(&self, entity: Entity, query: &FindQuery) -> StorageResult<Vec<Document>> {
        self.execute_with_timeout_and_metrics("find_many", async {
            let mut builder = select_query(entity, query);
            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to read {entity} documents: {e}"),
                })?;
            rows.iter().map(decode_document).collect()
        })
        .await
    }

    #[instrument(skip(self, query), fields(entity = %entity))]
    async fn count(&self, entity: Entity, query: &FindQuery) -> StorageResult<u64> {
        self.execute_with_timeout_and_metrics("count", async {
            let mut builder = count_query(entity, query);
            let row = builder
                .build()
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to count {entity} documents: {e}"),
                })?;
            let total: i64 = row.try_get(0).map_err(|e| StorageError::QueryError {
                message: e.to_string(),
            })?;
            Ok(u64::try_from(total).unwrap_or_default())
        })
        .await
    }

    async fn find_by_id(&self, entity: Entity, id: &str) -> StorageResult<Option<Document>> {
        self.execute_with_timeout_and_metrics("find_by_id", async {
            let row = sqlx::query(
                "SELECT data FROM documents WHERE entity = $1 AND id = $2 \
                 AND (data ->> 'deletedAt') IS NULL",
            )
            .bind(entity.name())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError {
                message: e.to_string(),
            })?;
            row.as_ref().map(decode_document).transpose()
        })
        .await
    }

    #[instrument(skip(self, ops), fields(steps = ops.len()))]
    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<Vec<Document>> {
        self.execute_with_timeout_and_metrics("transaction", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StorageError::TransactionError {
                    message: format!("Failed to begin transaction: {e}"),
                })?;

            let mut written = Vec::with_capacity(ops.len());
            for op in ops {
                // an early return drops `tx`, which rolls back
                written.push(Self::apply(&mut tx, op).await?);
            }

            tx.commit()
                .await
                .map_err(|e| StorageError::TransactionError {
                    message: format!("Failed to commit transaction: {e}"),
                })?;
            Ok(written)
        })
        .await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let start = std::time::Instant::now();

        let check_result = tokio::time::timeout(self.health_check_timeout, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::HealthCheckFailed {
                    message: format!("database ping failed: {e}"),
                })
        })
        .await;

        let latency = start.elapsed();
        let status = match &check_result {
            Ok(Ok(_)) => "success",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };

        metrics::histogram!(
            "keyhold_storage_health_check_duration_seconds",
            "backend" => "postgres",
            "status" => status.to_string()
        )
        .record(latency.as_secs_f64());

        match check_result {
            Ok(result) => {
                result?;
            }
            Err(_elapsed) => {
                return Err(StorageError::QueryTimeout {
                    operation: "health_check".to_string(),
                    timeout: self.health_check_timeout,
                });
            }
        }

        // pool.size() counts every connection, so active = size - idle
        let total_connections = self.pool.size();
        let idle_connections = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX);
        let active_connections = total_connections.saturating_sub(idle_connections);
        let max_connections = self.pool.options().get_max_connections();

        Ok(HealthStatus {
            healthy: true,
            latency,
            pool_stats: Some(PoolStats {
                active_connections,
                idle_connections,
                max_connections,
            }),
            message: Some("postgresql".to_string()),
        })
    }
}

impl std::fmt::Debug for PostgresDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDataStore")
            .field("pool", &"PgPool")
            .finish()
    }
}
