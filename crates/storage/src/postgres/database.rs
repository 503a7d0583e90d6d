//! Connection pool handling.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, instrument};

use siphon_core::error::{StorageError, StorageResult};

/// Pool settings for the single store pool the indexer runs on.
///
/// There is deliberately one pool and one preset: the committer
/// serializes the heavy writes, so the pool only needs headroom for the
/// side traffic (failure bookkeeping from the fetch workers and the
/// processor, plus the reindex bootstrap read).
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Hard cap on open connections.
    pub max_connections: u32,
    /// Connections kept warm while idle.
    pub min_connections: u32,
    /// How long to wait for a free connection before erroring.
    pub acquire_timeout: Duration,
    /// Idle time after which a connection is dropped.
    pub idle_timeout: Duration,
    /// Lifetime after which a connection is recycled.
    pub max_lifetime: Duration,
}

impl DatabaseConfig {
    /// Settings for a given URL with the indexer's pool sizing.
    pub fn for_indexer(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/siphon".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Owned handle around the sqlx pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool against the configured database.
    #[instrument(skip_all)]
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        debug!(
            max = config.max_connections,
            min = config.min_connections,
            "opening store pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        debug!("store pool ready");

        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the core schema migrations.
    ///
    /// Embedder-registered custom models run later, during pipeline
    /// bootstrap, through [`super::PgStore`].
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StorageResult<()> {
        debug!("applying schema migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationError(e.to_string()))?;

        debug!("schema up to date");

        Ok(())
    }

    /// Cheap liveness probe.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Drain and close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
