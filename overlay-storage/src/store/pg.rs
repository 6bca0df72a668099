//! PostgreSQL Connection Pool
//!
//! Pooled client over deadpool-postgres. Connections are checked out per
//! operation or transaction and returned to the pool when the guard drops,
//! on success and on error alike.

use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime, Timeouts,
    Transaction,
};
use futures_util::future::BoxFuture;
use overlay_core::{StoreError, StoreResult};
use std::fmt;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

/// Tables backing [`super::PgRecordStore`].
pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_size", &self.max_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "overlay".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Read configuration from `PG_*` variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            host: lookup("PG_HOST").unwrap_or(defaults.host),
            port: lookup("PG_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: lookup("PG_DATABASE").unwrap_or(defaults.dbname),
            user: lookup("PG_USER").unwrap_or(defaults.user),
            password: lookup("PG_PASSWORD").unwrap_or_default(),
            max_size: lookup("PG_POOL_SIZE")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_size),
            timeout: lookup("PG_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> StoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig {
            max_size: self.max_size,
            timeouts: Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..PoolConfig::default()
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

pub(crate) fn pool_error(e: PoolError) -> StoreError {
    StoreError::Pool {
        reason: e.to_string(),
    }
}

pub(crate) fn query_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query {
        reason: e.to_string(),
    }
}

fn transaction_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Transaction {
        reason: e.to_string(),
    }
}

/// Read a column, mapping conversion failures to [`StoreError::RowDecode`].
pub(crate) fn column<'a, T>(row: &'a Row, name: &str) -> StoreResult<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name).map_err(|e| StoreError::RowDecode {
        column: name.to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// POOLED CLIENT
// ============================================================================

/// Pooled PostgreSQL client.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl fmt::Debug for PgStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgStore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

impl PgStore {
    /// Create a new client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new client from configuration.
    pub fn from_config(config: &DbConfig) -> StoreResult<Self> {
        let pool = config.create_pool()?;
        tracing::info!(host = %config.host, dbname = %config.dbname, "Created PostgreSQL pool");
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> StoreResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StoreResult<Vec<Row>> {
        let conn = self.get_conn().await?;
        conn.query(sql, params).await.map_err(query_error)
    }

    /// At most one row.
    pub async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StoreResult<Option<Row>> {
        let conn = self.get_conn().await?;
        conn.query_opt(sql, params).await.map_err(query_error)
    }

    /// Rows affected.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> StoreResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(sql, params).await.map_err(query_error)
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`. A
    /// transaction dropped without either (e.g. on cancellation) is rolled
    /// back by the server.
    ///
    /// ```ignore
    /// store.transaction(|tx| Box::pin(async move {
    ///     tx.execute("DELETE FROM edges WHERE child_version_id = $1", &[&child])
    ///         .await
    ///         .map_err(query_error)?;
    ///     Ok(())
    /// })).await?;
    /// ```
    pub async fn transaction<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: for<'t> FnOnce(&'t Transaction<'_>) -> BoxFuture<'t, StoreResult<R>> + Send,
        R: Send,
    {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(transaction_error)?;

        match f(&tx).await {
            Ok(value) => {
                tx.commit().await.map_err(transaction_error)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL).await.map_err(query_error)
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(query_error)?;
        Ok(())
    }

    /// Close the pool. Checked-out connections are dropped when returned.
    pub fn close(&self) {
        self.pool.close();
        tracing::info!("Closed PostgreSQL pool");
    }
}
