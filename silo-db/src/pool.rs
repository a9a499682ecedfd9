//! PostgreSQL connection pool over `diesel-async` and deadpool.

use crate::{DbError, DbResult, PoolConfig};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::scoped_futures::ScopedBoxFuture;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use futures_util::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// A pooled PostgreSQL connection.
pub type PgConnection = Object<AsyncPgConnection>;

/// PostgreSQL connection pool. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct PgPool {
    pool: Pool<AsyncPgConnection>,
    config: Arc<PoolConfig>,
}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("database", &self.config.database)
            .field("status", &self.status())
            .finish()
    }
}

impl PgPool {
    /// Create a pool, open `min_idle` connections and verify with `SELECT 1`.
    pub async fn connect(config: PoolConfig) -> DbResult<Self> {
        debug!(
            database = %config.database,
            url = %config.redacted_url(),
            pool_size = config.pool_size,
            "Creating PostgreSQL connection pool"
        );

        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| DbError::Pool(e.to_string()))?;

        let pool = Self {
            pool,
            config: Arc::new(config),
        };

        {
            let warm = pool.config.min_idle.clamp(1, pool.config.pool_size.max(1));
            let mut conns = try_join_all((0..warm).map(|_| pool.get())).await?;
            if let Some(conn) = conns.first_mut() {
                diesel::sql_query("SELECT 1").execute(&mut **conn).await?;
            }
        }

        info!(
            database = %pool.config.database,
            pool_size = pool.config.pool_size,
            min_idle = pool.config.min_idle,
            "PostgreSQL connection pool created"
        );

        Ok(pool)
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> DbResult<PgConnection> {
        let conn = tokio::time::timeout(self.config.connect_timeout, self.pool.get()).await??;
        Ok(conn)
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> DbResult<()> {
        let mut conn = self.get().await?;
        diesel::sql_query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    /// Run one or more statements over the simple query protocol.
    pub async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        let mut conn = self.get().await?;
        conn.batch_execute(sql).await?;
        Ok(())
    }

    /// Execute a closure within a transaction.
    ///
    /// If the closure returns an error, the transaction is rolled back.
    ///
    /// ```rust,ignore
    /// use diesel_async::scoped_futures::ScopedFutureExt;
    ///
    /// pool.transaction(|conn| async move {
    ///     diesel::sql_query("INSERT INTO tenants ...").execute(conn).await?;
    ///     Ok(())
    /// }.scope_boxed()).await?;
    /// ```
    pub async fn transaction<'a, R, F>(&self, f: F) -> DbResult<R>
    where
        F: for<'r> FnOnce(
                &'r mut AsyncPgConnection,
            ) -> ScopedBoxFuture<'a, 'r, Result<R, diesel::result::Error>>
            + Send
            + 'a,
        R: Send + 'a,
    {
        let mut conn = self.get().await?;
        let result = (*conn).transaction(f).await?;
        Ok(result)
    }

    /// Get pool statistics.
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            max_size: status.max_size,
        }
    }

    /// Close the pool. Idle connections are dropped and further `get` calls fail.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Get the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Current number of connections.
    pub size: usize,
    /// Number of available (idle) connections.
    pub available: usize,
    /// Number of tasks waiting for a connection.
    pub waiting: usize,
    /// Maximum pool size.
    pub max_size: usize,
}

impl PoolStatus {
    /// Get the utilization percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.size.saturating_sub(self.available) as f64 / self.max_size as f64) * 100.0
        }
    }

    /// Check if the pool is under pressure.
    pub fn is_under_pressure(&self) -> bool {
        self.waiting > 0 || self.utilization() > 80.0
    }
}
