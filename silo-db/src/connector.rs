//! Pool construction seam.

use crate::{DbResult, PgPool, PoolConfig};
use async_trait::async_trait;

/// Opens and closes connection pools.
///
/// [`ConnectionPoolManager`](crate::ConnectionPoolManager) is generic over this
/// trait so the registry can run against a real server ([`PgConnector`]) or
/// an in-process fake ([`MemoryConnector`](crate::memory::MemoryConnector)).
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    /// Pool handle. Clones share the same underlying pool.
    type Pool: Clone + Send + Sync + 'static;

    /// Open a pool and verify it with a round-trip.
    async fn connect(&self, config: &PoolConfig) -> DbResult<Self::Pool>;

    /// Release a pool's connections.
    async fn close(&self, pool: &Self::Pool) -> DbResult<()>;
}

/// Connector for PostgreSQL via `diesel-async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl PoolConnector for PgConnector {
    type Pool = PgPool;

    async fn connect(&self, config: &PoolConfig) -> DbResult<PgPool> {
        PgPool::connect(config.clone()).await
    }

    async fn close(&self, pool: &PgPool) -> DbResult<()> {
        pool.close();
        Ok(())
    }
}
