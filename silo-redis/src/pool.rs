//! bb8 pool construction.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use tracing::info;

use crate::{RedisConfig, RedisError, Result};

pub type RedisPool = Pool<RedisConnectionManager>;

/// Connection checked out of a [`RedisPool`]. Derefs to the multiplexed connection.
pub type PooledRedis<'a> = PooledConnection<'a, RedisConnectionManager>;

/// Open a pool for `config` and make sure the server answers before handing it out.
pub async fn open_pool(config: &RedisConfig) -> Result<RedisPool> {
    let manager = RedisConnectionManager::new(config.url.as_str())
        .map_err(|e| RedisError::Config(e.to_string()))?;

    let pool = Pool::builder()
        .max_size(config.pool_size.max(1))
        .min_idle(Some(config.min_idle.min(config.pool_size)))
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .await
        .map_err(|e| RedisError::Pool(e.to_string()))?;

    let ping = async {
        let mut conn = pool.get().await?;
        let reply: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok::<_, RedisError>(reply)
    };
    match tokio::time::timeout(config.command_timeout, ping).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(RedisError::Connection(e.to_string())),
        Err(_) => return Err(RedisError::Timeout),
    }

    info!(
        url = %config.redacted_url(),
        pool_size = config.pool_size,
        "Redis pool ready"
    );
    Ok(pool)
}
