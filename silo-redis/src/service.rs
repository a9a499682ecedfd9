//! Redis service shared by the routing cache and the provisioning queue.

use redis::{AsyncCommands, AsyncConnectionConfig};
use redis::aio::MultiplexedConnection;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    RedisConfig, RedisError, Result,
    pool::{PooledRedis, RedisPool, open_pool},
};

/// Redis service providing a connection pool and the commands the data plane uses.
///
/// Blocking pops run on a dedicated connection so they never tie up a pooled
/// connection for the length of their wait.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
    blocking: Mutex<Option<MultiplexedConnection>>,
}

impl RedisService {
    /// Create a new Redis service.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = open_pool(&config).await?;
        Ok(Self {
            config,
            pool,
            blocking: Mutex::new(None),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<PooledRedis<'_>> {
        Ok(self.pool.get().await?)
    }

    /// Get a dedicated connection (not from pool).
    ///
    /// The connection has no client-side response timeout: blocking pops
    /// hold a reply back for their whole wait, and callers bound each
    /// command themselves.
    pub async fn get_dedicated(&self) -> Result<MultiplexedConnection> {
        let client = redis::Client::open(self.config.url.as_str())
            .map_err(|e| RedisError::Config(e.to_string()))?;
        let settings = AsyncConnectionConfig::new()
            .set_connection_timeout(Some(self.config.connection_timeout))
            .set_response_timeout(None);
        let connect = client.get_multiplexed_async_connection_with_config(&settings);
        tokio::time::timeout(self.config.connection_timeout, connect)
            .await?
            .map_err(|e| RedisError::Connection(e.to_string()))
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        self.bounded(async {
            let mut conn = self.get().await?;
            let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
            Ok(())
        })
        .await
    }

    /// Get a value.
    pub async fn get_value<T: redis::FromRedisValue>(&self, key: &str) -> Result<Option<T>> {
        self.bounded(async {
            let mut conn = self.get().await?;
            let value: Option<T> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    /// Set a value with expiration.
    pub async fn set_ex<T: redis::ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<()> {
        self.bounded(async {
            let mut conn = self.get().await?;
            let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            Ok(())
        })
        .await
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded(async {
            let mut conn = self.get().await?;
            let deleted: u32 = conn.del(key).await?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Check if a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.bounded(async {
            let mut conn = self.get().await?;
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }

    /// List push (left). Returns the new list length.
    pub async fn lpush<T: redis::ToRedisArgs + Send + Sync>(&self, key: &str, value: T) -> Result<u64> {
        self.bounded(async {
            let mut conn = self.get().await?;
            let len: u64 = conn.lpush(key, value).await?;
            Ok(len)
        })
        .await
    }

    /// List length.
    pub async fn llen(&self, key: &str) -> Result<u64> {
        self.bounded(async {
            let mut conn = self.get().await?;
            let len: u64 = conn.llen(key).await?;
            Ok(len)
        })
        .await
    }

    /// Blocking list pop (right), waiting at most `wait`.
    ///
    /// Returns `None` when the wait elapses with the list still empty. A
    /// failed call drops the dedicated connection so the next call reconnects.
    pub async fn brpop<T: redis::FromRedisValue>(&self, key: &str, wait: Duration) -> Result<Option<T>> {
        let mut slot = self.blocking.lock().await;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                debug!(key, "Opening dedicated Redis connection for blocking pop");
                self.get_dedicated().await?
            }
        };

        let deadline = wait + self.config.command_timeout;
        let popped = tokio::time::timeout(deadline, async {
            let value: Option<(String, T)> = conn.brpop(key, wait.as_secs_f64()).await?;
            Ok::<_, RedisError>(value)
        })
        .await;

        match popped {
            Ok(Ok(value)) => {
                *slot = Some(conn);
                Ok(value.map(|(_, v)| v))
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "Blocking pop failed, dropping connection");
                Err(e)
            }
            Err(_) => {
                warn!(key, "Blocking pop exceeded its deadline, dropping connection");
                Err(RedisError::Timeout)
            }
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.command_timeout, fut).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal RESP2 server. BRPOP holds its reply for the requested timeout
    /// and answers nil, except on the key `ready`, which pops `job` at once.
    async fn spawn_fake_redis() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_fake_redis(socket));
            }
        });
        format!("redis://{}", addr)
    }

    async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0u8; len + 2];
            reader.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8(buf).ok()?);
        }
        Some(args)
    }

    async fn serve_fake_redis(socket: TcpStream) {
        let mut reader = BufReader::new(socket);
        while let Some(args) = read_command(&mut reader).await {
            let reply: Vec<u8> = match args[0].to_ascii_uppercase().as_str() {
                "PING" => b"+PONG\r\n".to_vec(),
                "BRPOP" if args[1] == "ready" => {
                    b"*2\r\n$5\r\nready\r\n$3\r\njob\r\n".to_vec()
                }
                "BRPOP" => {
                    let wait: f64 = args.last().and_then(|w| w.parse().ok()).unwrap_or(0.0);
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                    b"*-1\r\n".to_vec()
                }
                _ => b"+OK\r\n".to_vec(),
            };
            if reader.get_mut().write_all(&reply).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_brpop_waits_past_default_response_timeout() {
        let url = spawn_fake_redis().await;
        let config = RedisConfig::builder()
            .url(url)
            .pool_size(1)
            .min_idle(0)
            .command_timeout(Duration::from_secs(2))
            .build();
        let redis = RedisService::new(config).await.unwrap();

        let started = tokio::time::Instant::now();
        let value: Option<String> = redis.brpop("q", Duration::from_millis(1500)).await.unwrap();
        assert_eq!(value, None);
        assert!(started.elapsed() >= Duration::from_millis(1400));

        // The connection survives an empty wait and is reused.
        let value: Option<String> = redis.brpop("ready", Duration::from_secs(1)).await.unwrap();
        assert_eq!(value.as_deref(), Some("job"));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_basic_operations() {
        let redis = RedisService::new(RedisConfig::new("redis://localhost:6379"))
            .await
            .unwrap();
        redis.health_check().await.unwrap();

        redis
            .set_ex("silo:test_key", "test_value", Duration::from_secs(30))
            .await
            .unwrap();
        let value: Option<String> = redis.get_value("silo:test_key").await.unwrap();
        assert_eq!(value, Some("test_value".to_string()));
        assert!(redis.exists("silo:test_key").await.unwrap());

        assert!(redis.delete("silo:test_key").await.unwrap());
        assert!(!redis.exists("silo:test_key").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_list_is_fifo_with_lpush_brpop() {
        let redis = RedisService::new(RedisConfig::new("redis://localhost:6379"))
            .await
            .unwrap();
        let key = "silo:test_list";
        redis.delete(key).await.unwrap();

        redis.lpush(key, "first").await.unwrap();
        redis.lpush(key, "second").await.unwrap();
        assert_eq!(redis.llen(key).await.unwrap(), 2);

        let a: Option<String> = redis.brpop(key, Duration::from_secs(1)).await.unwrap();
        let b: Option<String> = redis.brpop(key, Duration::from_secs(1)).await.unwrap();
        let c: Option<String> = redis.brpop(key, Duration::from_secs(1)).await.unwrap();
        assert_eq!(a.as_deref(), Some("first"));
        assert_eq!(b.as_deref(), Some("second"));
        assert_eq!(c, None);
    }
}
