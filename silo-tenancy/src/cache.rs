//! Tenant routing cache
//!
//! Maps a public routing code to its database code. The cache is only an
//! optimization: every failure is logged and reported as a miss.

use async_trait::async_trait;
use parking_lot::Mutex;
use silo_redis::{RedisError, RedisService};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Cache provider trait
///
/// Implemented for Redis and for an in-process map.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Get value from cache
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set value in cache with an expiry
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Delete value from cache
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache error: {0}")]
    Error(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        if err.is_transient() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Error(err.to_string())
        }
    }
}

/// [`CacheProvider`] backed by the shared Redis pool.
#[derive(Clone)]
pub struct RedisCacheProvider {
    redis: Arc<RedisService>,
}

impl RedisCacheProvider {
    pub fn new(redis: Arc<RedisService>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.redis.get_value::<Vec<u8>>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        Ok(self.redis.set_ex(key, value, ttl).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.redis.delete(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.redis.exists(key).await?)
    }
}

/// In-process [`CacheProvider`] with expiry, for tests.
#[derive(Debug, Default)]
pub struct MemoryCacheProvider {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    unavailable: AtomicBool,
}

impl MemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(_, expires)| *expires - now)
    }

    /// Write an entry directly, bypassing availability checks.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Duration) {
        self.entries
            .lock()
            .insert(key.into(), (value.into(), Instant::now() + ttl));
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|(_, expires)| *expires <= now) {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Key prefix for routing entries.
pub const ROUTING_KEY_PREFIX: &str = "tenant:routingcode:";

/// Default lifetime of a routing entry.
pub const DEFAULT_ROUTING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Routing-code to database-code cache.
///
/// Only this immutable mapping is cached; tenant status is always read
/// from the store.
#[derive(Clone)]
pub struct RoutingCache {
    provider: Arc<dyn CacheProvider>,
    ttl: Duration,
    timeout: Duration,
}

impl RoutingCache {
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            provider,
            ttl: DEFAULT_ROUTING_TTL,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Deadline for each cache call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `tenant:routingcode:{code}`
    pub fn key(routing_code: &str) -> String {
        format!("{}{}", ROUTING_KEY_PREFIX, routing_code)
    }

    /// Cached database code, or `None` on miss, error or timeout.
    pub async fn get(&self, routing_code: &str) -> Option<String> {
        let key = Self::key(routing_code);
        match tokio::time::timeout(self.timeout, self.provider.get(&key)).await {
            Ok(Ok(Some(bytes))) => match String::from_utf8(bytes) {
                Ok(code) if !code.is_empty() => {
                    debug!(routing_code, "Routing cache hit");
                    Some(code)
                }
                _ => {
                    warn!(routing_code, "Routing cache entry is not a valid database code");
                    None
                }
            },
            Ok(Ok(None)) => {
                debug!(routing_code, "Routing cache miss");
                None
            }
            Ok(Err(e)) => {
                warn!(routing_code, error = %e, "Routing cache read failed, treating as miss");
                None
            }
            Err(_) => {
                warn!(routing_code, "Routing cache read timed out, treating as miss");
                None
            }
        }
    }

    /// Store a mapping. Returns whether the write succeeded.
    pub async fn set(&self, routing_code: &str, database_code: &str) -> bool {
        let key = Self::key(routing_code);
        let write = self
            .provider
            .set(&key, database_code.as_bytes().to_vec(), self.ttl);
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(routing_code, error = %e, "Failed to cache routing code");
                false
            }
            Err(_) => {
                warn!(routing_code, "Routing cache write timed out");
                false
            }
        }
    }

    /// Drop a mapping. Returns whether the delete succeeded.
    pub async fn invalidate(&self, routing_code: &str) -> bool {
        let key = Self::key(routing_code);
        match tokio::time::timeout(self.timeout, self.provider.delete(&key)).await {
            Ok(Ok(())) => {
                debug!(routing_code, "Routing cache entry invalidated");
                true
            }
            Ok(Err(e)) => {
                warn!(routing_code, error = %e, "Failed to invalidate routing cache entry");
                false
            }
            Err(_) => {
                warn!(routing_code, "Routing cache invalidation timed out");
                false
            }
        }
    }
}
