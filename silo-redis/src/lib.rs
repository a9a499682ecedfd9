//! # Silo Redis
//!
//! bb8-pooled Redis client used by the tenant routing cache and the
//! provisioning queue.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use silo_redis::{RedisConfig, RedisService};
//! use std::time::Duration;
//!
//! let config = RedisConfig::builder()
//!     .url("redis://localhost:6379")
//!     .pool_size(10)
//!     .build();
//!
//! let redis = RedisService::new(config).await?;
//! redis.set_ex("tenant:routingcode:FR34JJO390G", "3f2a", Duration::from_secs(86400)).await?;
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{PooledRedis, RedisPool, open_pool};
pub use service::RedisService;

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::service::RedisService;
}
