//! # Silo DB
//!
//! Postgres connectivity for the silo data plane.
//!
//! - [`PgPool`]: a `diesel-async` pool over deadpool with warm-up and a
//!   liveness round-trip on creation.
//! - [`ConnectionPoolManager`]: owns the control-plane pool, the optional
//!   administrative pool, and one lazily created pool per tenant database.
//! - [`PoolConnector`]: the seam the manager opens pools through.
//!   [`memory`] provides an in-process implementation for tests.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use silo_db::{ConnectionPoolManager, PgConnector, PoolConfig, TenantPoolTemplate};
//!
//! let control = PoolConfig::new("postgres://saas@localhost/silo_control", "silo_control")
//!     .pool_size(25)
//!     .min_idle(5);
//!
//! let manager = ConnectionPoolManager::connect(
//!     PgConnector,
//!     &control,
//!     None,
//!     TenantPoolTemplate::default(),
//! )
//! .await?;
//!
//! // First call opens the pool for db_tenant_<code>; later calls reuse it.
//! let pool = manager.get_or_create_tenant_pool("3f2a9c").await?;
//! let mut conn = pool.get().await?;
//! ```

#![warn(clippy::all)]

mod config;
mod connector;
mod error;
mod manager;
pub mod memory;
pub mod naming;
mod pool;

pub use config::*;
pub use connector::*;
pub use error::*;
pub use manager::*;
pub use naming::{quote_identifier, tenant_database_name};
pub use pool::*;

// Re-export diesel types for convenience
pub use diesel;
pub use diesel_async;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::connector::{PgConnector, PoolConnector};
    pub use crate::error::{DbError, DbResult};
    pub use crate::manager::{ConnectionPoolManager, TenantPoolTemplate};
    pub use crate::pool::{PgConnection, PgPool, PoolStatus};
    pub use crate::{PoolConfig, ServerTarget};
}
