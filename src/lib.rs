//! # Silo
//!
//! Database-per-tenant data plane.
//!
//! Every tenant's data lives in its own Postgres database, addressed through
//! a public routing code. This crate ties the workspace together:
//!
//! - [`db`]: per-tenant connection pools ([`db::ConnectionPoolManager`])
//! - [`tenancy`]: tenant resolution, routing cache, control-plane store
//! - [`queue`]: the provisioning queue
//! - [`provision`]: the background worker that creates tenant databases
//! - [`bootstrap`]: wiring all of the above from [`config::Settings`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use silo::prelude::*;
//!
//! let settings = Settings::load(None)?;
//! let plane = DataPlane::connect(settings).await?;
//!
//! let resolver = plane.resolver();
//! let tenant = resolver.resolve("FR34JJO390G", user_id).await?;
//! let mut conn = tenant.pool.get().await?;
//!
//! plane.shutdown().await;
//! ```

pub mod bootstrap;

pub use silo_config as config;
pub use silo_db as db;
pub use silo_log as log;
pub use silo_provision as provision;
pub use silo_queue as queue;
pub use silo_redis as redis;
pub use silo_tenancy as tenancy;

pub use bootstrap::{BootstrapError, BootstrapResult, DataPlane};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::bootstrap::{BootstrapError, DataPlane};
    pub use silo_config::Settings;
    pub use silo_db::prelude::*;
    pub use silo_provision::{ProcessOutcome, ProvisioningWorker, WorkerConfig, WorkerHandle};
    pub use silo_queue::{ProvisioningMessage, ProvisioningQueue};
    pub use silo_tenancy::prelude::*;
}
