//! # Silo Provision
//!
//! Out-of-band creation of tenant databases.
//!
//! A tenant is registered in `provisioning` status and a message is queued.
//! The [`ProvisioningWorker`] picks it up, creates `db_tenant_<code>` through
//! a [`DatabaseProvisioner`], applies [`TENANT_SCHEMA`], and moves the tenant
//! to `active`. Any failed step moves it to `failed` instead; there is no
//! automatic retry.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use silo_provision::*;
//!
//! let provisioner = PgDatabaseProvisioner::new(admin_pool, tenant_target)
//!     .with_grant_role(Some("saas_api".into()));
//! let worker = Arc::new(ProvisioningWorker::new(queue, store, Arc::new(provisioner)));
//!
//! let handle = worker.start()?;
//! tokio::signal::ctrl_c().await?;
//! handle.stop().await;
//! ```

mod error;
mod provisioner;
mod schema;
mod worker;

pub use error::{ProvisionError, ProvisionResult};
pub use provisioner::{DatabaseProvisioner, MemoryProvisioner, PgDatabaseProvisioner};
pub use schema::{TENANT_SCHEMA, grant_statements};
pub use worker::{ProcessOutcome, ProvisioningWorker, WorkerConfig, WorkerHandle, WorkerStats};
