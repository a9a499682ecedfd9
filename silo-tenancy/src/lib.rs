//! # Silo Tenancy
//!
//! Database-per-tenant resolution for the silo data plane.
//!
//! - [`TenantResolver`]: routing code plus principal to a [`ResolvedTenant`]
//!   carrying the tenant's own connection pool.
//! - [`RoutingCache`]: `routing_code -> database_code` entries in Redis.
//! - [`ControlPlaneStore`]: tenant metadata, membership and entitlements,
//!   backed by Postgres ([`PgControlPlaneStore`]) or memory ([`MemoryStore`]).
//! - [`ProvisioningRequester`]: registers tenants and enqueues their
//!   provisioning.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use silo_tenancy::prelude::*;
//!
//! let resolver = TenantResolver::new(store, RoutingCache::new(cache), pools);
//!
//! let tenant = resolver.resolve("FR34JJO390G", user_id).await?;
//! tenant.require_permission("orders.write")?;
//! let mut conn = tenant.pool.get().await?;
//! ```
//!
//! Errors carry internal detail in `Display`; render
//! [`TenantError::public_message`] to end users.

mod cache;
mod codes;
mod error;
pub mod pg;
mod requester;
mod resolver;
mod store;
mod tenant;

pub use cache::{
    CacheError, CacheProvider, DEFAULT_ROUTING_TTL, MemoryCacheProvider, ROUTING_KEY_PREFIX,
    RedisCacheProvider, RoutingCache,
};
pub use codes::{ROUTING_CODE_LEN, generate_routing_code, normalize_slug, validate_routing_code};
pub use error::{PublicErrorKind, TenantError, TenantResult};
pub use pg::{CONTROL_PLANE_SCHEMA, PgControlPlaneStore};
pub use requester::{CreateTenantRequest, MAX_ROUTING_CODE_ATTEMPTS, ProvisioningRequester};
pub use resolver::{ResolvedTenant, TenantResolver};
pub use store::{ControlPlaneStore, MemoryStore, OWNER_ROLE};
pub use tenant::{NewTenant, Tenant, TenantProfile, TenantStatus, UserTenant};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::cache::{CacheProvider, RoutingCache};
    pub use crate::error::{TenantError, TenantResult};
    pub use crate::requester::{CreateTenantRequest, ProvisioningRequester};
    pub use crate::resolver::{ResolvedTenant, TenantResolver};
    pub use crate::store::ControlPlaneStore;
    pub use crate::tenant::{Tenant, TenantStatus};
}
