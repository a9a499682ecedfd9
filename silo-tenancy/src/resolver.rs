//! Tenant Resolution
//!
//! Turns a routing code and an authenticated principal into a
//! [`ResolvedTenant`]: identity, connection pool, features and permissions.

use crate::cache::RoutingCache;
use crate::store::ControlPlaneStore;
use crate::tenant::TenantStatus;
use crate::{TenantError, TenantResult};
use silo_db::{ConnectionPoolManager, DbError, PoolConnector};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything downstream handlers receive about the current tenant.
#[derive(Debug, Clone)]
pub struct ResolvedTenant<P> {
    pub tenant_id: Uuid,
    pub routing_code: String,
    /// Pool for the tenant's own database.
    pub pool: P,
    pub features: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

impl<P> ResolvedTenant<P> {
    pub fn has_feature(&self, slug: &str) -> bool {
        self.features.contains(slug)
    }

    pub fn has_permission(&self, slug: &str) -> bool {
        self.permissions.contains(slug)
    }

    /// Fail unless the tenant's plan includes `slug`.
    pub fn require_feature(&self, slug: &str) -> TenantResult<()> {
        if self.has_feature(slug) {
            Ok(())
        } else {
            Err(TenantError::FeatureDisabled(slug.to_string()))
        }
    }

    /// Fail unless the principal holds `slug`.
    pub fn require_permission(&self, slug: &str) -> TenantResult<()> {
        if self.has_permission(slug) {
            Ok(())
        } else {
            Err(TenantError::PermissionMissing(slug.to_string()))
        }
    }
}

/// Resolves tenants for inbound requests.
pub struct TenantResolver<C: PoolConnector> {
    store: Arc<dyn ControlPlaneStore>,
    cache: RoutingCache,
    pools: Arc<ConnectionPoolManager<C>>,
    lookup_timeout: Duration,
}

impl<C: PoolConnector> TenantResolver<C> {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        cache: RoutingCache,
        pools: Arc<ConnectionPoolManager<C>>,
    ) -> Self {
        Self {
            store,
            cache,
            pools,
            lookup_timeout: Duration::from_secs(5),
        }
    }

    /// Deadline applied to each store call and to pool creation.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &RoutingCache {
        &self.cache
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager<C>> {
        &self.pools
    }

    /// Resolve `routing_code` for `user_id`.
    ///
    /// Status is checked before membership, entitlements or the pool are
    /// touched, so a tenant that is not active never gets a pool.
    pub async fn resolve(
        &self,
        routing_code: &str,
        user_id: Uuid,
    ) -> TenantResult<ResolvedTenant<C::Pool>> {
        let routing_code = routing_code.trim();
        if routing_code.is_empty() {
            return Err(TenantError::Invalid("routing code is required".into()));
        }

        let cached = self.cache.get(routing_code).await;

        let tenant = self
            .bounded("tenant lookup", self.store.find_by_routing_code(routing_code))
            .await?
            .ok_or_else(|| TenantError::NotFound(routing_code.to_string()))?;

        match cached.as_deref() {
            Some(code) if code == tenant.database_code => {}
            Some(_) => {
                warn!(
                    routing_code,
                    tenant_id = %tenant.id,
                    "Cached database code disagrees with store, refreshing"
                );
                self.cache.set(routing_code, &tenant.database_code).await;
            }
            None => {
                self.cache.set(routing_code, &tenant.database_code).await;
            }
        }

        if tenant.status != TenantStatus::Active {
            info!(
                routing_code,
                tenant_id = %tenant.id,
                status = %tenant.status,
                "Tenant is not active"
            );
            return Err(TenantError::NotActive(tenant.status));
        }

        let is_owner = tenant.is_owned_by(user_id);
        if !is_owner
            && !self
                .bounded("membership check", self.store.is_member(user_id, tenant.id))
                .await?
        {
            warn!(
                routing_code,
                tenant_id = %tenant.id,
                user_id = %user_id,
                "Access denied: user is not a member of tenant"
            );
            return Err(TenantError::AccessDenied {
                user_id,
                tenant_id: tenant.id,
            });
        }

        let features = self
            .bounded("feature lookup", self.store.tenant_features(tenant.id))
            .await?;

        let permissions = if is_owner {
            self.bounded("permission lookup", self.store.all_permissions())
                .await?
        } else {
            self.bounded(
                "permission lookup",
                self.store.member_permissions(user_id, tenant.id),
            )
            .await?
        };

        // Timing out drops the creation, which releases its registry slot.
        let pool = match tokio::time::timeout(
            self.lookup_timeout,
            self.pools.get_or_create_tenant_pool(&tenant.database_code),
        )
        .await
        {
            Ok(Ok(pool)) => pool,
            Ok(Err(source)) => {
                return Err(self.pool_failure(&tenant.database_code, routing_code, source));
            }
            Err(_) => {
                let source = DbError::Timeout("opening tenant pool".into());
                return Err(self.pool_failure(&tenant.database_code, routing_code, source));
            }
        };

        debug!(
            routing_code,
            tenant_id = %tenant.id,
            user_id = %user_id,
            features = features.len(),
            permissions = permissions.len(),
            "Tenant resolved"
        );

        Ok(ResolvedTenant {
            tenant_id: tenant.id,
            routing_code: tenant.routing_code,
            pool,
            features,
            permissions,
        })
    }

    fn pool_failure(
        &self,
        database_code: &str,
        routing_code: &str,
        source: DbError,
    ) -> TenantError {
        error!(
            routing_code,
            database_code,
            error = %source,
            "Active tenant has no reachable database"
        );
        TenantError::PoolCreation {
            database_code: database_code.to_string(),
            source,
        }
    }

    async fn bounded<T>(
        &self,
        step: &'static str,
        fut: impl Future<Output = TenantResult<T>>,
    ) -> TenantResult<T> {
        match tokio::time::timeout(self.lookup_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    step,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Control-plane call timed out"
                );
                Err(TenantError::Timeout(step))
            }
        }
    }
}
