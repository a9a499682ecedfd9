//! Process-wide registry of database pools.
//!
//! [`ConnectionPoolManager`] owns the control-plane pool, the optional
//! administrative pool, and one lazily created pool per tenant database.
//! It is constructed once at startup and shared by reference (usually
//! behind an `Arc`).

use crate::naming::tenant_database_name;
use crate::{DbError, DbResult, PoolConfig, PoolConnector, ServerTarget};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// How tenant pools are derived from a database code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPoolTemplate {
    /// Server hosting tenant databases.
    pub server: ServerTarget,
    /// Prefix prepended to the sanitized database code.
    pub prefix: String,
    /// Per-tenant pool upper bound.
    pub max_size: usize,
    /// Connections opened when a tenant pool is created.
    pub min_idle: usize,
    /// Deadline for acquiring a connection.
    pub connect_timeout: Duration,
}

impl Default for TenantPoolTemplate {
    fn default() -> Self {
        Self {
            server: ServerTarget::default(),
            prefix: crate::naming::DEFAULT_TENANT_PREFIX.to_string(),
            max_size: 20,
            min_idle: 2,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TenantPoolTemplate {
    /// Physical database name for a database code.
    pub fn database_name(&self, database_code: &str) -> DbResult<String> {
        tenant_database_name(&self.prefix, database_code)
    }

    /// Pool configuration for a database code.
    pub fn config_for(&self, database_code: &str) -> DbResult<PoolConfig> {
        let database = self.database_name(database_code)?;
        let url = self.server.url_for(&database)?;
        Ok(PoolConfig::new(url, database)
            .pool_size(self.max_size)
            .min_idle(self.min_idle)
            .connect_timeout(self.connect_timeout))
    }
}

type TenantSlot<P> = Arc<OnceCell<P>>;

/// A registry slot held by one caller of
/// [`ConnectionPoolManager::get_or_create_tenant_pool`].
struct PendingSlot<'a, C: PoolConnector> {
    manager: &'a ConnectionPoolManager<C>,
    database_code: &'a str,
    slot: TenantSlot<C::Pool>,
}

impl<C: PoolConnector> Drop for PendingSlot<'_, C> {
    fn drop(&mut self) {
        self.manager.discard_slot(self.database_code, &self.slot);
    }
}

/// Registry of the control-plane, admin and per-tenant pools.
///
/// The tenant registry lock is never held across I/O. Creation of a tenant
/// pool happens inside a per-code [`OnceCell`], so concurrent first requests
/// for the same code share a single connect and all receive the same pool.
pub struct ConnectionPoolManager<C: PoolConnector> {
    connector: C,
    template: TenantPoolTemplate,
    control_plane: C::Pool,
    admin: Option<C::Pool>,
    tenants: RwLock<HashMap<String, TenantSlot<C::Pool>>>,
    shut_down: AtomicBool,
}

impl<C: PoolConnector> std::fmt::Debug for ConnectionPoolManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolManager")
            .field("template", &self.template)
            .field("has_admin", &self.admin.is_some())
            .field("tenant_pools", &self.tenants.read().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl<C: PoolConnector> ConnectionPoolManager<C> {
    /// Open the control-plane pool (and the admin pool if configured).
    ///
    /// Failure to reach the control plane is fatal.
    pub async fn connect(
        connector: C,
        control_plane: &PoolConfig,
        admin: Option<&PoolConfig>,
        template: TenantPoolTemplate,
    ) -> DbResult<Self> {
        let control = connector.connect(control_plane).await.map_err(|e| {
            error!(
                database = %control_plane.database,
                error = %e,
                "Control-plane database is unreachable"
            );
            e
        })?;

        let admin_pool = match admin {
            Some(config) => match connector.connect(config).await {
                Ok(pool) => Some(pool),
                Err(e) => {
                    error!(database = %config.database, error = %e, "Admin database is unreachable");
                    if let Err(close_err) = connector.close(&control).await {
                        warn!(error = %close_err, "Failed to close control-plane pool");
                    }
                    return Err(e);
                }
            },
            None => None,
        };

        info!(
            control_plane = %control_plane.database,
            admin = admin.map(|c| c.database.as_str()).unwrap_or("-"),
            "Connection pool manager ready"
        );

        Ok(Self::from_parts(connector, control, admin_pool, template))
    }

    /// Assemble a manager from already opened pools.
    pub fn from_parts(
        connector: C,
        control_plane: C::Pool,
        admin: Option<C::Pool>,
        template: TenantPoolTemplate,
    ) -> Self {
        Self {
            connector,
            template,
            control_plane,
            admin,
            tenants: RwLock::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// The control-plane pool.
    pub fn control_plane(&self) -> &C::Pool {
        &self.control_plane
    }

    /// The administrative pool used for `CREATE DATABASE`, if configured.
    pub fn admin_pool(&self) -> Option<&C::Pool> {
        self.admin.as_ref()
    }

    pub fn tenant_template(&self) -> &TenantPoolTemplate {
        &self.template
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Return the pool for `database_code`, creating it on first use.
    ///
    /// Fails if the tenant database does not exist or cannot be reached, and
    /// with [`DbError::ShutDown`] once [`shutdown`](Self::shutdown) has run.
    pub async fn get_or_create_tenant_pool(&self, database_code: &str) -> DbResult<C::Pool> {
        if self.is_shut_down() {
            return Err(DbError::ShutDown);
        }

        let existing = self.tenants.read().get(database_code).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut tenants = self.tenants.write();
                if self.is_shut_down() {
                    return Err(DbError::ShutDown);
                }
                tenants
                    .entry(database_code.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            }
        };

        if let Some(pool) = slot.get() {
            return Ok(pool.clone());
        }

        // Dropping the guard, on failure or when the caller is cancelled,
        // discards a slot nobody else is still initialising.
        let pending = PendingSlot {
            manager: self,
            database_code,
            slot,
        };

        let pool = match pending
            .slot
            .get_or_try_init(|| self.open_tenant_pool(database_code))
            .await
        {
            Ok(pool) => pool.clone(),
            Err(e) => {
                error!(
                    database_code = %database_code,
                    error = %e,
                    "Failed to create tenant connection pool"
                );
                return Err(e);
            }
        };

        // A close or shutdown may have removed the slot while the pool was
        // being opened; such a pool must not escape the registry.
        if self.is_shut_down() || !self.is_registered(database_code, &pending.slot) {
            if let Err(e) = self.connector.close(&pool).await {
                warn!(database_code = %database_code, error = %e, "Failed to close orphaned tenant pool");
            }
            return Err(if self.is_shut_down() {
                DbError::ShutDown
            } else {
                DbError::Pool(format!("pool for {} was closed during creation", database_code))
            });
        }

        Ok(pool)
    }

    async fn open_tenant_pool(&self, database_code: &str) -> DbResult<C::Pool> {
        let config = self.template.config_for(database_code)?;
        debug!(database_code = %database_code, database = %config.database, "Opening tenant pool");
        let pool = self.connector.connect(&config).await?;
        info!(
            database_code = %database_code,
            database = %config.database,
            pool_size = config.pool_size,
            "Tenant connection pool created"
        );
        Ok(pool)
    }

    fn is_registered(&self, database_code: &str, slot: &TenantSlot<C::Pool>) -> bool {
        self.tenants
            .read()
            .get(database_code)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Remove an uninitialised slot once its last caller gives up on it.
    ///
    /// Callers still waiting on the slot hold their own reference and will
    /// retry the initialisation, so the slot stays registered for them.
    fn discard_slot(&self, database_code: &str, slot: &TenantSlot<C::Pool>) {
        let mut tenants = self.tenants.write();
        if let Some(current) = tenants.get(database_code)
            && Arc::ptr_eq(current, slot)
            && !current.initialized()
            && Arc::strong_count(current) <= 2
        {
            tenants.remove(database_code);
        }
    }

    /// The existing pool for `database_code`, without creating one.
    pub fn tenant_pool(&self, database_code: &str) -> Option<C::Pool> {
        self.tenants
            .read()
            .get(database_code)
            .and_then(|slot| slot.get().cloned())
    }

    /// Remove and close one tenant pool. Closing an absent pool is a no-op.
    pub async fn close_pool(&self, database_code: &str) -> DbResult<()> {
        let slot = self.tenants.write().remove(database_code);
        let Some(pool) = slot.as_ref().and_then(|slot| slot.get()) else {
            return Ok(());
        };

        self.connector.close(pool).await?;
        info!(database_code = %database_code, "Tenant connection pool closed");
        Ok(())
    }

    /// Close every tenant pool, then the admin and control-plane pools.
    ///
    /// Close failures are logged and do not stop the remaining pools from
    /// being released. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<(String, TenantSlot<C::Pool>)> = self.tenants.write().drain().collect();
        let mut failures = 0usize;
        let mut closed = 0usize;

        for (code, slot) in drained {
            let Some(pool) = slot.get() else {
                continue;
            };
            match self.connector.close(pool).await {
                Ok(()) => closed += 1,
                Err(e) => {
                    failures += 1;
                    warn!(database_code = %code, error = %e, "Failed to close tenant pool");
                }
            }
        }

        if let Some(admin) = &self.admin
            && let Err(e) = self.connector.close(admin).await
        {
            failures += 1;
            warn!(error = %e, "Failed to close admin pool");
        }

        if let Err(e) = self.connector.close(&self.control_plane).await {
            failures += 1;
            warn!(error = %e, "Failed to close control-plane pool");
        }

        info!(tenant_pools = closed, failures, "Connection pool manager shut down");
    }

    /// Number of live tenant pools.
    pub fn tenant_pool_count(&self) -> usize {
        self.tenants
            .read()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn has_tenant_pool(&self, database_code: &str) -> bool {
        self.tenant_pool(database_code).is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryPool, MemoryServer};

    fn template() -> TenantPoolTemplate {
        TenantPoolTemplate {
            max_size: 4,
            min_idle: 1,
            ..Default::default()
        }
    }

    async fn manager(server: &Arc<MemoryServer>) -> ConnectionPoolManager<MemoryConnector> {
        server.create_database("silo_control").ok();
        let connector = MemoryConnector::new(server.clone());
        let control = connector
            .connect(&PoolConfig::new("memory://silo_control", "silo_control"))
            .await
            .unwrap();
        ConnectionPoolManager::from_parts(connector, control, None, template())
    }

    #[test]
    fn test_template_config() {
        let mut template = template();
        template.server.password = Some("pw".into());
        let config = template.config_for("AB-12").unwrap();
        assert_eq!(config.database, "db_tenant_ab_12");
        assert_eq!(
            config.database_url,
            "postgres://postgres:pw@localhost:5432/db_tenant_ab_12?sslmode=disable"
        );
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.min_idle, 1);
        assert!(template.config_for("  ").is_err());
    }

    #[tokio::test]
    async fn test_pool_is_reused() {
        let server = Arc::new(MemoryServer::with_databases(["db_tenant_abc"]));
        let manager = manager(&server).await;
        let baseline = server.connect_count();

        let first = manager.get_or_create_tenant_pool("abc").await.unwrap();
        let second = manager.get_or_create_tenant_pool("abc").await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(server.connect_count() - baseline, 1);
        assert_eq!(manager.tenant_pool_count(), 1);
        assert!(manager.has_tenant_pool("abc"));
    }

    #[tokio::test]
    async fn test_missing_database_leaves_no_entry() {
        let server = Arc::new(MemoryServer::new());
        let manager = manager(&server).await;

        let err = manager.get_or_create_tenant_pool("ghost").await.unwrap_err();
        assert!(err.is_missing_database());
        assert_eq!(manager.tenant_pool_count(), 0);
        assert!(manager.tenant_pool("ghost").is_none());

        server.create_database("db_tenant_ghost").unwrap();
        let pool = manager.get_or_create_tenant_pool("ghost").await.unwrap();
        assert_eq!(pool.database(), "db_tenant_ghost");
    }

    async fn delayed_manager(
        server: &Arc<MemoryServer>,
        delay: Duration,
    ) -> Arc<ConnectionPoolManager<MemoryConnector>> {
        server.create_database("silo_control").ok();
        let connector = MemoryConnector::new(server.clone()).with_delay(delay);
        let control = connector
            .connect(&PoolConfig::new("memory://silo_control", "silo_control"))
            .await
            .unwrap();
        Arc::new(ConnectionPoolManager::from_parts(connector, control, None, template()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_keeps_pool_after_first_attempt_fails() {
        let server = Arc::new(MemoryServer::new());
        let manager = delayed_manager(&server, Duration::from_millis(50)).await;

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.get_or_create_tenant_pool("x").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.get_or_create_tenant_pool("x").await }
        });

        // The first connect fails at 50ms; the waiter's retry checks at 100ms.
        tokio::time::sleep(Duration::from_millis(65)).await;
        server.create_database("db_tenant_x").unwrap();

        assert!(first.await.unwrap().unwrap_err().is_missing_database());
        let pool = second.await.unwrap().unwrap();
        assert!(!pool.is_closed());
        assert!(manager.has_tenant_pool("x"));
        assert_eq!(manager.tenant_pool_count(), 1);

        let again = manager.get_or_create_tenant_pool("x").await.unwrap();
        assert_eq!(again.id(), pool.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_creation_leaves_no_slot() {
        let server = Arc::new(MemoryServer::with_databases(["db_tenant_slow"]));
        let manager = delayed_manager(&server, Duration::from_millis(200)).await;

        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            manager.get_or_create_tenant_pool("slow"),
        )
        .await;
        assert!(attempt.is_err());
        assert!(manager.tenants.read().is_empty());

        let pool = manager.get_or_create_tenant_pool("slow").await.unwrap();
        assert_eq!(pool.database(), "db_tenant_slow");
        assert_eq!(manager.tenants.read().len(), 1);
    }

    #[tokio::test]
    async fn test_close_pool_is_idempotent() {
        let server = Arc::new(MemoryServer::with_databases(["db_tenant_abc"]));
        let manager = manager(&server).await;

        let pool = manager.get_or_create_tenant_pool("abc").await.unwrap();
        manager.close_pool("abc").await.unwrap();
        assert!(pool.is_closed());
        assert!(!manager.has_tenant_pool("abc"));

        manager.close_pool("abc").await.unwrap();
        manager.close_pool("never-opened").await.unwrap();

        let reopened = manager.get_or_create_tenant_pool("abc").await.unwrap();
        assert_ne!(reopened.id(), pool.id());
    }

    #[tokio::test]
    async fn test_distinct_codes_get_distinct_pools() {
        let server = Arc::new(MemoryServer::with_databases(["db_tenant_a", "db_tenant_b"]));
        let manager = manager(&server).await;

        let a = manager.get_or_create_tenant_pool("a").await.unwrap();
        let b = manager.get_or_create_tenant_pool("b").await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.database(), "db_tenant_a");
        assert_eq!(b.database(), "db_tenant_b");
        assert_eq!(manager.tenant_pool_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let server = Arc::new(MemoryServer::with_databases(["db_tenant_a", "db_tenant_b"]));
        let manager = manager(&server).await;

        let a = manager.get_or_create_tenant_pool("a").await.unwrap();
        let b = manager.get_or_create_tenant_pool("b").await.unwrap();

        manager.shutdown().await;

        assert!(manager.is_shut_down());
        assert!(a.is_closed() && b.is_closed());
        assert!(manager.control_plane().is_closed());
        assert_eq!(manager.tenant_pool_count(), 0);
        assert!(matches!(
            manager.get_or_create_tenant_pool("a").await,
            Err(DbError::ShutDown)
        ));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_continues_past_close_failures() {
        let server = Arc::new(MemoryServer::with_databases(["db_tenant_a", "db_tenant_b"]));
        let manager = manager(&server).await;

        manager.get_or_create_tenant_pool("a").await.unwrap();
        manager.get_or_create_tenant_pool("b").await.unwrap();
        server.fail_closes(true);

        manager.shutdown().await;

        assert_eq!(manager.tenant_pool_count(), 0);
        assert!(manager.tenant_pool("a").is_none());
        assert!(manager.tenant_pool("b").is_none());
    }

    #[tokio::test]
    async fn test_connect_fails_without_control_plane() {
        let server = Arc::new(MemoryServer::new());
        let connector = MemoryConnector::new(server);
        let result = ConnectionPoolManager::connect(
            connector,
            &PoolConfig::new("memory://silo_control", "silo_control"),
            None,
            template(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_with_admin_pool() {
        let server = Arc::new(MemoryServer::with_databases(["silo_control", "postgres"]));
        let manager = ConnectionPoolManager::connect(
            MemoryConnector::new(server),
            &PoolConfig::new("memory://silo_control", "silo_control"),
            Some(&PoolConfig::new("memory://postgres", "postgres").pool_size(2)),
            template(),
        )
        .await
        .unwrap();

        assert_eq!(manager.admin_pool().map(|p| p.database()), Some("postgres"));
        manager.shutdown().await;
        assert!(manager.admin_pool().is_some_and(|p| p.is_closed()));
    }
}
