//! Assembling the data plane from [`Settings`].

use silo_config::{ConfigError, DatabaseSettings, Settings, TenantPoolSettings};
use silo_db::{
    ConnectionPoolManager, DbError, PgConnector, PoolConfig, ServerTarget, TenantPoolTemplate,
};
use silo_provision::{PgDatabaseProvisioner, ProvisioningWorker, WorkerConfig};
use silo_queue::RedisProvisioningQueue;
use silo_redis::{RedisConfig, RedisError, RedisService};
use silo_tenancy::{
    PgControlPlaneStore, ProvisioningRequester, RedisCacheProvider, RoutingCache, TenantError,
    TenantResolver,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Errors raised while connecting the data plane.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Control-plane error: {0}")]
    Tenant(#[from] TenantError),

    #[error("The provisioning worker needs an administrative pool")]
    MissingAdminPool,
}

/// Postgres server of a database section.
pub fn server_target(settings: &DatabaseSettings) -> ServerTarget {
    ServerTarget {
        host: settings.host.clone(),
        port: settings.port,
        user: settings.user.clone(),
        password: settings.password.clone(),
        ssl_mode: settings.ssl_mode.clone(),
    }
}

/// Pool configuration for a database section.
pub fn pool_config(settings: &DatabaseSettings) -> BootstrapResult<PoolConfig> {
    let url = server_target(settings).url_for(&settings.database)?;
    Ok(PoolConfig::new(url, settings.database.clone())
        .pool_size(settings.max_connections)
        .min_idle(settings.min_connections))
}

/// Template every tenant pool is derived from.
pub fn tenant_template(settings: &TenantPoolSettings) -> TenantPoolTemplate {
    TenantPoolTemplate {
        server: ServerTarget {
            host: settings.host.clone(),
            port: settings.port,
            user: settings.user.clone(),
            password: settings.password.clone(),
            ssl_mode: settings.ssl_mode.clone(),
        },
        prefix: settings.database_prefix.clone(),
        max_size: settings.max_connections,
        min_idle: settings.min_connections,
        ..TenantPoolTemplate::default()
    }
}

pub fn redis_config(settings: &Settings) -> RedisConfig {
    RedisConfig::builder()
        .url(settings.redis.url.clone())
        .pool_size(settings.redis.pool_size)
        .command_timeout(settings.resolver.lookup_timeout())
        .build()
}

pub fn worker_config(settings: &Settings) -> WorkerConfig {
    WorkerConfig::default()
        .dequeue_timeout(settings.worker.dequeue_timeout())
        .error_backoff(settings.worker.error_backoff())
        .step_timeout(settings.worker.step_timeout())
        .database_prefix(settings.tenant.database_prefix.clone())
}

/// Connected data plane: pools, Redis and the control-plane store.
///
/// Components are handed out by the accessor methods and share the
/// underlying pools.
pub struct DataPlane {
    settings: Settings,
    pools: Arc<ConnectionPoolManager<PgConnector>>,
    redis: Arc<RedisService>,
    store: Arc<PgControlPlaneStore>,
}

impl DataPlane {
    /// Open the control-plane and admin pools and connect to Redis.
    pub async fn connect(settings: Settings) -> BootstrapResult<Self> {
        let control = pool_config(&settings.control_plane)?;
        let admin = pool_config(&settings.admin)?;

        let pools = ConnectionPoolManager::connect(
            PgConnector,
            &control,
            Some(&admin),
            tenant_template(&settings.tenant),
        )
        .await?;

        let redis_config = redis_config(&settings);
        let redis = match RedisService::new(redis_config.clone()).await {
            Ok(redis) => redis,
            Err(e) => {
                pools.shutdown().await;
                return Err(e.into());
            }
        };

        let store = PgControlPlaneStore::new(pools.control_plane().clone());

        info!(
            control_plane = %control.redacted_url(),
            redis = %redis_config.redacted_url(),
            "Data plane connected"
        );

        Ok(Self {
            settings,
            pools: Arc::new(pools),
            redis: Arc::new(redis),
            store: Arc::new(store),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager<PgConnector>> {
        &self.pools
    }

    pub fn redis(&self) -> &Arc<RedisService> {
        &self.redis
    }

    pub fn store(&self) -> Arc<PgControlPlaneStore> {
        self.store.clone()
    }

    pub fn routing_cache(&self) -> RoutingCache {
        RoutingCache::new(Arc::new(RedisCacheProvider::new(self.redis.clone())))
            .with_ttl(self.settings.redis.routing_ttl())
            .with_timeout(self.settings.resolver.lookup_timeout())
    }

    pub fn queue(&self) -> Arc<RedisProvisioningQueue> {
        Arc::new(RedisProvisioningQueue::new(
            self.redis.clone(),
            self.settings.redis.queue_key.clone(),
        ))
    }

    pub fn resolver(&self) -> TenantResolver<PgConnector> {
        TenantResolver::new(self.store(), self.routing_cache(), self.pools.clone())
            .with_lookup_timeout(self.settings.resolver.lookup_timeout())
    }

    pub fn requester(&self) -> ProvisioningRequester {
        ProvisioningRequester::new(self.store(), self.queue(), self.routing_cache())
            .with_store_timeout(self.settings.resolver.lookup_timeout())
    }

    /// Worker that creates databases through the administrative pool.
    pub fn worker(&self) -> BootstrapResult<ProvisioningWorker> {
        let admin = self
            .pools
            .admin_pool()
            .cloned()
            .ok_or(BootstrapError::MissingAdminPool)?;
        let tenant = tenant_template(&self.settings.tenant);

        let provisioner = PgDatabaseProvisioner::new(admin, tenant.server)
            .with_grant_role(self.settings.tenant.grant_role.clone())
            .with_connect_timeout(tenant.connect_timeout);

        Ok(
            ProvisioningWorker::new(self.queue(), self.store(), Arc::new(provisioner))
                .with_config(worker_config(&self.settings)),
        )
    }

    /// Round-trip to the control plane, the admin database and Redis.
    pub async fn health_check(&self) -> BootstrapResult<()> {
        self.pools.control_plane().ping().await?;
        if let Some(admin) = self.pools.admin_pool() {
            admin.ping().await?;
        }
        self.redis.health_check().await?;
        Ok(())
    }

    /// Close every pool. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.pools.shutdown().await;
        info!("Data plane shut down");
    }
}
