//! Physical database creation.

use crate::error::{ProvisionError, ProvisionResult};
use crate::schema::{TENANT_SCHEMA, grant_statements};
use async_trait::async_trait;
use silo_db::memory::MemoryServer;
use silo_db::{DbError, PgPool, PoolConfig, ServerTarget, quote_identifier};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Creates tenant databases and applies the tenant schema.
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// `CREATE DATABASE name`. Fails if the name is taken.
    async fn create_database(&self, name: &str) -> ProvisionResult<()>;

    /// Apply the tenant schema to an existing database.
    ///
    /// Must succeed when run again against a provisioned database.
    async fn apply_schema(&self, name: &str) -> ProvisionResult<()>;
}

/// Provisioner backed by a live Postgres server.
///
/// `CREATE DATABASE` goes through the administrative pool; the schema is
/// applied over a short-lived single-connection pool to the new database.
pub struct PgDatabaseProvisioner {
    admin: PgPool,
    target: ServerTarget,
    grant_role: Option<String>,
    connect_timeout: Duration,
}

impl PgDatabaseProvisioner {
    pub fn new(admin: PgPool, target: ServerTarget) -> Self {
        Self {
            admin,
            target,
            grant_role: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Role granted table and sequence privileges after the schema is applied.
    pub fn with_grant_role(mut self, role: Option<String>) -> Self {
        self.grant_role = role;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn run_schema(&self, pool: &PgPool) -> ProvisionResult<()> {
        pool.batch_execute(TENANT_SCHEMA).await?;
        if let Some(role) = &self.grant_role {
            pool.batch_execute(&grant_statements(role)).await?;
            debug!(database = %pool.database(), role = %role, "Granted tenant privileges");
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseProvisioner for PgDatabaseProvisioner {
    async fn create_database(&self, name: &str) -> ProvisionResult<()> {
        self.admin
            .batch_execute(&format!("CREATE DATABASE {}", quote_identifier(name)))
            .await?;
        info!(database = %name, "Database created");
        Ok(())
    }

    async fn apply_schema(&self, name: &str) -> ProvisionResult<()> {
        let config = PoolConfig::new(self.target.url_for(name)?, name)
            .pool_size(1)
            .min_idle(1)
            .connect_timeout(self.connect_timeout);
        let pool = PgPool::connect(config).await?;

        let result = self.run_schema(&pool).await;
        pool.close();
        result?;

        info!(database = %name, "Tenant schema applied");
        Ok(())
    }
}

/// Provisioner over a [`MemoryServer`], for tests.
pub struct MemoryProvisioner {
    server: Arc<MemoryServer>,
    fail_schema: AtomicBool,
}

impl MemoryProvisioner {
    pub fn new(server: Arc<MemoryServer>) -> Self {
        Self {
            server,
            fail_schema: AtomicBool::new(false),
        }
    }

    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }

    /// Make schema application fail until reset.
    pub fn fail_schema(&self, fail: bool) {
        self.fail_schema.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseProvisioner for MemoryProvisioner {
    async fn create_database(&self, name: &str) -> ProvisionResult<()> {
        self.server.create_database(name)?;
        Ok(())
    }

    async fn apply_schema(&self, name: &str) -> ProvisionResult<()> {
        if self.fail_schema.load(Ordering::SeqCst) {
            return Err(ProvisionError::Database(DbError::Query(
                silo_db::diesel::result::Error::RollbackTransaction,
            )));
        }
        self.server.apply_schema(name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_create_is_exclusive() {
        let provisioner = MemoryProvisioner::new(Arc::new(MemoryServer::new()));
        provisioner.create_database("db_tenant_a").await.unwrap();

        let err = provisioner.create_database("db_tenant_a").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(provisioner.server().create_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_schema_reapplies() {
        let provisioner = MemoryProvisioner::new(Arc::new(MemoryServer::new()));
        assert!(provisioner.apply_schema("db_tenant_a").await.is_err());

        provisioner.create_database("db_tenant_a").await.unwrap();
        provisioner.apply_schema("db_tenant_a").await.unwrap();
        provisioner.apply_schema("db_tenant_a").await.unwrap();
        assert_eq!(provisioner.server().schema_applications("db_tenant_a"), 2);

        provisioner.fail_schema(true);
        assert!(provisioner.apply_schema("db_tenant_a").await.is_err());
        assert_eq!(provisioner.server().schema_applications("db_tenant_a"), 2);
    }
}
