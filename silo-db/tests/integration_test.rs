//! Integration tests for silo-db

use silo_db::memory::{MemoryConnector, MemoryServer};
use silo_db::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

async fn manager_with(
    server: Arc<MemoryServer>,
    delay: Duration,
) -> ConnectionPoolManager<MemoryConnector> {
    server.create_database("silo_control").ok();
    ConnectionPoolManager::connect(
        MemoryConnector::new(server).with_delay(delay),
        &PoolConfig::new("memory://silo_control", "silo_control"),
        None,
        TenantPoolTemplate::default(),
    )
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_opens_one_pool() {
    let server = Arc::new(MemoryServer::with_databases(["db_tenant_3f2a9c"]));
    let manager = Arc::new(manager_with(server.clone(), Duration::from_millis(50)).await);
    let baseline = server.connect_count();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_or_create_tenant_pool("3f2a9c").await })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let pool = handle.await.unwrap().unwrap();
        ids.insert(pool.id());
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(server.connect_count() - baseline, 1);
    assert_eq!(manager.tenant_pool_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_leave_registry_clean() {
    let server = Arc::new(MemoryServer::new());
    let manager = Arc::new(manager_with(server.clone(), Duration::from_millis(10)).await);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_or_create_tenant_pool("missing").await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }
    assert_eq!(manager.tenant_pool_count(), 0);
    assert!(!manager.has_tenant_pool("missing"));
}

#[tokio::test]
async fn test_shutdown_during_creation_does_not_leak() {
    let server = Arc::new(MemoryServer::with_databases(["db_tenant_slow"]));
    let manager = Arc::new(manager_with(server.clone(), Duration::from_millis(100)).await);

    let creating = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get_or_create_tenant_pool("slow").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.shutdown().await;

    let result = creating.await.unwrap();
    assert!(matches!(result, Err(DbError::ShutDown)));
    assert_eq!(manager.tenant_pool_count(), 0);
}

#[test]
fn test_tenant_database_naming() {
    assert_eq!(
        tenant_database_name("db_tenant_", "FR34-JJO").unwrap(),
        "db_tenant_fr34_jjo"
    );
    assert_eq!(quote_identifier("db_tenant_a"), "\"db_tenant_a\"");
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL on localhost:5432"]
async fn test_pg_pool_roundtrip() {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost:5432/postgres".to_string());
    let pool = PgPool::connect(PoolConfig::new(url, "postgres").pool_size(2).min_idle(1))
        .await
        .unwrap();

    pool.ping().await.unwrap();
    pool.batch_execute("SELECT 1; SELECT 2;").await.unwrap();
    assert_eq!(pool.status().max_size, 2);

    pool.close();
    assert!(pool.is_closed());
}
