//! In-process stand-ins for a Postgres server.
//!
//! Used by tests across the workspace to exercise pool lifecycle and
//! provisioning without a live database.

use crate::{DbError, DbResult, PoolConfig, PoolConnector};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A fake server: a set of databases plus call counters.
#[derive(Debug, Default)]
pub struct MemoryServer {
    databases: Mutex<HashSet<String>>,
    schemas: Mutex<HashMap<String, usize>>,
    connects: AtomicUsize,
    creates: AtomicUsize,
    next_pool: AtomicU64,
    fail_close: AtomicBool,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server that already hosts `names`.
    pub fn with_databases<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let server = Self::default();
        server
            .databases
            .lock()
            .extend(names.into_iter().map(Into::into));
        server
    }

    /// `CREATE DATABASE`; fails if the name is taken.
    pub fn create_database(&self, name: &str) -> DbResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut databases = self.databases.lock();
        if !databases.insert(name.to_string()) {
            return Err(DbError::Connection(format!(
                "database \"{}\" already exists",
                name
            )));
        }
        Ok(())
    }

    pub fn drop_database(&self, name: &str) -> bool {
        self.schemas.lock().remove(name);
        self.databases.lock().remove(name)
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.databases.lock().contains(name)
    }

    /// Record a schema application against `name`.
    pub fn apply_schema(&self, name: &str) -> DbResult<()> {
        if !self.has_database(name) {
            return Err(missing(name));
        }
        *self.schemas.lock().entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    /// How many times a schema was applied to `name`.
    pub fn schema_applications(&self, name: &str) -> usize {
        self.schemas.lock().get(name).copied().unwrap_or(0)
    }

    /// Successful and failed pool opens.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// `CREATE DATABASE` attempts, including failed ones.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Make every subsequent pool close fail.
    pub fn fail_closes(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

fn missing(name: &str) -> DbError {
    DbError::Connection(format!("FATAL: database \"{}\" does not exist", name))
}

/// Pool handle issued by [`MemoryConnector`].
#[derive(Debug, Clone)]
pub struct MemoryPool {
    id: u64,
    database: String,
    closed: Arc<AtomicBool>,
}

impl MemoryPool {
    /// Unique per physical pool; clones share it.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stand-in for running a query on a pooled connection.
    pub fn ping(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::Pool(format!("pool for {} is closed", self.database)));
        }
        Ok(())
    }
}

/// Connector that opens [`MemoryPool`]s against a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: Arc<MemoryServer>,
    delay: Duration,
}

impl MemoryConnector {
    pub fn new(server: Arc<MemoryServer>) -> Self {
        Self {
            server,
            delay: Duration::ZERO,
        }
    }

    /// Simulated connection latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }
}

#[async_trait]
impl PoolConnector for MemoryConnector {
    type Pool = MemoryPool;

    async fn connect(&self, config: &PoolConfig) -> DbResult<MemoryPool> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.server.connects.fetch_add(1, Ordering::SeqCst);

        if !self.server.has_database(&config.database) {
            return Err(missing(&config.database));
        }

        Ok(MemoryPool {
            id: self.server.next_pool.fetch_add(1, Ordering::SeqCst),
            database: config.database.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn close(&self, pool: &MemoryPool) -> DbResult<()> {
        if self.server.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::Connection(format!(
                "failed to close pool for {}",
                pool.database
            )));
        }
        pool.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
