//! Provisioning worker
//!
//! Single background loop that turns `provisioning` tenants into usable
//! databases: dequeue, create the database, apply the schema, flip status.

use crate::error::{ProvisionError, ProvisionResult};
use crate::provisioner::DatabaseProvisioner;
use silo_db::naming::DEFAULT_TENANT_PREFIX;
use silo_db::tenant_database_name;
use silo_queue::{Delivery, ProvisioningMessage, ProvisioningQueue};
use silo_tenancy::{ControlPlaneStore, TenantStatus};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Longest blocking wait per dequeue; bounds shutdown latency when idle.
    pub dequeue_timeout: Duration,

    /// Pause after a failed dequeue
    pub error_backoff: Duration,

    /// Deadline for each store call and provisioning step
    pub step_timeout: Duration,

    /// Prefix of physical tenant database names
    pub database_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            step_timeout: Duration::from_secs(60),
            database_prefix: DEFAULT_TENANT_PREFIX.to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn database_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.database_prefix = prefix.into();
        self
    }
}

/// What happened to one dequeued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Database created, schema applied, tenant active.
    Provisioned { tenant_id: Uuid, database: String },
    /// A step failed; the tenant is marked `failed`.
    Failed { tenant_id: Uuid, reason: String },
    /// The payload could not be decoded and was discarded.
    Dropped { reason: String },
    /// The tenant is gone or no longer `provisioning`; nothing was done.
    Skipped {
        tenant_id: Uuid,
        status: Option<TenantStatus>,
    },
}

/// Counters since the worker was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub provisioned: u64,
    pub failed: u64,
    pub dropped: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    provisioned: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
}

/// Consumes provisioning messages and builds tenant databases.
pub struct ProvisioningWorker {
    queue: Arc<dyn ProvisioningQueue>,
    store: Arc<dyn ControlPlaneStore>,
    provisioner: Arc<dyn DatabaseProvisioner>,
    config: WorkerConfig,
    counters: Counters,
    running: AtomicBool,
}

impl ProvisioningWorker {
    pub fn new(
        queue: Arc<dyn ProvisioningQueue>,
        store: Arc<dyn ControlPlaneStore>,
        provisioner: Arc<dyn DatabaseProvisioner>,
    ) -> Self {
        Self {
            queue,
            store,
            provisioner,
            config: WorkerConfig::default(),
            counters: Counters::default(),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            provisioned: self.counters.provisioned.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker loop on the current runtime.
    ///
    /// Dropping the returned handle without calling [`WorkerHandle::stop`]
    /// also stops the loop at its next check.
    pub fn start(self: &Arc<Self>) -> ProvisionResult<WorkerHandle> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProvisionError::AlreadyRunning);
        }

        let (shutdown, rx) = watch::channel(false);
        let worker = Arc::clone(self);
        let task = tokio::spawn(async move {
            worker.run(rx).await;
            worker.running.store(false, Ordering::SeqCst);
        });

        Ok(WorkerHandle { shutdown, task })
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown is observed between messages; a message being provisioned
    /// is always finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            dequeue_timeout_ms = self.config.dequeue_timeout.as_millis() as u64,
            "Provisioning worker started"
        );

        while !stopping(&shutdown) {
            match self.poll_once().await {
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.config.error_backoff.as_millis() as u64,
                        "Failed to read provisioning queue"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!(stats = ?self.stats(), "Provisioning worker stopped");
    }

    /// Dequeue and process at most one message.
    ///
    /// Returns `Ok(None)` when the wait elapsed with an empty queue. Only a
    /// dequeue failure is an error; processing failures are outcomes.
    pub async fn poll_once(&self) -> ProvisionResult<Option<ProcessOutcome>> {
        match self.queue.dequeue(self.config.dequeue_timeout).await? {
            Some(delivery) => Ok(Some(self.process_delivery(&delivery).await)),
            None => Ok(None),
        }
    }

    pub async fn process_delivery(&self, delivery: &Delivery) -> ProcessOutcome {
        match delivery.decode() {
            Ok(message) => self.process_message(&message).await,
            Err(e) => {
                warn!(
                    error = %e,
                    bytes = delivery.payload.len(),
                    "Dropping malformed provisioning message"
                );
                self.record(ProcessOutcome::Dropped {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Provision the tenant named by `message`.
    pub async fn process_message(&self, message: &ProvisioningMessage) -> ProcessOutcome {
        let tenant_id = message.tenant_id;

        match self
            .bounded("tenant lookup", self.store.find_by_id(tenant_id))
            .await
        {
            Ok(Some(tenant)) if tenant.status != TenantStatus::Provisioning => {
                info!(
                    tenant_id = %tenant_id,
                    status = %tenant.status,
                    "Tenant is no longer provisioning, skipping message"
                );
                return self.record(ProcessOutcome::Skipped {
                    tenant_id,
                    status: Some(tenant.status),
                });
            }
            Ok(None) => {
                warn!(tenant_id = %tenant_id, "Tenant for provisioning message does not exist");
                return self.record(ProcessOutcome::Skipped {
                    tenant_id,
                    status: None,
                });
            }
            Ok(Some(_)) => {}
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Could not re-read tenant, provisioning anyway"
                );
            }
        }

        info!(
            tenant_id = %tenant_id,
            routing_code = %message.routing_code,
            database_code = %message.database_code,
            queued_for_ms = message.age().num_milliseconds(),
            "Provisioning tenant"
        );

        match self.provision(message).await {
            Ok(database) => {
                info!(tenant_id = %tenant_id, database = %database, "Tenant provisioned");
                self.record(ProcessOutcome::Provisioned {
                    tenant_id,
                    database,
                })
            }
            Err(e) => {
                error!(
                    tenant_id = %tenant_id,
                    routing_code = %message.routing_code,
                    database_code = %message.database_code,
                    error = %e,
                    "Tenant provisioning failed"
                );
                self.mark_failed(tenant_id).await;
                self.record(ProcessOutcome::Failed {
                    tenant_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn provision(&self, message: &ProvisioningMessage) -> ProvisionResult<String> {
        let database = tenant_database_name(&self.config.database_prefix, &message.database_code)
            .map_err(|e| ProvisionError::InvalidCode(e.to_string()))?;

        debug!(database = %database, "Creating tenant database");
        self.bounded("create database", self.provisioner.create_database(&database))
            .await?;

        debug!(database = %database, "Applying tenant schema");
        self.bounded("apply schema", self.provisioner.apply_schema(&database))
            .await?;

        let updated = self
            .bounded(
                "status update",
                self.store.update_status(message.tenant_id, TenantStatus::Active),
            )
            .await?;
        if !updated {
            warn!(tenant_id = %message.tenant_id, "Tenant row disappeared during provisioning");
        }

        Ok(database)
    }

    async fn mark_failed(&self, tenant_id: Uuid) {
        let result = self
            .bounded(
                "status update",
                self.store.update_status(tenant_id, TenantStatus::Failed),
            )
            .await;
        if let Err(e) = result {
            error!(tenant_id = %tenant_id, error = %e, "Failed to mark tenant as failed");
        }
    }

    fn record(&self, outcome: ProcessOutcome) -> ProcessOutcome {
        let counter = match &outcome {
            ProcessOutcome::Provisioned { .. } => &self.counters.provisioned,
            ProcessOutcome::Failed { .. } => &self.counters.failed,
            ProcessOutcome::Dropped { .. } => &self.counters.dropped,
            ProcessOutcome::Skipped { .. } => &self.counters.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    async fn bounded<T, E>(
        &self,
        step: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> ProvisionResult<T>
    where
        ProvisionError: From<E>,
    {
        match tokio::time::timeout(self.config.step_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProvisionError::Timeout(step)),
        }
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Handle to a spawned worker loop.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Provisioning worker task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
