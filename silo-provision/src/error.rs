//! Error types for provisioning.

use silo_db::DbError;
use silo_queue::QueueError;
use silo_tenancy::TenantError;
use thiserror::Error;

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// `CREATE DATABASE`, connecting or applying DDL failed
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Control-plane read or status write failed
    #[error("Control-plane error: {0}")]
    Store(#[from] TenantError),

    /// Dequeue failed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// A step did not finish within the step timeout
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// The database name could not be derived
    #[error("Invalid database code: {0}")]
    InvalidCode(String),

    #[error("Worker is already running")]
    AlreadyRunning,
}
