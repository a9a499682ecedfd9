//! Error types for the worker binary.

use silo::BootstrapError;
use silo::config::ConfigError;
use silo::log::LogError;
use silo::provision::ProvisionError;
use silo::tenancy::TenantError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Logging setup failed: {0}")]
    Log(#[from] LogError),

    #[error("Invalid settings: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("Control-plane migration failed: {0}")]
    Migrate(#[from] TenantError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}
