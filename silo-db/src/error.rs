//! Error types for database access.

use diesel_async::pooled_connection::deadpool::PoolError;
use thiserror::Error;

/// Errors that can occur when opening or using database pools.
#[derive(Error, Debug)]
pub enum DbError {
    /// Database connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection pool error.
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query execution error.
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The pool registry has been shut down.
    #[error("Connection pool manager is shut down")]
    ShutDown,
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Whether the target database does not exist (SQLSTATE `3D000`).
    pub fn is_missing_database(&self) -> bool {
        let message = match self {
            DbError::Connection(msg) | DbError::Pool(msg) => msg.as_str(),
            DbError::Query(diesel::result::Error::DatabaseError(_, info)) => info.message(),
            _ => return false,
        };
        message.contains("database") && message.contains("does not exist")
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Timeout(_) | DbError::Pool(_)) && !self.is_missing_database()
    }
}

impl From<PoolError> for DbError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Backend(e) => DbError::Connection(e.to_string()),
            PoolError::Timeout(_) => DbError::Timeout("waiting for a pooled connection".into()),
            other => DbError::Pool(other.to_string()),
        }
    }
}

impl From<diesel::ConnectionError> for DbError {
    fn from(err: diesel::ConnectionError) -> Self {
        DbError::Connection(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for DbError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DbError::Timeout("operation deadline elapsed".into())
    }
}
