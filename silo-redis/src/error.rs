//! Redis errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedisError>;

#[derive(Debug, Error)]
pub enum RedisError {
    /// The server could not be reached or stopped answering.
    #[error("Redis connection failed: {0}")]
    Connection(String),

    /// No pooled connection could be checked out.
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Invalid Redis configuration: {0}")]
    Config(String),

    #[error("Redis command timed out")]
    Timeout,

    #[error("Redis command failed: {0}")]
    Command(#[from] redis::RedisError),
}

impl RedisError {
    /// Whether trying again later could succeed (network, pool or deadline trouble).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Pool(_) | Self::Timeout => true,
            Self::Command(err) => {
                err.is_io_error()
                    || err.is_timeout()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
            }
            Self::Config(_) => false,
        }
    }
}

impl From<bb8::RunError<redis::RedisError>> for RedisError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::TimedOut => Self::Timeout,
            bb8::RunError::User(e) => Self::Pool(e.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for RedisError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RedisError::Timeout.is_transient());
        assert!(RedisError::Pool("exhausted".into()).is_transient());
        assert!(RedisError::Connection("refused".into()).is_transient());
        assert!(!RedisError::Config("bad url".into()).is_transient());
    }

    #[test]
    fn test_checkout_timeout_maps_to_timeout() {
        let err: RedisError = bb8::RunError::<redis::RedisError>::TimedOut.into();
        assert!(matches!(err, RedisError::Timeout));
    }
}
