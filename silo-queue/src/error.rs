//! Error types for queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis transport error
    #[error("Redis error: {0}")]
    Redis(#[from] silo_redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload that can never be decoded into a message
    #[error("Malformed message: {reason}")]
    Malformed {
        /// Raw payload as popped from the queue
        payload: String,
        /// Why decoding failed
        reason: String,
    },

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Queue backend unavailable
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Whether the operation may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Redis(e) => e.is_transient(),
            QueueError::Timeout | QueueError::Unavailable(_) => true,
            QueueError::Serialization(_) | QueueError::Malformed { .. } => false,
        }
    }
}
