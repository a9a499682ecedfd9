//! Provisioning message definition.

use crate::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to build the physical database of a newly registered tenant.
///
/// Encoded on the wire as
/// `{"tenant_id": "...", "database_code": "...", "routing_code": "...", "timestamp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningMessage {
    pub tenant_id: Uuid,
    pub database_code: String,
    pub routing_code: String,
    /// When the request was enqueued.
    pub timestamp: DateTime<Utc>,
}

impl ProvisioningMessage {
    /// Create a message stamped with the current time.
    pub fn new(
        tenant_id: Uuid,
        database_code: impl Into<String>,
        routing_code: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            database_code: database_code.into(),
            routing_code: routing_code.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> QueueResult<String> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Decode a payload. Anything that fails here will fail forever.
    pub fn from_json(payload: &str) -> QueueResult<Self> {
        let malformed = |reason: String| QueueError::Malformed {
            payload: payload.to_string(),
            reason,
        };

        let message: Self = serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
        if message.database_code.trim().is_empty() {
            return Err(malformed("database_code is empty".into()));
        }
        if message.routing_code.trim().is_empty() {
            return Err(malformed("routing_code is empty".into()));
        }
        Ok(message)
    }

    /// Time spent in the queue so far.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }
}

/// A raw payload popped from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    pub fn decode(&self) -> QueueResult<ProvisioningMessage> {
        ProvisioningMessage::from_json(&self.payload)
    }
}
