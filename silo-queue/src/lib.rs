//! # Silo Queue
//!
//! The provisioning queue: the only channel through which the worker learns
//! about newly registered tenants.
//!
//! Producers `enqueue` a [`ProvisioningMessage`]; the worker `dequeue`s raw
//! [`Delivery`] payloads with a bounded blocking wait and decodes them itself,
//! so payloads that can never decode can be dropped instead of retried.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use silo_queue::{ProvisioningMessage, ProvisioningQueue, RedisProvisioningQueue, DEFAULT_QUEUE_KEY};
//!
//! let queue = RedisProvisioningQueue::new(redis, DEFAULT_QUEUE_KEY);
//! queue.enqueue(&ProvisioningMessage::new(tenant_id, "3f2a9c", "FR34JJO390G")).await?;
//!
//! if let Some(delivery) = queue.dequeue(Duration::from_secs(5)).await? {
//!     let message = delivery.decode()?;
//! }
//! ```

mod error;
mod message;
mod queue;

pub use error::{QueueError, QueueResult};
pub use message::{Delivery, ProvisioningMessage};
pub use queue::{DEFAULT_QUEUE_KEY, MemoryQueue, ProvisioningQueue, RedisProvisioningQueue};
