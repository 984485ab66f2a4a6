//! Message queue abstraction with at-least-once delivery.
//!
//! Producers publish JSON envelopes to named queues; consumers receive,
//! process, and either complete (remove) or abandon (redeliver) each
//! message. A received message that is neither completed nor abandoned
//! becomes visible again once its lock expires, so consumers must tolerate
//! duplicate deliveries.

#[cfg(feature = "amqp-broker")]
pub mod amqp;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryQueue;

/// Errors from the queue transport.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Transport unreachable or temporarily failing; safe to retry.
    #[error("queue transport unavailable: {0}")]
    Unavailable(String),

    /// Caller-side misuse (unknown queue, stale receipt, bad URL); retrying
    /// the same call will not help.
    #[error("malformed queue request: {0}")]
    Malformed(String),
}

/// Opaque handle identifying one received-but-unsettled message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle {
    pub queue: String,
    pub id: u64,
}

/// A message received from a queue, owned by the consumer until settled.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt: ReceiptHandle,
    /// How many times this message has been delivered, this delivery
    /// included.
    pub delivery_count: u32,
}

/// Durability knobs shared by all transports.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// How long a received message stays invisible before redelivery.
    pub lock_duration: Duration,
    /// Deliveries after which the transport drops a message outright.
    pub max_delivery_count: u32,
    /// Messages older than this are expired without delivery.
    pub message_ttl: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(300),
            max_delivery_count: 10,
            message_ttl: Duration::from_secs(14 * 24 * 3600),
        }
    }
}

/// Named, durable, at-least-once delivery channels.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Provision a queue. Creating an already-existing queue succeeds
    /// silently; every queue must exist before publish or receive.
    async fn ensure_queue(&self, queue: &str) -> Result<(), QueueError>;

    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError>;

    /// Block up to `max_wait` and return zero or more messages. An empty
    /// result is not an error.
    async fn receive(
        &self,
        queue: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a received message from the queue.
    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Return a received message to the queue for redelivery.
    async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Cheap connectivity probe used by the health supervisor.
    async fn check_connection(&self) -> Result<(), QueueError>;
}

/// Construct a transport from a connection string.
///
/// `memory://` gives the in-process transport; `amqp://` requires the
/// `amqp-broker` feature.
pub async fn connect(
    url: &str,
    settings: QueueSettings,
) -> Result<Arc<dyn QueueTransport>, QueueError> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(MemoryQueue::new(settings)));
    }
    #[cfg(feature = "amqp-broker")]
    if url.starts_with("amqp://") || url.starts_with("amqps://") {
        return Ok(Arc::new(amqp::AmqpTransport::connect(url, settings).await?));
    }
    Err(QueueError::Malformed(format!(
        "unsupported queue transport url: {url}"
    )))
}
