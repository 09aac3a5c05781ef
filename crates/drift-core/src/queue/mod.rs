//! Handoff queue contract and backends.
//!
//! Delivery is at-least-once with no ordering guarantee. A dequeued message is
//! leased: it stays invisible until it is acked, nacked, or its visibility
//! timeout lapses, after which it is delivered again.

mod directory;
mod memory;

pub use directory::DirectoryQueue;
pub use memory::MemoryQueue;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::QueueError;

/// Opaque handle identifying one lease on a dequeued message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(pub(crate) String);

impl std::fmt::Display for Receipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A leased message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub payload: Bytes,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

#[async_trait]
pub trait Queue: Send + Sync + std::fmt::Debug {
    async fn enqueue(&self, message: Bytes) -> Result<(), QueueError>;

    /// Lease the next visible message. Never blocks waiting for one.
    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError>;

    /// Remove a leased message for good.
    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError>;

    /// Release a lease early so the message is redelivered.
    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError>;

    /// Messages waiting to be leased.
    async fn pending(&self) -> Result<usize, QueueError>;
}

/// A reference-counted queue.
pub type QueueRef = Arc<dyn Queue>;

/// Open the queue backend selected by configuration.
pub async fn open_queue(config: &QueueConfig) -> Result<QueueRef, QueueError> {
    let visibility_timeout = config.visibility_timeout();
    let queue: QueueRef = match config {
        QueueConfig::Memory { .. } => Arc::new(MemoryQueue::new(visibility_timeout)),
        QueueConfig::Directory { path, .. } => {
            Arc::new(DirectoryQueue::open(path, visibility_timeout).await?)
        }
    };
    Ok(queue)
}
