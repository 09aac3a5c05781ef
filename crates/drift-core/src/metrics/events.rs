//! Internal events for blob store and queue metrics.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

/// Blob store operation kind.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Upload,
    Download,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Upload => "upload",
            StorageOperation::Download => "download",
        }
    }
}

fn status(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Event emitted for each blob store request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub success: bool,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            success = self.success,
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "drift_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => status(self.success)
        )
        .increment(1);
        histogram!(
            "drift_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Queue operation kind.
#[derive(Debug, Clone, Copy)]
pub enum QueueOperation {
    Enqueue,
    Dequeue,
    Ack,
    Nack,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Enqueue => "enqueue",
            QueueOperation::Dequeue => "dequeue",
            QueueOperation::Ack => "ack",
            QueueOperation::Nack => "nack",
        }
    }
}

/// Event emitted for each queue request.
pub struct QueueRequest {
    pub operation: QueueOperation,
    pub success: bool,
}

impl InternalEvent for QueueRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            success = self.success,
            "Queue request"
        );
        counter!(
            "drift_queue_requests_total",
            "operation" => self.operation.as_str(),
            "status" => status(self.success)
        )
        .increment(1);
    }
}

/// Event emitted when an expired lease makes a message visible again.
pub struct QueueRedelivery {
    pub count: u64,
}

impl InternalEvent for QueueRedelivery {
    fn emit(self) {
        trace!(count = self.count, "Queue leases expired");
        counter!("drift_queue_redeliveries_total").increment(self.count);
    }
}
