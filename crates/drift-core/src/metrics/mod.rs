//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types for blob store and queue operations
//! - `server`: Prometheus HTTP server and initialization

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test};

/// Macro for emitting metric events.
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding Prometheus metric.
///
/// ```ignore
/// use drift_core::metrics::events::{QueueOperation, QueueRequest};
///
/// emit!(QueueRequest { operation: QueueOperation::Enqueue, success: true });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
