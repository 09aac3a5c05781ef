//! Metrics for the load side: batches, schema changes and consumer failures.

pub mod events;

pub use events::*;

/// Macro for emitting floe metric events.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}
