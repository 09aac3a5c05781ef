//! Metrics for the ingest side: buffering, rotation and handoff.

pub mod events;

pub use events::*;

/// Macro for emitting drift metric events.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}
