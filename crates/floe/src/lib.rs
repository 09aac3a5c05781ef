//! Floe: loads batches handed off by drift into destination tables.
//!
//! This crate handles:
//! - Leasing pointer messages from the handoff queue and downloading their blobs
//! - Inferring column types per batch and evolving tables additively
//! - The destination contract with in-memory and filesystem backends
//! - A worker pool with disk admission and graceful shutdown

pub mod config;
pub mod consumer;
pub mod destination;
pub mod error;
pub mod metrics;
pub mod schema;
pub mod service;

// Re-export commonly used items
pub use config::Config;
pub use consumer::{Consumer, ConsumerPool, ConsumerStats, Processed};
pub use destination::{
    Destination, DestinationManager, DestinationRef, DestinationRegistry, FilesystemDestination,
    MemoryDestination,
};
pub use error::{ConsumerError, DestinationError, FloeError, SchemaError};
pub use schema::{InferredSchema, ScalarType, SchemaEvolutionMode, infer_types};
pub use service::Floe;

// Re-export from drift-core
pub use drift_core::{
    BlobStore, BlobStoreRef, CliArgs, ObjectBlobStore, Queue, QueueRef, cancel_on_signal,
    init_metrics, init_tracing, open_queue, shutdown_signal,
};
