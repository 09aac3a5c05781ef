//! Drift: multi-tenant JSON ingest.
//!
//! This crate handles:
//! - Flattening nested JSON documents into rows (horizontal, vertical, multi-table)
//! - Buffering rows in per-`(destination, table)` rotating NDJSON files on local disk
//! - Handing closed files off to blob storage and announcing them on a queue
//! - Recovering files left in the scratch directory by an earlier run

pub mod buffer;
pub mod config;
pub mod error;
pub mod flatten;
pub mod handoff;
pub mod ingest;
pub mod metrics;
pub mod service;

// Re-export commonly used items
pub use buffer::{ClosedFile, IngestBuffer, IngestKey, RotationReason};
pub use config::Config;
pub use error::{BufferError, DriftError, FlattenError, HandoffError, IngestError};
pub use flatten::{FlatRecord, FlatRow, Flattener, FlattenerRegistry, Flatteners};
pub use handoff::{HandoffProducer, HandoffStats};
pub use ingest::{IngestReport, Ingestor, ROW_ID_COLUMN};
pub use service::Drift;

// Re-export from drift-core
pub use drift_core::{
    BlobStore, BlobStoreRef, CliArgs, ObjectBlobStore, Queue, QueueRef, init_metrics,
    init_tracing, open_queue, shutdown_signal,
};
