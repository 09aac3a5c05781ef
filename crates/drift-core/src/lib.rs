//! drift-core: shared components for the drift ingest side and the floe consumer.
//!
//! - `storage/` - [`BlobStore`] contract over `object_store` backends
//! - `queue/` - at-least-once [`Queue`] contract with memory and directory backends
//! - `message` - the [`PointerMessage`] handed from producer to consumer
//! - `metrics/` - Prometheus metrics infrastructure
//! - `config/` - YAML loading, environment variable interpolation, shared config types
//! - `disk` - free disk space probes used for admission control
//! - `signal` - signal handling for graceful shutdown
//! - `tracing` - log subscriber setup

pub mod config;
pub mod disk;
pub mod error;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod signal;
pub mod storage;
pub mod tracing;

pub use config::{
    BlobStoreConfig, CliArgs, ConfigPath, KB, MB, MetricsConfig, QueueConfig, RetryConfig,
};
pub use disk::{DiskSpace, StaticDiskSpace, SysinfoDiskSpace};
pub use error::{ConfigError, MessageError, MetricsError, QueueError, StorageError};
pub use message::PointerMessage;
pub use self::metrics::{init_global as init_metrics, init_test as init_metrics_test};
pub use queue::{Delivery, DirectoryQueue, MemoryQueue, Queue, QueueRef, Receipt, open_queue};
pub use signal::{cancel_on_signal, shutdown_signal};
pub use storage::{BlobStore, BlobStoreRef, ObjectBlobStore};
pub use self::tracing::init_tracing;
