//! Error types for the drift ingest side.

use std::path::PathBuf;

use snafu::prelude::*;

pub use drift_core::error::{ConfigError, MessageError, MetricsError, QueueError, StorageError};

/// Errors produced while flattening a single document.
///
/// Both variants mean the document is not acceptable input. They are kept
/// apart only so the log line says which it was.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FlattenError {
    /// The document text is not valid JSON.
    #[snafu(display("Invalid JSON: {source}"))]
    InvalidJson { source: serde_json::Error },

    /// The document parsed, but its root is not an object.
    #[snafu(display("Invalid JSON: document root must be an object, got {kind}"))]
    NonObjectRoot { kind: &'static str },
}

/// Errors from the ingest buffer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BufferError {
    /// Admission control rejected the write; nothing was changed.
    #[snafu(display(
        "Disk full: {available_bytes} bytes free under {}, {required_bytes} required",
        path.display()
    ))]
    DiskFull {
        path: PathBuf,
        available_bytes: u64,
        required_bytes: u64,
    },

    /// A single row is bigger than a whole buffer file may be.
    #[snafu(display("Row of {size} bytes exceeds max file size of {limit} bytes"))]
    RowTooLarge { size: u64, limit: u64 },

    /// Destination id or table name is not usable as a path segment.
    #[snafu(display("Invalid {field} '{value}': {reason}"))]
    InvalidKey {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The buffer no longer accepts writes.
    #[snafu(display("Ingest buffer is shutting down"))]
    ShuttingDown,

    #[snafu(display("Failed to create directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to open buffer file {}: {source}", path.display()))]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to append to buffer file {}: {source}", path.display()))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Closing a full/aged file failed. The file and its rows stay on disk.
    #[snafu(display("Failed to rotate buffer file {}: {source}", path.display()))]
    RotationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to scan scratch directory {}: {source}", path.display()))]
    ScanScratch {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl BufferError {
    /// Whether this error is a backpressure signal the caller should see.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, BufferError::DiskFull { .. } | BufferError::ShuttingDown)
    }
}

/// Errors from one handoff attempt. All of them are retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HandoffError {
    #[snafu(display("Failed to read closed file {}: {source}", path.display()))]
    ReadClosedFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Upload of {blob_key} failed: {source}"))]
    UploadFailed {
        blob_key: String,
        source: StorageError,
    },

    #[snafu(display("Failed to encode pointer message: {source}"))]
    EncodeMessage { source: MessageError },

    #[snafu(display("Enqueue of pointer to {blob_key} failed: {source}"))]
    EnqueueFailed {
        blob_key: String,
        source: QueueError,
    },
}

impl HandoffError {
    pub fn stage(&self) -> &'static str {
        match self {
            HandoffError::ReadClosedFile { .. } => "read",
            HandoffError::UploadFailed { .. } => "upload",
            HandoffError::EncodeMessage { .. } | HandoffError::EnqueueFailed { .. } => "enqueue",
        }
    }
}

/// Errors returned to an ingest caller.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// The request body is not valid JSON at all.
    #[snafu(display("Invalid request body: {source}"))]
    InvalidBody { source: serde_json::Error },

    /// The body was a single document and it could not be flattened.
    #[snafu(display("{source}"))]
    Document { source: FlattenError },

    /// The destination is not in the configured allow-list.
    #[snafu(display("Unknown destination '{destination_id}'"))]
    UnknownDestination { destination_id: String },

    #[snafu(display("Failed to encode row: {source}"))]
    EncodeRow { source: serde_json::Error },

    #[snafu(display("{source}"))]
    Buffer { source: BufferError },
}

/// Top-level errors for wiring up and running the drift service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DriftError {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("Blob store error: {source}"))]
    BlobStore { source: StorageError },

    #[snafu(display("Queue error: {source}"))]
    OpenQueue { source: QueueError },

    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    #[snafu(display("Scratch recovery failed: {source}"))]
    Recovery { source: BufferError },

    #[snafu(display("Failed to read input: {source}"))]
    ReadInput { source: std::io::Error },
}
