//! Common error types shared between drift and floe.
//!
//! This module defines error types for blob storage, queueing, configuration
//! and metrics operations that are used by both crates.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during blob storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// The requested blob does not exist.
    #[snafu(display("Blob not found: {path}"))]
    NotFound { path: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error: {source}"))]
    AzureConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound { .. } => true,
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Queue Errors ============

/// Errors that can occur while talking to a handoff queue.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Filesystem operation on a directory-backed queue failed.
    #[snafu(display("Queue IO error at {}: {source}", path.display()))]
    QueueIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Receipt does not belong to an in-flight message.
    #[snafu(display("Unknown or expired receipt: {receipt}"))]
    UnknownReceipt { receipt: String },

    /// The queue has been closed and no longer accepts messages.
    #[snafu(display("Queue is closed"))]
    Closed,
}

// ============ Message Errors ============

/// Errors encoding or decoding handoff messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MessageError {
    /// Message payload could not be serialized.
    #[snafu(display("Failed to encode pointer message: {source}"))]
    Encode { source: serde_json::Error },

    /// Message payload is not a valid pointer message.
    #[snafu(display("Failed to decode pointer message: {source}"))]
    Decode { source: serde_json::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A numeric limit was configured as zero.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroValue { field: String },

    /// Invalid configuration value.
    #[snafu(display("Invalid value for '{field}': {message}"))]
    InvalidValue { field: String, message: String },

    /// Unknown component type referenced from a config file.
    #[snafu(display("Unknown {kind} type '{name}' (known: {known})"))]
    UnknownType {
        kind: String,
        name: String,
        known: String,
    },

    /// Failed to read a config file.
    #[snafu(display("Failed to read config file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Failed to read a config directory.
    #[snafu(display("Failed to read config directory {}: {source}", path.display()))]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file has an extension other than .yaml/.yml.
    #[snafu(display("Unsupported config format: {}", path.display()))]
    UnsupportedFormat { path: PathBuf },

    /// YAML parsing failed.
    #[snafu(display("Failed to parse YAML config: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// The same component key was defined in more than one file.
    #[snafu(display("Duplicate component keys: {}", keys.join(", ")))]
    DuplicateComponents { keys: Vec<String> },

    /// The same singleton section was defined in more than one file.
    #[snafu(display("Section '{section}' is defined in more than one config file"))]
    DuplicateSection { section: String },

    /// Multiple errors accumulated while loading several files.
    #[snafu(display("Failed to load configuration:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to install the Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics were already initialized.
    #[snafu(display("Metrics already initialized"))]
    AlreadyInitialized,

    /// Metrics have not been initialized.
    #[snafu(display("Metrics not initialized"))]
    NotInitialized,

    /// Invalid metrics bind address.
    #[snafu(display("Invalid metrics address '{address}': {source}"))]
    InvalidAddress {
        address: String,
        source: std::net::AddrParseError,
    },
}
