//! Error types for the floe consumer.

use std::path::PathBuf;

use snafu::prelude::*;

pub use drift_core::error::{ConfigError, MessageError, MetricsError, QueueError, StorageError};

/// Errors from a destination backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DestinationError {
    #[snafu(display("Table '{table}' does not exist"))]
    TableNotFound { table: String },

    /// A column already exists with another type. Existing columns are never altered.
    #[snafu(display(
        "Column '{column}' of table '{table}' already exists as {existing}, not {requested}"
    ))]
    ColumnExists {
        table: String,
        column: String,
        existing: String,
        requested: String,
    },

    #[snafu(display("Unsupported query '{query}': expected 'select * from <table> [limit <n>]'"))]
    InvalidQuery { query: String },

    #[snafu(display("Invalid table name '{table}'"))]
    InvalidTableName { table: String },

    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("JSON error: {source}"))]
    Json { source: serde_json::Error },

    #[snafu(display("Failed to write query output: {source}"))]
    WriteOutput { source: std::io::Error },

    #[snafu(display("Failed to write CSV output: {source}"))]
    Csv { source: csv::Error },

    #[snafu(display("Invalid settings for {kind} destination: {message}"))]
    InvalidSettings { kind: String, message: String },
}

/// Errors from applying the schema evolution policy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchemaError {
    #[snafu(display(
        "Strict schema evolution: batch would add columns [{}] to table '{table}'",
        columns.join(", ")
    ))]
    NewColumnsRejected { table: String, columns: Vec<String> },
}

/// Errors from processing one pointer message.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConsumerError {
    #[snafu(display("Undecodable pointer message: {source}"))]
    Decode { source: MessageError },

    #[snafu(display("Unknown destination '{destination_id}'"))]
    UnknownDestination { destination_id: String },

    #[snafu(display("Failed to open destination '{destination_id}': {source}"))]
    OpenDestination {
        destination_id: String,
        source: DestinationError,
    },

    #[snafu(display("Failed to download {blob_key}: {source}"))]
    Download {
        blob_key: String,
        source: StorageError,
    },

    #[snafu(display("Failed to read downloaded batch {}: {source}", path.display()))]
    ReadBatch {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to prepare table '{table}': {source}"))]
    PrepareTable {
        table: String,
        source: DestinationError,
    },

    #[snafu(display("Schema evolution failed: {source}"))]
    SchemaEvolutionFailed { source: SchemaError },

    #[snafu(display("Insert into '{table}' failed: {source}"))]
    InsertFailed {
        table: String,
        source: DestinationError,
    },

    #[snafu(display("Queue error: {source}"))]
    Queue { source: QueueError },
}

impl ConsumerError {
    /// Pipeline stage that failed, used as a metric label.
    pub fn stage(&self) -> &'static str {
        match self {
            ConsumerError::Decode { .. } => "decode",
            ConsumerError::UnknownDestination { .. } | ConsumerError::OpenDestination { .. } => {
                "destination"
            }
            ConsumerError::Download { .. } | ConsumerError::ReadBatch { .. } => "download",
            ConsumerError::PrepareTable { .. } => "create_columns",
            ConsumerError::SchemaEvolutionFailed { .. } => "schema_evolution",
            ConsumerError::InsertFailed { .. } => "insert",
            ConsumerError::Queue { .. } => "queue",
        }
    }

    /// Whether redelivering the message can never help.
    ///
    /// Such messages are acked and logged instead of retried forever.
    pub fn is_poison(&self) -> bool {
        match self {
            ConsumerError::Decode { .. } | ConsumerError::UnknownDestination { .. } => true,
            ConsumerError::Download { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Top-level errors for wiring up and running the floe service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FloeError {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("Blob store error: {source}"))]
    BlobStore { source: StorageError },

    #[snafu(display("Queue error: {source}"))]
    OpenQueue { source: QueueError },

    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    #[snafu(display("Failed to open destinations: {source}"))]
    OpenDestinations { source: ConsumerError },

    #[snafu(display("Failed to create scratch directory {}: {source}", path.display()))]
    CreateScratch {
        path: PathBuf,
        source: std::io::Error,
    },
}
