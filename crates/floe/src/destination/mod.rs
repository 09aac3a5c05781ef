//! Destination contract and built-in backends.
//!
//! A destination stores tables of typed columns. The consumer only ever
//! creates tables, adds columns and appends NDJSON batches; queries are a
//! small read-back surface used for inspection and tests.
//!
//! - [`MemoryDestination`]: process-local tables
//! - [`FilesystemDestination`]: one NDJSON data file and one column catalog per table
//!
//! Backends are looked up by name in a [`DestinationRegistry`] and cached
//! per destination id by a [`DestinationManager`].

mod filesystem;
mod manager;
mod memory;
pub mod query;
mod registry;
mod table;

pub use filesystem::FilesystemDestination;
pub use manager::DestinationManager;
pub use memory::MemoryDestination;
pub use query::{OutputFormat, Query, write_rows};
pub use registry::{DestinationConstructor, DestinationRegistry, DestinationSettings};
pub use table::{Row, Table, coerce};

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::DestinationError;
use crate::schema::InferredSchema;

/// Column every table carries from creation.
pub const ROW_ID_COLUMN: &str = "__row_id";

/// Counters from one `insert_batch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    pub rows: u64,
    /// Lines that were not JSON objects.
    pub skipped_lines: u64,
    /// Fields with no matching column.
    pub dropped_fields: u64,
    /// Values that could not be coerced to their column type.
    pub nulled_values: u64,
}

#[async_trait]
pub trait Destination: Send + Sync + std::fmt::Debug {
    /// Backend name, as registered.
    fn kind(&self) -> &'static str;

    /// Create `table` with only its implicit columns. No-op if it exists.
    async fn create_empty_table(&self, table: &str) -> Result<(), DestinationError>;

    /// Add the missing columns of `columns` to `table`.
    ///
    /// Existing columns are left alone, whatever their type, so calling this
    /// again with the same columns is a no-op. Returns the columns added.
    async fn create_columns(
        &self,
        table: &str,
        columns: &InferredSchema,
    ) -> Result<Vec<String>, DestinationError>;

    /// Append an NDJSON batch, projected onto the table's columns.
    async fn insert_batch(&self, table: &str, rows: Bytes) -> Result<InsertStats, DestinationError>;

    /// Table names.
    async fn tables(&self) -> Result<Vec<String>, DestinationError>;

    /// Columns of `table`, in creation order.
    async fn columns(&self, table: &str) -> Result<InferredSchema, DestinationError>;

    /// Columns and up to `limit` rows of `table`.
    async fn scan(
        &self,
        table: &str,
        limit: Option<usize>,
    ) -> Result<(InferredSchema, Vec<Row>), DestinationError>;

    async fn query(
        &self,
        query: &str,
        format: OutputFormat,
        out: &mut (dyn Write + Send),
    ) -> Result<(), DestinationError> {
        let query = Query::parse(query)?;
        let (columns, rows) = self.scan(&query.table, query.limit).await?;
        write_rows(format, &columns, &rows, out)
    }

    async fn query_json(
        &self,
        query: &str,
        out: &mut (dyn Write + Send),
    ) -> Result<(), DestinationError> {
        self.query(query, OutputFormat::Json, out).await
    }

    async fn query_ndjson(
        &self,
        query: &str,
        out: &mut (dyn Write + Send),
    ) -> Result<(), DestinationError> {
        self.query(query, OutputFormat::Ndjson, out).await
    }

    async fn query_csv(
        &self,
        query: &str,
        out: &mut (dyn Write + Send),
    ) -> Result<(), DestinationError> {
        self.query(query, OutputFormat::Csv, out).await
    }
}

/// A reference-counted destination.
pub type DestinationRef = Arc<dyn Destination>;

/// Table names become file names; keep them to one safe path segment.
pub(crate) fn validate_table_name(table: &str) -> Result<(), DestinationError> {
    let valid = !table.is_empty()
        && table.len() <= 255
        && !table.starts_with('.')
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DestinationError::InvalidTableName {
            table: table.to_string(),
        })
    }
}
