//! Ingest entry point: JSON body in, buffered rows out.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use snafu::prelude::*;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::buffer::{IngestBuffer, IngestKey};
use crate::config::DestinationIngestConfig;
use crate::emit;
use crate::error::{
    BufferSnafu, DocumentSnafu, EncodeRowSnafu, IngestError, InvalidBodySnafu,
    UnknownDestinationSnafu,
};
use crate::flatten::{FlatRecord, Flattener, Flatteners};
use crate::metrics::events::DocumentsFlattened;

/// Column stamped on every row so duplicates from redelivery can be spotted.
pub const ROW_ID_COLUMN: &str = "__row_id";

/// A document that could not be flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDocument {
    /// Position in the request body.
    pub index: usize,
    pub error: String,
}

/// Outcome of one ingest request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Documents accepted.
    pub documents: usize,
    /// Rows written to the buffer across all tables.
    pub rows: usize,
    pub rejected: Vec<RejectedDocument>,
}

/// Flattens request bodies and writes the rows through the buffer.
#[derive(Debug, Clone)]
pub struct Ingestor {
    buffer: Arc<IngestBuffer>,
    flatteners: Flatteners,
    destinations: HashMap<String, DestinationIngestConfig>,
}

impl Ingestor {
    /// `destinations` restricts which destination ids are accepted; empty accepts all.
    pub fn new(
        buffer: Arc<IngestBuffer>,
        flatteners: Flatteners,
        destinations: impl IntoIterator<Item = (String, DestinationIngestConfig)>,
    ) -> Self {
        Self {
            buffer,
            flatteners,
            destinations: destinations.into_iter().collect(),
        }
    }

    pub fn buffer(&self) -> &Arc<IngestBuffer> {
        &self.buffer
    }

    /// Flatten `body` (one document or an array of documents) and buffer the rows.
    ///
    /// A document that fails to flatten is reported in [`IngestReport::rejected`]
    /// without affecting the others. Buffer backpressure (`DiskFull`,
    /// `ShuttingDown`) aborts the request; rows of earlier documents stay written.
    /// Free space is checked once per document, so a document turned away for
    /// lack of disk leaves none of its rows in the buffer.
    pub async fn ingest(
        &self,
        destination_id: &str,
        table: &str,
        body: &str,
        strategy: Option<&str>,
    ) -> Result<IngestReport, IngestError> {
        let dest_config = self.destination(destination_id)?;
        // Validate the caller's key before doing any work.
        IngestKey::new(destination_id, table).context(BufferSnafu)?;

        let strategy = strategy.or(dest_config.and_then(|c| c.flatten.as_deref()));
        let flattener = self.flatteners.resolve(strategy);

        let body: Value = serde_json::from_str(body).context(InvalidBodySnafu)?;
        let (documents, single) = match body {
            Value::Array(documents) => (documents, false),
            document => (vec![document], true),
        };

        let mut report = IngestReport::default();
        for (index, document) in documents.into_iter().enumerate() {
            let records = match flattener.flatten_value(table, document) {
                Ok(records) => records,
                Err(source) if single => return Err(source).context(DocumentSnafu),
                Err(e) => {
                    debug!(destination = destination_id, table, index, "Rejected document: {e}");
                    report.rejected.push(RejectedDocument {
                        index,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let lines = match encode_records(destination_id, records) {
                Ok(lines) => lines,
                Err(e) if single => return Err(e),
                Err(e) => {
                    debug!(destination = destination_id, table, index, "Rejected document: {e}");
                    report.rejected.push(RejectedDocument {
                        index,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            self.buffer.write_all(&lines).await.context(BufferSnafu)?;
            report.documents += 1;
            report.rows += lines.len();
        }

        emit!(DocumentsFlattened {
            strategy: flattener.name(),
            accepted: report.documents as u64,
            rejected: report.rejected.len() as u64,
        });
        if !report.rejected.is_empty() {
            warn!(
                destination = destination_id,
                table,
                rejected = report.rejected.len(),
                "Some documents could not be flattened"
            );
        }
        Ok(report)
    }

    fn destination(
        &self,
        destination_id: &str,
    ) -> Result<Option<&DestinationIngestConfig>, IngestError> {
        if self.destinations.is_empty() {
            return Ok(None);
        }
        match self.destinations.get(destination_id) {
            Some(config) => Ok(Some(config)),
            None => UnknownDestinationSnafu { destination_id }.fail(),
        }
    }

    /// Flattener that would be used for a request.
    pub fn flattener_for(&self, destination_id: &str, strategy: Option<&str>) -> Arc<dyn Flattener> {
        let configured = self
            .destinations
            .get(destination_id)
            .and_then(|c| c.flatten.as_deref());
        self.flatteners.resolve(strategy.or(configured))
    }
}

/// Stamp row ids and serialize every record of one document. Any invalid key
/// rejects the whole document before a row reaches the buffer.
fn encode_records(
    destination_id: &str,
    records: Vec<FlatRecord>,
) -> Result<Vec<(IngestKey, Vec<u8>)>, IngestError> {
    records
        .into_iter()
        .map(|FlatRecord { table, mut row }| {
            let key = IngestKey::new(destination_id, table).context(BufferSnafu)?;
            if !row.contains_key(ROW_ID_COLUMN) {
                row.insert(
                    ROW_ID_COLUMN.to_string(),
                    Value::String(Uuid::now_v7().to_string()),
                );
            }
            let line = serde_json::to_vec(&row).context(EncodeRowSnafu)?;
            Ok((key, line))
        })
        .collect()
}
