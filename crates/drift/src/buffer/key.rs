//! Buffer key: one tenant's table.

use std::fmt;
use std::path::{Path, PathBuf};

use metrics::Label;

use crate::error::BufferError;

const MAX_SEGMENT_LEN: usize = 255;

/// `(destination_id, table)`, both validated as single safe path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IngestKey {
    destination_id: String,
    table: String,
}

impl IngestKey {
    pub fn new(
        destination_id: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, BufferError> {
        let destination_id = destination_id.into();
        let table = table.into();
        validate_segment("destination id", &destination_id)?;
        validate_segment("table", &table)?;
        Ok(Self {
            destination_id,
            table,
        })
    }

    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `<root>/<destination_id>/<table>`
    pub fn dir_in(&self, root: &Path) -> PathBuf {
        root.join(&self.destination_id).join(&self.table)
    }

    pub(crate) fn labels(&self) -> Vec<Label> {
        vec![
            Label::new("destination", self.destination_id.clone()),
            Label::new("table", self.table.clone()),
        ]
    }
}

impl fmt::Display for IngestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.destination_id, self.table)
    }
}

fn validate_segment(field: &'static str, value: &str) -> Result<(), BufferError> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.len() > MAX_SEGMENT_LEN {
        Some("must be at most 255 bytes")
    } else if value.starts_with('.') {
        Some("must not start with '.'")
    } else if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        Some("may only contain ASCII letters, digits, '_', '-' and '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BufferError::InvalidKey {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
