//! Turning nested JSON documents into flat rows.
//!
//! Three strategies are provided:
//! - [`HorizontalFlattener`]: one row per document, nested keys joined with a separator
//! - [`VerticalFlattener`]: one row per combination of array elements (cross-product explosion)
//! - [`MultiTableFlattener`]: one table per nested field, linked by generated ids
//!
//! Values are `serde_json::Value`, a tagged union over null, bool, number,
//! string, array and object; every strategy is total over it. Rows keep
//! their keys in first-encounter order.

mod horizontal;
mod ids;
mod multitable;
mod registry;
mod vertical;

pub use horizontal::HorizontalFlattener;
pub use ids::{DocumentIds, RowIds, SequentialIds, SnowflakeIds, UuidIds};
pub use multitable::MultiTableFlattener;
pub use registry::{FlattenContext, FlattenerConstructor, FlattenerRegistry, Flatteners};
pub use vertical::VerticalFlattener;

use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::error::{FlattenError, InvalidJsonSnafu, NonObjectRootSnafu};

/// A flat row: column name to scalar value, in insertion order.
pub type FlatRow = Map<String, Value>;

/// A flat row and the table it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    pub table: String,
    pub row: FlatRow,
}

impl FlatRecord {
    pub fn new(table: impl Into<String>, row: FlatRow) -> Self {
        Self {
            table: table.into(),
            row,
        }
    }
}

pub trait Flattener: Send + Sync + std::fmt::Debug {
    /// Registry name of this strategy.
    fn name(&self) -> &'static str;

    /// Flatten an already-parsed document destined for `table`.
    fn flatten_value(&self, table: &str, doc: Value) -> Result<Vec<FlatRecord>, FlattenError>;

    /// Parse and flatten a document.
    fn flatten(&self, table: &str, doc: &str) -> Result<Vec<FlatRecord>, FlattenError> {
        let value: Value = serde_json::from_str(doc).context(InvalidJsonSnafu)?;
        self.flatten_value(table, value)
    }
}

/// Unwrap an object root or report what was found instead.
pub(crate) fn expect_object(doc: Value) -> Result<Map<String, Value>, FlattenError> {
    match doc {
        Value::Object(map) => Ok(map),
        other => NonObjectRootSnafu {
            kind: kind_of(&other),
        }
        .fail(),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
