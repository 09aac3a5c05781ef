//! In-process table model shared by the built-in backends.

use serde_json::{Map, Number, Value};

use super::{InsertStats, ROW_ID_COLUMN};
use crate::error::DestinationError;
use crate::schema::{InferredSchema, ScalarType};

/// A stored row: only known columns, values already of the column type or null.
pub type Row = Map<String, Value>;

/// Columns and rows of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: InferredSchema,
    rows: Vec<Row>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    /// An empty table holding only the implicit `__row_id` column.
    pub fn new() -> Self {
        let mut columns = InferredSchema::new();
        columns.insert(ROW_ID_COLUMN, ScalarType::String);
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_parts(columns: InferredSchema, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &InferredSchema {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Add one column. Re-adding with the same type is a no-op.
    pub fn add_column(
        &mut self,
        table: &str,
        name: &str,
        ty: ScalarType,
    ) -> Result<bool, DestinationError> {
        match self.columns.get(name) {
            None => {
                self.columns.insert(name, ty);
                Ok(true)
            }
            Some(existing) if existing == ty => Ok(false),
            Some(existing) => Err(DestinationError::ColumnExists {
                table: table.to_string(),
                column: name.to_string(),
                existing: existing.to_string(),
                requested: ty.to_string(),
            }),
        }
    }

    /// Add every missing column; existing columns keep their type.
    ///
    /// Returns the names of the columns actually added.
    pub fn add_columns(&mut self, table: &str, columns: &InferredSchema) -> Vec<String> {
        let mut added = Vec::new();
        for (name, ty) in columns {
            match self.add_column(table, name, *ty) {
                Ok(true) => added.push(name.clone()),
                Ok(false) => {}
                Err(e) => tracing::debug!("Keeping existing column: {e}"),
            }
        }
        added
    }

    /// Project NDJSON rows onto the table's columns and return them.
    pub fn project_batch(&self, data: &[u8], stats: &mut InsertStats) -> Vec<Row> {
        let mut rows = Vec::new();
        for line in data.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(object)) => rows.push(self.project(object, stats)),
                _ => stats.skipped_lines += 1,
            }
        }
        stats.rows += rows.len() as u64;
        rows
    }

    fn project(&self, mut object: Map<String, Value>, stats: &mut InsertStats) -> Row {
        let mut row = Row::new();
        for (name, ty) in &self.columns {
            let value = object.remove(name.as_str()).unwrap_or(Value::Null);
            let coerced = coerce(value, *ty);
            if coerced.is_none() {
                stats.nulled_values += 1;
            }
            row.insert(name.clone(), coerced.unwrap_or(Value::Null));
        }
        stats.dropped_fields += object.len() as u64;
        row
    }

    pub fn append(&mut self, rows: Vec<Row>) {
        self.rows.extend(rows);
    }
}

/// Convert `value` to column type `ty`. `None` means it cannot be represented.
///
/// Nulls stay null. Anything fits a string column (nested values as JSON
/// text). Integers fit float columns; integral floats fit int columns.
pub fn coerce(value: Value, ty: ScalarType) -> Option<Value> {
    match (value, ty) {
        (Value::Null, _) => Some(Value::Null),
        (Value::String(s), ScalarType::String) => Some(Value::String(s)),
        (other, ScalarType::String) => Some(Value::String(other.to_string())),
        (Value::Number(n), ScalarType::Int) => {
            if n.is_i64() {
                Some(Value::Number(n))
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| Value::Number(Number::from(f as i64)))
            }
        }
        (Value::Number(n), ScalarType::Float) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (Value::Bool(b), ScalarType::Bool) => Some(Value::Bool(b)),
        _ => None,
    }
}
