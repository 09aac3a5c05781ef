//! Multi-table flattening: normalize nested structure into linked tables.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::{FlatRecord, FlatRow, Flattener, RowIds, expect_object};
use crate::error::FlattenError;

/// Column holding a row's generated id.
pub const ID_COLUMN: &str = "id";

/// Splits a document into one table per nested field.
///
/// Every object becomes a row with a generated `id`. Nested objects and arrays
/// become rows in a table named after their field, carrying
/// `<parent_table>_id`. Scalars inside arrays become rows `{id, <table>: value}`.
/// Parents are emitted before their children.
///
/// Generated columns take precedence: a source scalar whose name clashes with
/// `id` or the parent link column is kept under the same name prefixed by `_`.
#[derive(Debug, Clone)]
pub struct MultiTableFlattener {
    row_ids: Arc<dyn RowIds>,
}

struct Parent<'a> {
    table: &'a str,
    id: i64,
}

impl Parent<'_> {
    fn link_column(&self) -> String {
        format!("{}_id", self.table)
    }
}

impl MultiTableFlattener {
    pub fn new(row_ids: Arc<dyn RowIds>) -> Self {
        Self { row_ids }
    }

    fn new_row(&self, parent: Option<&Parent<'_>>) -> (i64, FlatRow) {
        let id = self.row_ids.next_row_id();
        let mut row = FlatRow::new();
        row.insert(ID_COLUMN.to_string(), Value::from(id));
        if let Some(parent) = parent {
            row.insert(parent.link_column(), Value::from(parent.id));
        }
        (id, row)
    }

    fn flatten_object(
        &self,
        table: &str,
        parent: Option<&Parent<'_>>,
        map: Map<String, Value>,
        out: &mut Vec<FlatRecord>,
    ) {
        let (id, mut row) = self.new_row(parent);
        let mut children = Vec::new();

        for (key, value) in map {
            match value {
                Value::Object(_) | Value::Array(_) => children.push((key, value)),
                scalar => {
                    let column = if row.contains_key(&key) {
                        debug!(table, column = %key, "Source column clashes with generated id column");
                        format!("_{key}")
                    } else {
                        key
                    };
                    row.insert(column, scalar);
                }
            }
        }

        out.push(FlatRecord::new(table, row));

        let me = Parent { table, id };
        for (key, value) in children {
            self.flatten_nested(&key, &me, value, out);
        }
    }

    fn flatten_nested(
        &self,
        table: &str,
        parent: &Parent<'_>,
        value: Value,
        out: &mut Vec<FlatRecord>,
    ) {
        match value {
            Value::Object(map) => self.flatten_object(table, Some(parent), map, out),
            Value::Array(items) => {
                for item in items {
                    self.flatten_nested(table, parent, item, out);
                }
            }
            scalar => {
                let (_, mut row) = self.new_row(Some(parent));
                row.insert(table.to_string(), scalar);
                out.push(FlatRecord::new(table, row));
            }
        }
    }
}

impl Flattener for MultiTableFlattener {
    fn name(&self) -> &'static str {
        "multitable"
    }

    fn flatten_value(&self, table: &str, doc: Value) -> Result<Vec<FlatRecord>, FlattenError> {
        let root = expect_object(doc)?;
        let mut out = Vec::new();
        self.flatten_object(table, None, root, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::SequentialIds;
    use serde_json::json;

    fn flatten(doc: Value) -> Vec<(String, Value)> {
        MultiTableFlattener::new(Arc::new(SequentialIds::new()))
            .flatten_value("orders", doc)
            .unwrap()
            .into_iter()
            .map(|r| (r.table, Value::Object(r.row)))
            .collect()
    }

    #[test]
    fn test_flat_document_is_single_row() {
        assert_eq!(
            flatten(json!({"customer": "ada", "total": 9.5})),
            vec![(
                "orders".to_string(),
                json!({"id": 1, "customer": "ada", "total": 9.5})
            )]
        );
    }

    #[test]
    fn test_nested_object_and_array() {
        let out = flatten(json!({
            "customer": "ada",
            "address": {"city": "London"},
            "lines": [{"sku": "a"}, {"sku": "b", "tags": ["x"]}]
        }));

        assert_eq!(
            out,
            vec![
                ("orders".to_string(), json!({"id": 1, "customer": "ada"})),
                (
                    "address".to_string(),
                    json!({"id": 2, "orders_id": 1, "city": "London"})
                ),
                ("lines".to_string(), json!({"id": 3, "orders_id": 1, "sku": "a"})),
                ("lines".to_string(), json!({"id": 4, "orders_id": 1, "sku": "b"})),
                ("tags".to_string(), json!({"id": 5, "lines_id": 4, "tags": "x"})),
            ]
        );
    }

    #[test]
    fn test_parents_precede_children() {
        let out = flatten(json!({"a": {"b": {"c": {"d": 1}}}}));
        let tables: Vec<_> = out.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tables, vec!["orders", "a", "b", "c"]);
        assert_eq!(out[3].1["b_id"], json!(3));
    }

    #[test]
    fn test_nested_arrays_share_parent() {
        let out = flatten(json!({"m": [[1, 2], [3]]}));
        assert_eq!(out.len(), 4);
        for (table, row) in &out[1..] {
            assert_eq!(table, "m");
            assert_eq!(row["orders_id"], json!(1));
        }
    }

    #[test]
    fn test_clashing_source_id_is_preserved() {
        let out = flatten(json!({"id": "ext-9", "name": "x"}));
        assert_eq!(out[0].1, json!({"id": 1, "_id": "ext-9", "name": "x"}));
    }

    #[test]
    fn test_empty_array_adds_no_rows() {
        assert_eq!(flatten(json!({"lines": []})).len(), 1);
    }
}
