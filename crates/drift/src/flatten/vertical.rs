//! Vertical flattening: explode arrays into rows.
//!
//! Each key of an object yields a list of partial rows. Sibling keys are
//! combined with a Cartesian product, so `{"a":[1,2],"b":[3,4]}` yields four
//! rows. The product is unbounded: a document with several long sibling
//! arrays produces the product of their lengths.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{DocumentIds, FlatRecord, FlatRow, Flattener, expect_object};
use crate::error::FlattenError;

/// Column stamped on every row with the id of its source document.
pub const DOCUMENT_ID_COLUMN: &str = "___document_id";

/// Prefix of the columns carrying an element's position in its array.
pub const ORDER_COLUMN_PREFIX: &str = "__order_";

const PATH_SEPARATOR: &str = "_";

#[derive(Debug, Clone)]
pub struct VerticalFlattener {
    document_ids: Option<Arc<dyn DocumentIds>>,
    order_tags: bool,
}

impl VerticalFlattener {
    /// `document_ids` of `None` disables `___document_id` stamping.
    pub fn new(document_ids: Option<Arc<dyn DocumentIds>>, order_tags: bool) -> Self {
        Self {
            document_ids,
            order_tags,
        }
    }

    fn explode_object(&self, prefix: Option<&str>, map: Map<String, Value>) -> Vec<FlatRow> {
        let mut rows = vec![FlatRow::new()];
        for (key, value) in map {
            let path = match prefix {
                Some(prefix) => format!("{prefix}{PATH_SEPARATOR}{key}"),
                None => key,
            };
            let exploded = self.explode_value(&path, value);
            rows = cross_product(&rows, &exploded);
        }
        rows
    }

    fn explode_value(&self, path: &str, value: Value) -> Vec<FlatRow> {
        match value {
            Value::Object(map) => self.explode_object(Some(path), map),
            Value::Array(items) if items.is_empty() => {
                let mut row = FlatRow::new();
                row.insert(path.to_string(), Value::Null);
                vec![row]
            }
            Value::Array(items) => {
                let order_column = format!("{ORDER_COLUMN_PREFIX}{path}");
                let mut rows = Vec::new();
                for (index, item) in items.into_iter().enumerate() {
                    let mut exploded = self.explode_value(path, item);
                    if self.order_tags {
                        // Overwrites the inner index when arrays nest on the same path.
                        for row in &mut exploded {
                            row.insert(order_column.clone(), Value::from(index));
                        }
                    }
                    rows.extend(exploded);
                }
                rows
            }
            scalar => {
                let mut row = FlatRow::new();
                row.insert(path.to_string(), scalar);
                vec![row]
            }
        }
    }

    fn stamp_document_id(&self, root: Map<String, Value>) -> Map<String, Value> {
        let Some(ids) = &self.document_ids else {
            return root;
        };
        let mut stamped = Map::with_capacity(root.len() + 1);
        stamped.insert(
            DOCUMENT_ID_COLUMN.to_string(),
            Value::String(ids.next_document_id()),
        );
        stamped.extend(root.into_iter().filter(|(k, _)| k != DOCUMENT_ID_COLUMN));
        stamped
    }
}

/// Merge every left row with every right row; the left side varies slowest
/// and right-hand values win on key collisions.
fn cross_product(lhs: &[FlatRow], rhs: &[FlatRow]) -> Vec<FlatRow> {
    let mut out = Vec::with_capacity(lhs.len() * rhs.len());
    for left in lhs {
        for right in rhs {
            let mut merged = left.clone();
            for (key, value) in right {
                merged.insert(key.clone(), value.clone());
            }
            out.push(merged);
        }
    }
    out
}

impl Flattener for VerticalFlattener {
    fn name(&self) -> &'static str {
        "vertical"
    }

    fn flatten_value(&self, table: &str, doc: Value) -> Result<Vec<FlatRecord>, FlattenError> {
        let root = self.stamp_document_id(expect_object(doc)?);
        Ok(self
            .explode_object(None, root)
            .into_iter()
            .map(|row| FlatRecord::new(table, row))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::SequentialIds;
    use serde_json::json;

    fn plain() -> VerticalFlattener {
        VerticalFlattener::new(None, false)
    }

    fn rows(flattener: &VerticalFlattener, doc: Value) -> Vec<Value> {
        flattener
            .flatten_value("t", doc)
            .unwrap()
            .into_iter()
            .map(|r| {
                assert_eq!(r.table, "t");
                Value::Object(r.row)
            })
            .collect()
    }

    #[test]
    fn test_one_row_per_element() {
        assert_eq!(
            rows(&plain(), json!({"a": [1, 2, 3]})),
            vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]
        );
    }

    #[test]
    fn test_empty_array_yields_null_row() {
        assert_eq!(rows(&plain(), json!({"a": []})), vec![json!({"a": null})]);
    }

    #[test]
    fn test_sibling_arrays_cross_product() {
        assert_eq!(
            rows(&plain(), json!({"a": [1, 2], "b": [3, 4]})),
            vec![
                json!({"a": 1, "b": 3}),
                json!({"a": 1, "b": 4}),
                json!({"a": 2, "b": 3}),
                json!({"a": 2, "b": 4}),
            ]
        );
    }

    #[test]
    fn test_product_size_is_multiplicative() {
        let out = rows(
            &plain(),
            json!({"a": [1, 2, 3], "b": [1, 2], "c": ["x", "y", "z", "w"], "d": 0}),
        );
        assert_eq!(out.len(), 24);
    }

    #[test]
    fn test_array_of_objects_with_order_tags() {
        let flattener = VerticalFlattener::new(None, true);
        assert_eq!(
            rows(
                &flattener,
                json!({"id": 7, "items": [{"sku": "a", "qty": 1}, {"sku": "b", "qty": 2}]})
            ),
            vec![
                json!({"id": 7, "items_sku": "a", "items_qty": 1, "__order_items": 0}),
                json!({"id": 7, "items_sku": "b", "items_qty": 2, "__order_items": 1}),
            ]
        );
    }

    #[test]
    fn test_nested_arrays_multiply() {
        let flattener = VerticalFlattener::new(None, true);
        let out = rows(
            &flattener,
            json!({"orders": [{"lines": [1, 2]}, {"lines": [3]}]}),
        );
        assert_eq!(
            out,
            vec![
                json!({"orders_lines": 1, "__order_orders_lines": 0, "__order_orders": 0}),
                json!({"orders_lines": 2, "__order_orders_lines": 1, "__order_orders": 0}),
                json!({"orders_lines": 3, "__order_orders_lines": 0, "__order_orders": 1}),
            ]
        );
    }

    #[test]
    fn test_outer_index_wins_for_directly_nested_arrays() {
        let flattener = VerticalFlattener::new(None, true);
        let out = rows(&flattener, json!({"m": [[10, 11], [12]]}));
        assert_eq!(
            out,
            vec![
                json!({"m": 10, "__order_m": 0}),
                json!({"m": 11, "__order_m": 0}),
                json!({"m": 12, "__order_m": 1}),
            ]
        );
    }

    #[test]
    fn test_document_id_stamped_on_every_row() {
        let flattener = VerticalFlattener::new(Some(Arc::new(SequentialIds::new())), false);

        let first = flattener
            .flatten_value("t", json!({"a": [1, 2]}))
            .unwrap();
        assert_eq!(first.len(), 2);
        for record in &first {
            assert_eq!(record.row[DOCUMENT_ID_COLUMN], json!("doc-000001"));
            assert_eq!(record.row.keys().next().unwrap(), DOCUMENT_ID_COLUMN);
        }

        let second = flattener.flatten_value("t", json!({"a": 1})).unwrap();
        assert_eq!(second[0].row[DOCUMENT_ID_COLUMN], json!("doc-000002"));
    }

    #[test]
    fn test_deterministic_with_deterministic_ids() {
        let doc = r#"{"a":[1,{"b":[true,false]}],"c":{"d":[]}}"#;
        let one = VerticalFlattener::new(Some(Arc::new(SequentialIds::new())), true);
        let two = VerticalFlattener::new(Some(Arc::new(SequentialIds::new())), true);
        assert_eq!(one.flatten("t", doc).unwrap(), two.flatten("t", doc).unwrap());
    }

    #[test]
    fn test_rejects_array_root() {
        assert!(plain().flatten("t", "[1,2]").is_err());
    }
}
