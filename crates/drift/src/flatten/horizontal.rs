//! Horizontal flattening: one row per document.

use serde_json::{Map, Value};

use super::{FlatRecord, FlatRow, Flattener, expect_object};
use crate::error::FlattenError;

/// Joins nested object keys and array indices with a separator.
///
/// `{"a":{"b":1},"tags":["x","y"]}` becomes `{"a_b":1,"tags_0":"x","tags_1":"y"}`.
/// Empty objects and arrays contribute no columns.
#[derive(Debug, Clone)]
pub struct HorizontalFlattener {
    separator: String,
}

impl HorizontalFlattener {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    fn flatten_into(&self, prefix: &str, value: Value, out: &mut FlatRow) {
        match value {
            Value::Object(map) => {
                for (key, value) in map {
                    let key = self.join(prefix, &key);
                    self.flatten_into(&key, value, out);
                }
            }
            Value::Array(items) => {
                for (index, value) in items.into_iter().enumerate() {
                    let key = self.join(prefix, &index.to_string());
                    self.flatten_into(&key, value, out);
                }
            }
            scalar => {
                out.insert(prefix.to_string(), scalar);
            }
        }
    }

    fn join(&self, prefix: &str, key: &str) -> String {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}{}{key}", self.separator)
        }
    }
}

impl Default for HorizontalFlattener {
    fn default() -> Self {
        Self::new("_")
    }
}

impl Flattener for HorizontalFlattener {
    fn name(&self) -> &'static str {
        "horizontal"
    }

    fn flatten_value(&self, table: &str, doc: Value) -> Result<Vec<FlatRecord>, FlattenError> {
        let root = expect_object(doc)?;
        let mut row = Map::new();
        self.flatten_into("", Value::Object(root), &mut row);
        Ok(vec![FlatRecord::new(table, row)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flatten(doc: Value) -> Vec<FlatRecord> {
        HorizontalFlattener::default()
            .flatten_value("t", doc)
            .unwrap()
    }

    #[test]
    fn test_nested_object() {
        let records = flatten(json!({"a": {"b": 1}}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].table, "t");
        assert_eq!(Value::Object(records[0].row.clone()), json!({"a_b": 1}));
    }

    #[test]
    fn test_arrays_are_indexed() {
        let records = flatten(json!({"tags": ["x", "y"], "pts": [{"x": 1}, {"x": 2}]}));
        assert_eq!(
            Value::Object(records[0].row.clone()),
            json!({"tags_0": "x", "tags_1": "y", "pts_0_x": 1, "pts_1_x": 2})
        );
    }

    #[test]
    fn test_empty_containers_dropped_nulls_kept() {
        let records = flatten(json!({"a": {}, "b": [], "c": null, "d": {"e": []}}));
        assert_eq!(Value::Object(records[0].row.clone()), json!({"c": null}));
    }

    #[test]
    fn test_key_order_follows_document() {
        let records = HorizontalFlattener::default()
            .flatten("t", r#"{"z":1,"a":{"y":2,"b":3},"m":4}"#)
            .unwrap();
        let keys: Vec<_> = records[0].row.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a_y", "a_b", "m"]);
    }

    #[test]
    fn test_custom_separator() {
        let records = HorizontalFlattener::new(".")
            .flatten_value("t", json!({"a": {"b": {"c": true}}}))
            .unwrap();
        assert_eq!(Value::Object(records[0].row.clone()), json!({"a.b.c": true}));
    }

    #[test]
    fn test_deterministic() {
        let doc = r#"{"a":{"b":[1,{"c":2}]},"d":"x"}"#;
        let flattener = HorizontalFlattener::default();
        assert_eq!(
            flattener.flatten("t", doc).unwrap(),
            flattener.flatten("t", doc).unwrap()
        );
    }
}
