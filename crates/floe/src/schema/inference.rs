//! Column type inference over NDJSON batches.
//!
//! Every value seen for a field is counted by kind. A field's type is then
//! resolved with the precedence string (or any nested array/object) over
//! float over int over bool. A field that was only ever null is a string.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use super::{InferredSchema, ScalarType};

/// Counters from one inference pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferenceStats {
    /// Object rows that contributed to the schema.
    pub rows: u64,
    /// Non-blank lines that were not a JSON object.
    pub skipped_lines: u64,
}

#[derive(Debug, Default)]
struct FieldCounts {
    string: u64,
    null: u64,
    bool: u64,
    int: u64,
    float: u64,
    other: u64,
}

impl FieldCounts {
    fn observe(&mut self, value: &Value) {
        match value {
            Value::Null => self.null += 1,
            Value::Bool(_) => self.bool += 1,
            Value::Number(n) if n.is_i64() => self.int += 1,
            Value::Number(_) => self.float += 1,
            Value::String(_) => self.string += 1,
            Value::Array(_) | Value::Object(_) => self.other += 1,
        }
    }

    fn resolve(&self) -> ScalarType {
        if self.string > 0 || self.other > 0 {
            ScalarType::String
        } else if self.float > 0 {
            ScalarType::Float
        } else if self.int > 0 {
            ScalarType::Int
        } else if self.bool > 0 {
            ScalarType::Bool
        } else {
            ScalarType::String
        }
    }
}

/// Infer column types from NDJSON lines.
pub fn infer_types<'a, I>(lines: I) -> InferredSchema
where
    I: IntoIterator<Item = &'a str>,
{
    infer_types_with_stats(lines).0
}

/// Infer column types, also reporting how many lines were usable.
///
/// Blank lines are ignored. Lines that are not a JSON object are skipped.
pub fn infer_types_with_stats<'a, I>(lines: I) -> (InferredSchema, InferenceStats)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut fields: IndexMap<String, FieldCounts> = IndexMap::new();
    let mut stats = InferenceStats::default();

    for (index, line) in lines.into_iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(row)) => {
                stats.rows += 1;
                for (name, value) in &row {
                    fields.entry(name.clone()).or_default().observe(value);
                }
            }
            Ok(_) => {
                stats.skipped_lines += 1;
                warn!(line = index + 1, "Skipping non-object line during type inference");
            }
            Err(e) => {
                stats.skipped_lines += 1;
                warn!(line = index + 1, "Skipping malformed line during type inference: {e}");
            }
        }
    }

    let schema = fields
        .into_iter()
        .map(|(name, counts)| (name, counts.resolve()))
        .collect();
    (schema, stats)
}

/// Infer column types from an NDJSON buffer. Invalid UTF-8 lines are skipped.
pub fn infer_ndjson(data: &[u8]) -> (InferredSchema, InferenceStats) {
    let mut invalid = 0u64;
    let lines: Vec<&str> = data
        .split(|b| *b == b'\n')
        .filter_map(|line| match std::str::from_utf8(line) {
            Ok(line) => Some(line),
            Err(_) => {
                invalid += 1;
                None
            }
        })
        .collect();
    let (schema, mut stats) = infer_types_with_stats(lines);
    stats.skipped_lines += invalid;
    (schema, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(lines: &[&str]) -> Vec<(String, ScalarType)> {
        infer_types(lines.iter().copied())
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    #[test]
    fn test_basic_types() {
        assert_eq!(
            infer(&[r#"{"s":"x","i":1,"f":1.5,"b":true}"#]),
            vec![
                ("s".to_string(), ScalarType::String),
                ("i".to_string(), ScalarType::Int),
                ("f".to_string(), ScalarType::Float),
                ("b".to_string(), ScalarType::Bool),
            ]
        );
    }

    #[test]
    fn test_float_beats_int() {
        assert_eq!(
            infer(&[r#"{"x":1}"#, r#"{"x":2.5}"#, r#"{"x":3}"#]),
            vec![("x".to_string(), ScalarType::Float)]
        );
    }

    #[test]
    fn test_string_beats_everything() {
        assert_eq!(
            infer(&[r#"{"x":1}"#, r#"{"x":"one"}"#, r#"{"x":true}"#]),
            vec![("x".to_string(), ScalarType::String)]
        );
    }

    #[test]
    fn test_int_beats_bool() {
        assert_eq!(
            infer(&[r#"{"x":true}"#, r#"{"x":0}"#]),
            vec![("x".to_string(), ScalarType::Int)]
        );
    }

    #[test]
    fn test_only_null_is_string() {
        assert_eq!(
            infer(&[r#"{"x":null}"#, r#"{"x":null}"#]),
            vec![("x".to_string(), ScalarType::String)]
        );
    }

    #[test]
    fn test_null_does_not_change_type() {
        assert_eq!(
            infer(&[r#"{"x":null}"#, r#"{"x":7}"#]),
            vec![("x".to_string(), ScalarType::Int)]
        );
    }

    #[test]
    fn test_nested_values_are_strings() {
        assert_eq!(
            infer(&[r#"{"x":[1,2]}"#, r#"{"y":{"a":1}}"#]),
            vec![
                ("x".to_string(), ScalarType::String),
                ("y".to_string(), ScalarType::String),
            ]
        );
    }

    #[test]
    fn test_integer_like_floats_are_floats() {
        assert_eq!(
            infer(&[r#"{"a":1.0,"b":1e3,"c":18446744073709551615}"#]),
            vec![
                ("a".to_string(), ScalarType::Float),
                ("b".to_string(), ScalarType::Float),
                ("c".to_string(), ScalarType::Float),
            ]
        );
    }

    #[test]
    fn test_order_is_first_encounter() {
        let names: Vec<_> = infer(&[r#"{"b":1}"#, r#"{"a":1,"b":2}"#, r#"{"c":1}"#])
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_bad_lines_skipped_and_counted() {
        let (schema, stats) =
            infer_types_with_stats(["{\"a\":1}", "", "  ", "not json", "[1,2]", "{\"a\":2}"]);
        assert_eq!(schema.get("a"), Some(ScalarType::Int));
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.skipped_lines, 2);
    }

    #[test]
    fn test_infer_ndjson_bytes() {
        let (schema, stats) = infer_ndjson(b"{\"a\":\"x\"}\n\xff\xfe\n{\"b\":false}\n");
        assert_eq!(schema.get("a"), Some(ScalarType::String));
        assert_eq!(schema.get("b"), Some(ScalarType::Bool));
        assert_eq!(stats.skipped_lines, 1);
    }
}
