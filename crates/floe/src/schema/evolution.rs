//! Schema evolution for destination tables.
//!
//! Evolution is additive only: new columns may be added, existing columns
//! are never retyped or dropped. A batch whose inferred type for a column
//! differs from the table's is still loaded; its values are coerced to the
//! existing column type where possible.

use serde::{Deserialize, Serialize};

use super::{InferredSchema, ScalarType};
use crate::error::SchemaError;

/// How new columns in a batch are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaEvolutionMode {
    /// Reject batches that would add columns to an established table.
    Strict,
    /// Add new columns (default).
    #[default]
    Merge,
}

/// Result of comparing a table's columns with a batch's inferred columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnComparison {
    /// Columns in the batch but not in the table, in batch order.
    pub new_columns: Vec<(String, ScalarType)>,
    /// Same name, different type: (column, table type, batch type).
    pub type_conflicts: Vec<(String, ScalarType, ScalarType)>,
}

impl ColumnComparison {
    pub fn is_identical(&self) -> bool {
        self.new_columns.is_empty() && self.type_conflicts.is_empty()
    }

    pub fn new_column_names(&self) -> Vec<String> {
        self.new_columns.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Apply the evolution mode.
    ///
    /// `established` is false for a table that holds only implicit columns,
    /// which may always receive its first set of columns.
    pub fn check(
        &self,
        table: &str,
        mode: SchemaEvolutionMode,
        established: bool,
    ) -> Result<(), SchemaError> {
        match mode {
            SchemaEvolutionMode::Strict if established && !self.new_columns.is_empty() => {
                Err(SchemaError::NewColumnsRejected {
                    table: table.to_string(),
                    columns: self.new_column_names(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Compare existing table columns against a batch's inferred columns.
///
/// Columns present in the table but absent from the batch are fine: they
/// are null for the batch's rows.
pub fn compare_columns(existing: &InferredSchema, inferred: &InferredSchema) -> ColumnComparison {
    let mut comparison = ColumnComparison::default();
    for (name, ty) in inferred {
        match existing.get(name) {
            None => comparison.new_columns.push((name.clone(), *ty)),
            Some(current) if current != *ty => {
                comparison
                    .type_conflicts
                    .push((name.clone(), current, *ty));
            }
            Some(_) => {}
        }
    }
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(columns: &[(&str, ScalarType)]) -> InferredSchema {
        columns.iter().map(|(n, t)| (*n, *t)).collect()
    }

    #[test]
    fn test_compare_identical() {
        let s = schema(&[("a", ScalarType::Int)]);
        assert!(compare_columns(&s, &s).is_identical());
    }

    #[test]
    fn test_compare_new_column() {
        let existing = schema(&[("a", ScalarType::Int)]);
        let inferred = schema(&[("a", ScalarType::Int), ("b", ScalarType::String)]);
        let comparison = compare_columns(&existing, &inferred);
        assert_eq!(
            comparison.new_columns,
            vec![("b".to_string(), ScalarType::String)]
        );
        assert!(comparison.type_conflicts.is_empty());
    }

    #[test]
    fn test_compare_missing_column_is_fine() {
        let existing = schema(&[("a", ScalarType::Int), ("b", ScalarType::Bool)]);
        let inferred = schema(&[("a", ScalarType::Int)]);
        assert!(compare_columns(&existing, &inferred).is_identical());
    }

    #[test]
    fn test_compare_type_conflict() {
        let existing = schema(&[("a", ScalarType::Int)]);
        let inferred = schema(&[("a", ScalarType::String)]);
        let comparison = compare_columns(&existing, &inferred);
        assert_eq!(
            comparison.type_conflicts,
            vec![("a".to_string(), ScalarType::Int, ScalarType::String)]
        );
    }

    #[test]
    fn test_strict_rejects_new_columns_on_established_table() {
        let existing = schema(&[("a", ScalarType::Int)]);
        let inferred = schema(&[("b", ScalarType::Int)]);
        let comparison = compare_columns(&existing, &inferred);

        let err = comparison
            .check("events", SchemaEvolutionMode::Strict, true)
            .unwrap_err();
        assert!(err.to_string().contains("[b]"));
        assert!(
            comparison
                .check("events", SchemaEvolutionMode::Strict, false)
                .is_ok()
        );
        assert!(
            comparison
                .check("events", SchemaEvolutionMode::Merge, true)
                .is_ok()
        );
    }

    #[test]
    fn test_strict_allows_type_conflicts() {
        let existing = schema(&[("a", ScalarType::Int)]);
        let inferred = schema(&[("a", ScalarType::Float)]);
        assert!(
            compare_columns(&existing, &inferred)
                .check("events", SchemaEvolutionMode::Strict, true)
                .is_ok()
        );
    }

    #[test]
    fn test_mode_yaml_names() {
        let mode: SchemaEvolutionMode = serde_yaml::from_str("strict").unwrap();
        assert_eq!(mode, SchemaEvolutionMode::Strict);
        assert_eq!(SchemaEvolutionMode::default(), SchemaEvolutionMode::Merge);
    }
}
