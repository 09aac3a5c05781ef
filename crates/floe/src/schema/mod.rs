//! Column types for loaded batches.
//!
//! This module provides type inference over NDJSON batches and the schema
//! evolution policy applied before a batch is inserted.

pub mod evolution;
pub mod inference;
mod types;

pub use evolution::{ColumnComparison, SchemaEvolutionMode, compare_columns};
pub use inference::{InferenceStats, infer_ndjson, infer_types, infer_types_with_stats};
pub use types::{InferredSchema, ScalarType};
