use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::table::{Row, Table};
use super::{Destination, InsertStats, validate_table_name};
use crate::error::DestinationError;
use crate::schema::InferredSchema;

/// Tables held in process memory. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryDestination {
    tables: RwLock<IndexMap<String, Table>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(table: &str) -> DestinationError {
    DestinationError::TableNotFound {
        table: table.to_string(),
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create_empty_table(&self, table: &str) -> Result<(), DestinationError> {
        validate_table_name(table)?;
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn create_columns(
        &self,
        table: &str,
        columns: &InferredSchema,
    ) -> Result<Vec<String>, DestinationError> {
        let mut tables = self.tables.write().await;
        let stored = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        Ok(stored.add_columns(table, columns))
    }

    async fn insert_batch(&self, table: &str, rows: Bytes) -> Result<InsertStats, DestinationError> {
        let mut tables = self.tables.write().await;
        let stored = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        let mut stats = InsertStats::default();
        let projected = stored.project_batch(&rows, &mut stats);
        stored.append(projected);
        Ok(stats)
    }

    async fn tables(&self) -> Result<Vec<String>, DestinationError> {
        Ok(self.tables.read().await.keys().cloned().collect())
    }

    async fn columns(&self, table: &str) -> Result<InferredSchema, DestinationError> {
        let tables = self.tables.read().await;
        let stored = tables.get(table).ok_or_else(|| not_found(table))?;
        Ok(stored.columns().clone())
    }

    async fn scan(
        &self,
        table: &str,
        limit: Option<usize>,
    ) -> Result<(InferredSchema, Vec<Row>), DestinationError> {
        let tables = self.tables.read().await;
        let stored = tables.get(table).ok_or_else(|| not_found(table))?;
        let rows = stored
            .rows()
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((stored.columns().clone(), rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::ROW_ID_COLUMN;
    use crate::schema::{ScalarType, infer_ndjson};

    async fn loaded(batch: &'static [u8]) -> MemoryDestination {
        let dest = MemoryDestination::new();
        dest.create_empty_table("events").await.unwrap();
        let (schema, _) = infer_ndjson(batch);
        dest.create_columns("events", &schema).await.unwrap();
        dest.insert_batch("events", Bytes::from_static(batch))
            .await
            .unwrap();
        dest
    }

    #[tokio::test]
    async fn test_create_columns_idempotent() {
        let dest = MemoryDestination::new();
        dest.create_empty_table("events").await.unwrap();
        dest.create_empty_table("events").await.unwrap();

        let columns: InferredSchema = [("a", ScalarType::Int)].into_iter().collect();
        assert_eq!(
            dest.create_columns("events", &columns).await.unwrap(),
            vec!["a"]
        );
        assert!(
            dest.create_columns("events", &columns)
                .await
                .unwrap()
                .is_empty()
        );

        let names: Vec<_> = dest
            .columns("events")
            .await
            .unwrap()
            .names()
            .map(str::to_string)
            .collect();
        assert_eq!(names, vec![ROW_ID_COLUMN, "a"]);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let dest = MemoryDestination::new();
        let err = dest
            .insert_batch("nope", Bytes::from_static(b"{}\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, DestinationError::TableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_with_limit() {
        let dest = loaded(b"{\"__row_id\":\"1\",\"n\":1}\n{\"__row_id\":\"2\",\"n\":2}\n").await;

        let mut out = Vec::new();
        dest.query_ndjson("select * from events limit 1", &mut out)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"__row_id\":\"1\",\"n\":1}\n"
        );

        let mut out = Vec::new();
        dest.query_csv("select * from events", &mut out)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "__row_id,n\n1,1\n2,2\n");
    }

    #[tokio::test]
    async fn test_invalid_table_name() {
        let dest = MemoryDestination::new();
        assert!(matches!(
            dest.create_empty_table("../x").await,
            Err(DestinationError::InvalidTableName { .. })
        ));
    }
}
