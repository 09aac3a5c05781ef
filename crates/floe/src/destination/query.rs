//! The query subset the built-in backends answer: `select * from <table> [limit <n>]`.

use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use snafu::prelude::*;

use super::table::Row;
use crate::error::{CsvSnafu, DestinationError, JsonSnafu, WriteOutputSnafu};
use crate::schema::InferredSchema;

static SELECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*select\s+\*\s+from\s+([A-Za-z0-9_.\-]+)(?:\s+limit\s+(\d+))?\s*;?\s*$")
        .expect("valid regex")
});

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub limit: Option<usize>,
}

impl Query {
    pub fn parse(query: &str) -> Result<Self, DestinationError> {
        let invalid = || DestinationError::InvalidQuery {
            query: query.to_string(),
        };
        let captures = SELECT_PATTERN.captures(query).ok_or_else(invalid)?;
        let table = captures[1].to_string();
        let limit = match captures.get(2) {
            Some(m) => Some(m.as_str().parse().map_err(|_| invalid())?),
            None => None,
        };
        Ok(Self { table, limit })
    }
}

/// Output encoding of query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON array of row objects.
    Json,
    /// One row object per line.
    Ndjson,
    /// Header line of column names, then one record per row.
    Csv,
}

/// Write `rows` in `format`, columns in table order.
pub fn write_rows(
    format: OutputFormat,
    columns: &InferredSchema,
    rows: &[Row],
    out: &mut (dyn Write + Send),
) -> Result<(), DestinationError> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, rows).context(JsonSnafu)?;
        }
        OutputFormat::Ndjson => {
            for row in rows {
                serde_json::to_writer(&mut *out, row).context(JsonSnafu)?;
                out.write_all(b"\n").context(WriteOutputSnafu)?;
            }
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(&mut *out);
            writer.write_record(columns.names()).context(CsvSnafu)?;
            for row in rows {
                let record = columns
                    .names()
                    .map(|name| csv_field(row.get(name).unwrap_or(&Value::Null)));
                writer.write_record(record).context(CsvSnafu)?;
            }
            writer.flush().context(WriteOutputSnafu)?;
        }
    }
    out.flush().context(WriteOutputSnafu)
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarType;
    use serde_json::json;

    #[test]
    fn test_parse_select() {
        assert_eq!(
            Query::parse("select * from events").unwrap(),
            Query {
                table: "events".to_string(),
                limit: None
            }
        );
        assert_eq!(
            Query::parse("  SELECT *  FROM page_views LIMIT 10;").unwrap(),
            Query {
                table: "page_views".to_string(),
                limit: Some(10)
            }
        );
    }

    #[test]
    fn test_parse_rejects_other_queries() {
        for query in [
            "select a from t",
            "delete from t",
            "select * from t where x = 1",
            "select * from t limit -1",
        ] {
            assert!(Query::parse(query).is_err(), "{query} should be rejected");
        }
    }

    fn sample() -> (InferredSchema, Vec<Row>) {
        let columns: InferredSchema = [("name", ScalarType::String), ("n", ScalarType::Int)]
            .into_iter()
            .collect();
        let rows = vec![
            json!({"name": "a,b", "n": 1}).as_object().unwrap().clone(),
            json!({"name": null, "n": 2}).as_object().unwrap().clone(),
        ];
        (columns, rows)
    }

    fn render(format: OutputFormat) -> String {
        let (columns, rows) = sample();
        let mut out = Vec::new();
        write_rows(format, &columns, &rows, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_write_json() {
        assert_eq!(
            render(OutputFormat::Json),
            r#"[{"name":"a,b","n":1},{"name":null,"n":2}]"#
        );
    }

    #[test]
    fn test_write_ndjson() {
        assert_eq!(
            render(OutputFormat::Ndjson),
            "{\"name\":\"a,b\",\"n\":1}\n{\"name\":null,\"n\":2}\n"
        );
    }

    #[test]
    fn test_write_csv_quotes_and_nulls() {
        assert_eq!(render(OutputFormat::Csv), "name,n\n\"a,b\",1\n,2\n");
    }
}
