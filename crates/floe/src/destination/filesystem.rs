use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use snafu::prelude::*;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::table::{Row, Table};
use super::{Destination, InsertStats, validate_table_name};
use crate::error::{DestinationError, IoSnafu, JsonSnafu};
use crate::schema::InferredSchema;

const DATA_EXTENSION: &str = "ndjson";
const CATALOG_SUFFIX: &str = ".columns.json";

/// Durable tables under one directory.
///
/// Each table is `<dir>/<table>.ndjson` holding the projected rows and
/// `<dir>/<table>.columns.json` holding its columns in creation order. The
/// catalog is replaced atomically, so a crash never leaves a half-written one.
#[derive(Debug)]
pub struct FilesystemDestination {
    dir: PathBuf,
    /// Serializes catalog changes and appends.
    write_lock: Mutex<()>,
}

impl FilesystemDestination {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, DestinationError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .context(IoSnafu { path: dir.clone() })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.{DATA_EXTENSION}"))
    }

    fn catalog_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}{CATALOG_SUFFIX}"))
    }

    async fn read_catalog(&self, table: &str) -> Result<InferredSchema, DestinationError> {
        validate_table_name(table)?;
        let path = self.catalog_path(table);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DestinationError::TableNotFound {
                    table: table.to_string(),
                });
            }
            Err(source) => return Err(DestinationError::Io { path, source }),
        };
        serde_json::from_slice(&contents).context(JsonSnafu)
    }

    async fn write_catalog(
        &self,
        table: &str,
        columns: &InferredSchema,
    ) -> Result<(), DestinationError> {
        let path = self.catalog_path(table);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(columns).context(JsonSnafu)?;
        tokio::fs::write(&tmp, contents)
            .await
            .context(IoSnafu { path: tmp.clone() })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .context(IoSnafu { path })
    }
}

#[async_trait]
impl Destination for FilesystemDestination {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    async fn create_empty_table(&self, table: &str) -> Result<(), DestinationError> {
        validate_table_name(table)?;
        let _guard = self.write_lock.lock().await;

        if tokio::fs::try_exists(self.catalog_path(table))
            .await
            .unwrap_or(false)
        {
            return Ok(());
        }

        let data = self.data_path(table);
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&data)
            .await
            .context(IoSnafu { path: data })?;
        self.write_catalog(table, Table::new().columns()).await?;
        debug!(table, dir = %self.dir.display(), "Created table");
        Ok(())
    }

    async fn create_columns(
        &self,
        table: &str,
        columns: &InferredSchema,
    ) -> Result<Vec<String>, DestinationError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = Table::from_parts(self.read_catalog(table).await?, Vec::new());
        let added = stored.add_columns(table, columns);
        if !added.is_empty() {
            self.write_catalog(table, stored.columns()).await?;
        }
        Ok(added)
    }

    async fn insert_batch(&self, table: &str, rows: Bytes) -> Result<InsertStats, DestinationError> {
        let _guard = self.write_lock.lock().await;
        let stored = Table::from_parts(self.read_catalog(table).await?, Vec::new());

        let mut stats = InsertStats::default();
        let projected = stored.project_batch(&rows, &mut stats);
        if projected.is_empty() {
            return Ok(stats);
        }

        let mut encoded = Vec::with_capacity(rows.len());
        for row in &projected {
            serde_json::to_writer(&mut encoded, row).context(JsonSnafu)?;
            encoded.push(b'\n');
        }

        let path = self.data_path(table);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await
            .context(IoSnafu { path: path.clone() })?;
        let complete = trim_partial_row(&mut file, &path).await?;

        let result = async {
            file.write_all(&encoded).await?;
            file.sync_data().await
        }
        .await;
        if let Err(source) = result {
            if let Err(e) = file.set_len(complete).await {
                warn!(path = %path.display(), "Failed to truncate after write error: {e}");
            }
            return Err(DestinationError::Io { path, source });
        }
        Ok(stats)
    }

    async fn tables(&self) -> Result<Vec<String>, DestinationError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.context(IoSnafu {
            path: self.dir.clone(),
        })?;
        let mut tables = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu {
            path: self.dir.clone(),
        })? {
            if let Some(table) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(CATALOG_SUFFIX))
            {
                tables.push(table.to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }

    async fn columns(&self, table: &str) -> Result<InferredSchema, DestinationError> {
        self.read_catalog(table).await
    }

    async fn scan(
        &self,
        table: &str,
        limit: Option<usize>,
    ) -> Result<(InferredSchema, Vec<Row>), DestinationError> {
        let columns = self.read_catalog(table).await?;
        let path = self.data_path(table);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(DestinationError::Io { path, source }),
        };

        let complete = data
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        if complete < data.len() {
            warn!(table, path = %path.display(), "Ignoring partial trailing row");
        }

        let mut rows = Vec::new();
        for line in data[..complete].split(|b| *b == b'\n') {
            if rows.len() >= limit.unwrap_or(usize::MAX) {
                break;
            }
            if line.is_empty() {
                continue;
            }
            let mut stored: Row = serde_json::from_slice(line).context(JsonSnafu)?;
            // Rows written before a column was added lack it.
            let row = columns
                .names()
                .map(|name| {
                    let value = stored.remove(name).unwrap_or(Value::Null);
                    (name.to_string(), value)
                })
                .collect();
            rows.push(row);
        }
        Ok((columns, rows))
    }
}

/// Cut a partial row left behind by an interrupted append. Returns the length
/// of the complete rows, where the next append starts.
async fn trim_partial_row(
    file: &mut tokio::fs::File,
    path: &Path,
) -> Result<u64, DestinationError> {
    let result: std::io::Result<u64> = async {
        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(0);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1)).await?;
        file.read_exact(&mut last).await?;
        if last[0] == b'\n' {
            return Ok(len);
        }

        let mut contents = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0)).await?;
        file.read_to_end(&mut contents).await?;
        let complete = contents
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1) as u64;
        warn!(
            path = %path.display(),
            dropped_bytes = len - complete,
            "Truncating partial trailing row"
        );
        file.set_len(complete).await?;
        Ok(complete)
    }
    .await;
    result.context(IoSnafu { path })
}
