//! One open NDJSON buffer file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use snafu::prelude::*;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::error::{BufferError, CreateDirSnafu, OpenFileSnafu, WriteFileSnafu};

pub(crate) const BUFFER_FILE_EXT: &str = "ndjson";

#[derive(Debug)]
pub(crate) struct BufferFile {
    path: PathBuf,
    file: File,
    rows: u64,
    bytes: u64,
    opened_at: Instant,
}

impl BufferFile {
    /// Create a fresh, uniquely named file inside `dir`.
    pub(crate) async fn create(dir: &Path) -> Result<Self, BufferError> {
        tokio::fs::create_dir_all(dir)
            .await
            .context(CreateDirSnafu { path: dir })?;

        let path = dir.join(format!("{}.{BUFFER_FILE_EXT}", Uuid::now_v7()));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .await
            .context(OpenFileSnafu { path: &path })?;

        Ok(Self {
            path,
            file,
            rows: 0,
            bytes: 0,
            opened_at: Instant::now(),
        })
    }

    /// Append one line (`line` must not contain the trailing newline).
    ///
    /// On failure the file is truncated back to its last complete line so a
    /// partial row never reaches the handoff.
    pub(crate) async fn append_line(&mut self, line: &[u8]) -> Result<(), BufferError> {
        let result = async {
            self.file.write_all(line).await?;
            self.file.write_all(b"\n").await?;
            self.file.flush().await
        }
        .await;

        if let Err(source) = result {
            if let Err(e) = self.file.set_len(self.bytes).await {
                warn!(path = %self.path.display(), "Failed to truncate after write error: {e}");
            }
            return Err(source).context(WriteFileSnafu { path: &self.path });
        }

        self.rows += 1;
        self.bytes += line.len() as u64 + 1;
        Ok(())
    }

    /// Flush to stable storage and close.
    pub(crate) async fn close(mut self) -> (PathBuf, u64, u64, std::io::Result<()>) {
        let result = async {
            self.file.flush().await?;
            self.file.sync_all().await
        }
        .await;
        (self.path, self.rows, self.bytes, result)
    }

    pub(crate) fn rows(&self) -> u64 {
        self.rows
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
