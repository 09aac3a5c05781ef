//! Startup scan for buffer files left behind by an earlier process.
//!
//! Every file found is treated as closed: the previous owner is gone, so no
//! writer can still be appending to it. Files with no complete row are
//! removed. A trailing partial line is cut off so it never reaches the
//! destination.

use std::path::Path;

use snafu::prelude::*;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use super::file::BUFFER_FILE_EXT;
use super::{ClosedFile, IngestKey};
use crate::emit;
use crate::error::{BufferError, RotationFailedSnafu, ScanScratchSnafu};
use crate::metrics::events::FilesRecovered;

/// Find every `<scratch>/<destination_id>/<table>/*.ndjson` file.
///
/// Directories that do not form a valid key are skipped with a warning.
pub async fn recover_scratch_dir(scratch: &Path) -> Result<Vec<ClosedFile>, BufferError> {
    let mut recovered = Vec::new();

    for dest_dir in list_dirs(scratch).await? {
        for table_dir in list_dirs(&dest_dir).await? {
            let (Some(dest), Some(table)) = (file_name(&dest_dir), file_name(&table_dir)) else {
                continue;
            };
            let key = match IngestKey::new(dest, table) {
                Ok(key) => key,
                Err(e) => {
                    warn!(path = %table_dir.display(), "Skipping unrecognized scratch directory: {e}");
                    continue;
                }
            };

            let mut entries = tokio::fs::read_dir(&table_dir)
                .await
                .context(ScanScratchSnafu { path: &table_dir })?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .context(ScanScratchSnafu { path: &table_dir })?
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(BUFFER_FILE_EXT) {
                    continue;
                }

                let (rows, bytes) = complete_rows(&path).await?;
                if rows == 0 {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), "Failed to remove empty buffer file: {e}");
                    }
                    continue;
                }

                recovered.push(ClosedFile {
                    key: key.clone(),
                    path,
                    rows,
                    bytes,
                });
            }
        }
    }

    // Oldest first: file names are time-ordered UUIDs.
    recovered.sort_by(|a, b| a.path.cmp(&b.path));

    if !recovered.is_empty() {
        info!(
            count = recovered.len(),
            scratch = %scratch.display(),
            "Recovered closed buffer files"
        );
        emit!(FilesRecovered {
            count: recovered.len() as u64,
        });
    }
    Ok(recovered)
}

async fn list_dirs(dir: &Path) -> Result<Vec<std::path::PathBuf>, BufferError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(source).context(ScanScratchSnafu { path: dir }),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .context(ScanScratchSnafu { path: dir })?
    {
        let file_type = entry
            .file_type()
            .await
            .context(ScanScratchSnafu { path: entry.path() })?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

/// Count complete lines and truncate any trailing partial one.
async fn complete_rows(path: &Path) -> Result<(u64, u64), BufferError> {
    let mut contents = Vec::new();
    tokio::fs::File::open(path)
        .await
        .context(ScanScratchSnafu { path })?
        .read_to_end(&mut contents)
        .await
        .context(ScanScratchSnafu { path })?;

    let complete = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);

    if complete < contents.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = contents.len() - complete,
            "Truncating partial trailing row"
        );
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .context(RotationFailedSnafu { path })?;
        file.set_len(complete as u64)
            .await
            .context(RotationFailedSnafu { path })?;
    }

    let rows = contents[..complete]
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .count() as u64;
    Ok((rows, complete as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_scratch_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let found = recover_scratch_dir(&dir.path().join("nope")).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_recovers_files_per_key() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "acme/events/a.ndjson", "{\"a\":1}\n{\"a\":2}\n");
        write(dir.path(), "acme/users/b.ndjson", "{\"u\":1}\n");
        write(dir.path(), "acme/events/notes.txt", "ignored\n");

        let mut found = recover_scratch_dir(dir.path()).await.unwrap();
        found.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].key.to_string(), "acme/events");
        assert_eq!(found[0].rows, 2);
        assert_eq!(found[0].bytes, 16);
        assert_eq!(found[1].key.to_string(), "acme/users");
    }

    #[tokio::test]
    async fn test_empty_files_removed() {
        let dir = TempDir::new().unwrap();
        let empty = write(dir.path(), "acme/events/empty.ndjson", "");

        let found = recover_scratch_dir(dir.path()).await.unwrap();
        assert!(found.is_empty());
        assert!(!empty.exists());
    }

    #[tokio::test]
    async fn test_partial_trailing_row_truncated() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "acme/events/a.ndjson", "{\"a\":1}\n{\"a\":");

        let found = recover_scratch_dir(dir.path()).await.unwrap();
        assert_eq!(found[0].rows, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");
    }

    #[tokio::test]
    async fn test_invalid_key_directories_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".hidden/events/a.ndjson", "{}\n");

        let found = recover_scratch_dir(dir.path()).await.unwrap();
        assert!(found.is_empty());
    }
}
