//! Handing one closed file off: upload, enqueue pointer, delete local copy.

use std::time::Instant;

use bytes::Bytes;
use drift_core::{BlobStoreRef, PointerMessage, QueueRef, RetryConfig};
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::ClosedFile;
use crate::emit;
use crate::error::{
    EncodeMessageSnafu, EnqueueFailedSnafu, HandoffError, ReadClosedFileSnafu, UploadFailedSnafu,
};
use crate::metrics::events::{HandoffAbandoned, HandoffCompleted, HandoffRetried};

/// How a handoff ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Uploaded, enqueued and removed locally.
    Completed { blob_key: String, attempts: u32 },
    /// Gave up at shutdown. The local file is still there.
    Abandoned { attempts: u32 },
}

/// Blob key for a closed file: `<destination_id>/<table>/<file name>`.
///
/// The local name is a time-ordered UUID, so the key is stable across
/// retries and restarts and a repeated upload overwrites the same blob.
pub fn blob_key_for(file: &ClosedFile) -> String {
    let name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.ndjson", uuid::Uuid::now_v7()));
    format!(
        "{}/{}/{}",
        file.key.destination_id(),
        file.key.table(),
        name
    )
}

/// Progress through the three steps, kept across retries.
struct Transfer {
    blob_key: String,
    data: Option<Bytes>,
    uploaded: bool,
}

impl Transfer {
    async fn attempt(
        &mut self,
        file: &ClosedFile,
        store: &BlobStoreRef,
        queue: &QueueRef,
    ) -> Result<(), HandoffError> {
        if !self.uploaded {
            let data = match &self.data {
                Some(data) => data.clone(),
                None => {
                    let data = Bytes::from(
                        tokio::fs::read(&file.path)
                            .await
                            .context(ReadClosedFileSnafu { path: &file.path })?,
                    );
                    self.data = Some(data.clone());
                    data
                }
            };
            store
                .upload(&self.blob_key, data)
                .await
                .context(UploadFailedSnafu {
                    blob_key: &self.blob_key,
                })?;
            self.uploaded = true;
            self.data = None;
            debug!(blob_key = %self.blob_key, "Uploaded closed file");
        }

        let message = PointerMessage {
            destination_id: file.key.destination_id().to_string(),
            table: file.key.table().to_string(),
            blob_key: self.blob_key.clone(),
            rows: file.rows,
        }
        .encode()
        .context(EncodeMessageSnafu)?;

        queue.enqueue(message).await.context(EnqueueFailedSnafu {
            blob_key: &self.blob_key,
        })
    }
}

/// Hand `file` off, retrying with backoff until it succeeds or `give_up` fires.
///
/// The pointer is only enqueued after the upload succeeded, and the local
/// file is only removed after the pointer was enqueued.
pub async fn hand_off(
    file: ClosedFile,
    store: BlobStoreRef,
    queue: QueueRef,
    retry: RetryConfig,
    give_up: CancellationToken,
) -> Outcome {
    let start = Instant::now();
    let mut transfer = Transfer {
        blob_key: blob_key_for(&file),
        data: None,
        uploaded: false,
    };
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match transfer.attempt(&file, &store, &queue).await {
            Ok(()) => break,
            Err(e) => {
                emit!(HandoffRetried { stage: e.stage() });
                let delay = retry.backoff(attempts);
                warn!(
                    target_key = %file.key,
                    attempt = attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "Handoff failed: {e}"
                );
                tokio::select! {
                    biased;
                    _ = give_up.cancelled() => {
                        emit!(HandoffAbandoned);
                        warn!(
                            target_key = %file.key,
                            path = %file.path.display(),
                            "Giving up handoff; file stays on disk for recovery"
                        );
                        return Outcome::Abandoned { attempts };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    match tokio::fs::remove_file(&file.path).await {
        // Recovery will hand it off again; the consumer tolerates duplicates.
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(path = %file.path.display(), "Failed to remove handed-off file: {e}");
        }
        _ => {}
    }

    emit!(HandoffCompleted {
        key: &file.key,
        bytes: file.bytes,
        attempts,
        duration: start.elapsed(),
    });
    info!(
        target_key = %file.key,
        blob_key = %transfer.blob_key,
        rows = file.rows,
        bytes = file.bytes,
        attempts,
        duration_ms = start.elapsed().as_millis() as u64,
        "Handed off closed file"
    );

    Outcome::Completed {
        blob_key: transfer.blob_key,
        attempts,
    }
}
