//! Durable queue backed by a directory tree.
//!
//! Layout:
//! - `tmp/` - messages being written, invisible to consumers
//! - `pending/{id}.{deliveries}.msg` - visible messages
//! - `inflight/{id}.{deliveries}.{deadline_ms}.lease` - leased messages
//!
//! Every state change is a `rename` within one filesystem, so several
//! processes can share a queue directory and a message is leased by at most
//! one of them at a time. Message ids are UUID v7 so lexical order is
//! roughly enqueue order.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use snafu::prelude::*;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Delivery, Queue, Receipt};
use crate::emit;
use crate::error::{QueueError, QueueIoSnafu};
use crate::metrics::events::{QueueOperation, QueueRedelivery, QueueRequest};

const MESSAGE_EXT: &str = "msg";
const LEASE_EXT: &str = "lease";

#[derive(Debug)]
pub struct DirectoryQueue {
    tmp: PathBuf,
    pending: PathBuf,
    inflight: PathBuf,
    visibility_timeout: Duration,
}

/// Parsed pieces of a queue file name.
#[derive(Debug, PartialEq, Eq)]
struct Entry<'a> {
    id: &'a str,
    deliveries: u32,
    deadline_ms: Option<i64>,
}

impl<'a> Entry<'a> {
    fn parse(name: &'a str) -> Option<Self> {
        let mut parts = name.split('.');
        let id = parts.next()?;
        let deliveries = parts.next()?.parse().ok()?;
        match (parts.next()?, parts.next(), parts.next()) {
            (MESSAGE_EXT, None, None) => Some(Entry {
                id,
                deliveries,
                deadline_ms: None,
            }),
            (deadline, Some(LEASE_EXT), None) => Some(Entry {
                id,
                deliveries,
                deadline_ms: Some(deadline.parse().ok()?),
            }),
            _ => None,
        }
    }

    fn pending_name(&self) -> String {
        format!("{}.{}.{MESSAGE_EXT}", self.id, self.deliveries)
    }
}

impl DirectoryQueue {
    /// Open (and create if needed) a queue rooted at `root`.
    pub async fn open(root: &Path, visibility_timeout: Duration) -> Result<Self, QueueError> {
        let queue = Self {
            tmp: root.join("tmp"),
            pending: root.join("pending"),
            inflight: root.join("inflight"),
            visibility_timeout,
        };
        for dir in [&queue.tmp, &queue.pending, &queue.inflight] {
            tokio::fs::create_dir_all(dir)
                .await
                .context(QueueIoSnafu { path: dir.clone() })?;
        }
        Ok(queue)
    }

    async fn list(dir: &Path) -> Result<Vec<String>, QueueError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .context(QueueIoSnafu { path: dir })?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context(QueueIoSnafu { path: dir })?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Rename, treating a vanished source as "someone else got there first".
    async fn try_rename(from: &Path, to: &Path) -> Result<bool, QueueError> {
        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(QueueError::QueueIo {
                path: from.to_path_buf(),
                source,
            }),
        }
    }

    /// Move leases past their deadline back to `pending/`.
    async fn reclaim_expired(&self) -> Result<u64, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut reclaimed = 0;

        for name in Self::list(&self.inflight).await? {
            let Some(entry) = Entry::parse(&name) else {
                continue;
            };
            if entry.deadline_ms.is_some_and(|deadline| deadline <= now_ms) {
                let from = self.inflight.join(&name);
                let to = self.pending.join(entry.pending_name());
                if Self::try_rename(&from, &to).await? {
                    debug!(message_id = entry.id, "Lease expired, message visible again");
                    reclaimed += 1;
                }
            }
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl Queue for DirectoryQueue {
    async fn enqueue(&self, message: Bytes) -> Result<(), QueueError> {
        let id = Uuid::now_v7().simple().to_string();
        let tmp = self.tmp.join(&id);
        let result = async {
            write_synced(&tmp, &message)
                .await
                .context(QueueIoSnafu { path: &tmp })?;
            let dst = self.pending.join(format!("{id}.0.{MESSAGE_EXT}"));
            tokio::fs::rename(&tmp, &dst)
                .await
                .context(QueueIoSnafu { path: &dst })?;
            // The caller may drop its own copy once this returns.
            sync_dir(&self.pending)
                .await
                .context(QueueIoSnafu { path: &self.pending })
        }
        .await;

        emit!(QueueRequest {
            operation: QueueOperation::Enqueue,
            success: result.is_ok(),
        });
        result
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let reclaimed = self.reclaim_expired().await?;
        if reclaimed > 0 {
            emit!(QueueRedelivery { count: reclaimed });
        }

        let deadline_ms =
            Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64;

        for name in Self::list(&self.pending).await? {
            let Some(entry) = Entry::parse(&name) else {
                warn!(file = %name, "Ignoring unrecognised file in queue directory");
                continue;
            };
            let deliveries = entry.deliveries + 1;
            let lease_name = format!("{}.{deliveries}.{deadline_ms}.{LEASE_EXT}", entry.id);
            let leased = self.inflight.join(&lease_name);

            if !Self::try_rename(&self.pending.join(&name), &leased).await? {
                continue;
            }

            let payload = tokio::fs::read(&leased)
                .await
                .context(QueueIoSnafu { path: &leased })?;

            emit!(QueueRequest {
                operation: QueueOperation::Dequeue,
                success: true,
            });
            return Ok(Some(Delivery {
                receipt: Receipt(lease_name),
                payload: Bytes::from(payload),
                attempt: deliveries,
            }));
        }
        Ok(None)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let path = self.inflight.join(&receipt.0);
        let result = match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(QueueError::UnknownReceipt {
                receipt: receipt.to_string(),
            }),
            Err(source) => Err(QueueError::QueueIo { path, source }),
        };
        emit!(QueueRequest {
            operation: QueueOperation::Ack,
            success: result.is_ok(),
        });
        result
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let entry = Entry::parse(&receipt.0).context(crate::error::UnknownReceiptSnafu {
            receipt: receipt.to_string(),
        })?;
        let from = self.inflight.join(&receipt.0);
        let to = self.pending.join(entry.pending_name());

        let moved = Self::try_rename(&from, &to).await?;
        emit!(QueueRequest {
            operation: QueueOperation::Nack,
            success: moved,
        });
        if moved {
            Ok(())
        } else {
            Err(QueueError::UnknownReceipt {
                receipt: receipt.to_string(),
            })
        }
    }

    async fn pending(&self) -> Result<usize, QueueError> {
        Ok(Self::list(&self.pending).await?.len())
    }
}

/// Write `contents` to a new file and flush it to stable storage.
async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

/// Persist renames into `dir`.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
