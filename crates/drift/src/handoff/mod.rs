//! Background handoff of closed buffer files.
//!
//! # Shutdown
//!
//! The producer does not listen to the process shutdown token. It runs until
//! the buffer drops its end of the closed-file channel, which happens only
//! after the buffer rotated every key at shutdown. Files still in flight are
//! then drained. If the drain outlives the shutdown timeout, [`HandoffProducer::finish`]
//! tells the remaining retries to give up and stops taking new files; those
//! files stay on disk and are recovered on the next start.

mod transfer;

pub use transfer::{Outcome, blob_key_for, hand_off};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use drift_core::{BlobStoreRef, QueueRef};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::ClosedFile;
use crate::config::HandoffConfig;
use crate::emit;
use crate::metrics::events::ActiveHandoffs;

type HandoffFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// Totals reported when the producer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub completed: usize,
    pub abandoned: usize,
}

/// Handle to the background producer task.
pub struct HandoffProducer {
    handle: JoinHandle<HandoffStats>,
    give_up: CancellationToken,
}

impl HandoffProducer {
    /// Spawn the producer reading closed files from `closed_rx`.
    pub fn spawn(
        closed_rx: mpsc::Receiver<ClosedFile>,
        store: BlobStoreRef,
        queue: QueueRef,
        config: HandoffConfig,
    ) -> Self {
        let give_up = CancellationToken::new();
        let handle = tokio::spawn(Self::run(
            closed_rx,
            store,
            queue,
            config,
            give_up.clone(),
        ));
        Self { handle, give_up }
    }

    /// Wait for the producer to drain, giving up on retries after `timeout`.
    ///
    /// Call after the buffer has shut down, otherwise the channel never closes
    /// and this only returns once the timeout forces it.
    pub async fn finish(mut self, timeout: Duration) -> HandoffStats {
        let joined = match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Handoff drain timed out, abandoning remaining files"
                );
                self.give_up.cancel();
                self.handle.await
            }
        };
        match joined {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Handoff task ended abnormally: {e}");
                HandoffStats::default()
            }
        }
    }

    async fn run(
        mut closed_rx: mpsc::Receiver<ClosedFile>,
        store: BlobStoreRef,
        queue: QueueRef,
        config: HandoffConfig,
        give_up: CancellationToken,
    ) -> HandoffStats {
        let max_concurrent = config.max_concurrent.max(1);
        let mut handoffs: FuturesUnordered<HandoffFuture> = FuturesUnordered::new();
        let mut stats = HandoffStats::default();

        let record = |stats: &mut HandoffStats, outcome: Outcome| match outcome {
            Outcome::Completed { .. } => stats.completed += 1,
            Outcome::Abandoned { .. } => stats.abandoned += 1,
        };

        loop {
            tokio::select! {
                biased;

                // Finish handoffs first to free up slots.
                Some(outcome) = handoffs.next(), if !handoffs.is_empty() => {
                    record(&mut stats, outcome);
                    emit!(ActiveHandoffs { count: handoffs.len() });
                }

                _ = give_up.cancelled() => {
                    debug!(remaining = handoffs.len(), "Handoff deadline passed, no longer accepting files");
                    break;
                }

                received = closed_rx.recv(), if handoffs.len() < max_concurrent => {
                    let Some(file) = received else {
                        debug!(remaining = handoffs.len(), "Closed-file channel closed, draining handoffs");
                        break;
                    };
                    debug!(
                        target_key = %file.key,
                        path = %file.path.display(),
                        active = handoffs.len() + 1,
                        max_concurrent,
                        "Starting handoff"
                    );
                    handoffs.push(Box::pin(hand_off(
                        file,
                        store.clone(),
                        queue.clone(),
                        config.retry.clone(),
                        give_up.clone(),
                    )));
                    emit!(ActiveHandoffs { count: handoffs.len() });
                }
            }
        }

        while let Some(outcome) = handoffs.next().await {
            record(&mut stats, outcome);
            emit!(ActiveHandoffs {
                count: handoffs.len()
            });
        }

        info!(
            completed = stats.completed,
            abandoned = stats.abandoned,
            "Handoff producer stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::IngestKey;
    use drift_core::{MemoryQueue, ObjectBlobStore, Queue, RetryConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(max_concurrent: usize) -> HandoffConfig {
        HandoffConfig {
            max_concurrent,
            retry: RetryConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                multiplier: 2.0,
            },
            shutdown_timeout_secs: 5,
        }
    }

    fn closed_files(dir: &TempDir, n: usize) -> Vec<ClosedFile> {
        (0..n)
            .map(|i| {
                let path = dir.path().join(format!("{i:04}.ndjson"));
                std::fs::write(&path, format!("{{\"i\":{i}}}\n")).unwrap();
                ClosedFile {
                    key: IngestKey::new("acme", "events").unwrap(),
                    path,
                    rows: 1,
                    bytes: 8,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_producer_drains_all_files() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        let (tx, rx) = mpsc::channel(2);
        let producer = HandoffProducer::spawn(
            rx,
            Arc::new(ObjectBlobStore::memory()),
            queue.clone(),
            config(2),
        );

        for file in closed_files(&dir, 7) {
            tx.send(file).await.unwrap();
        }
        drop(tx);

        let stats = producer.finish(Duration::from_secs(5)).await;
        assert_eq!(
            stats,
            HandoffStats {
                completed: 7,
                abandoned: 0
            }
        );
        assert_eq!(queue.pending().await.unwrap(), 7);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_finish_returns_when_channel_stays_open() {
        let (_tx, rx) = mpsc::channel::<ClosedFile>(1);
        let producer = HandoffProducer::spawn(
            rx,
            Arc::new(ObjectBlobStore::memory()),
            Arc::new(MemoryQueue::new(Duration::from_secs(30))),
            config(1),
        );

        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            producer.finish(Duration::from_millis(10)),
        )
        .await
        .expect("finish should return after its timeout");
        assert_eq!(finished, HandoffStats::default());
    }
}
