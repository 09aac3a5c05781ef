//! Handoff consumer: loads announced batches into destination tables.
//!
//! Each worker leases one pointer message at a time, stages the blob in the
//! scratch directory, infers column types, evolves the table and inserts the
//! batch. The message is acked only after the insert succeeded; any other
//! failure nacks it so it is delivered again. Delivery is therefore
//! at-least-once and a batch may be inserted more than once.
//!
//! Messages that can never succeed (undecodable, unknown destination, blob
//! gone) are acked and logged as errors instead of cycling forever.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use drift_core::queue::Delivery;
use drift_core::{BlobStoreRef, DiskSpace, PointerMessage, QueueRef};
use rand::Rng;
use snafu::prelude::*;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConsumerConfig;
use crate::destination::{DestinationManager, DestinationRef, ROW_ID_COLUMN};
use crate::emit;
use crate::error::{
    ConsumerError, DecodeSnafu, DownloadSnafu, InsertFailedSnafu, PrepareTableSnafu,
    QueueSnafu, ReadBatchSnafu, SchemaEvolutionFailedSnafu,
};
use crate::metrics::events::{
    ActiveWorkers, BatchLoaded, ColumnsAdded, ConsumerFailure, DiskLow, PoisonMessage,
    QueueDepth, TypeConflicts,
};
use crate::schema::{SchemaEvolutionMode, compare_columns, infer_ndjson};

/// What one call to [`Consumer::process_next`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// The queue had nothing visible.
    Idle,
    /// The batch was inserted and its message acked.
    Loaded {
        destination_id: String,
        table: String,
        rows: u64,
    },
    /// A message that can never succeed was acked without loading.
    Dropped { stage: &'static str },
    /// Loading failed and the message was released for redelivery.
    Released { stage: &'static str },
}

/// Loads pointer messages from a queue into destinations.
#[derive(Debug, Clone)]
pub struct Consumer {
    queue: QueueRef,
    store: BlobStoreRef,
    destinations: Arc<DestinationManager>,
    scratch_dir: PathBuf,
    evolution: SchemaEvolutionMode,
}

impl Consumer {
    pub fn new(
        queue: QueueRef,
        store: BlobStoreRef,
        destinations: Arc<DestinationManager>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            destinations,
            scratch_dir: config.scratch_dir.clone(),
            evolution: config.evolution,
        }
    }

    pub fn destinations(&self) -> &Arc<DestinationManager> {
        &self.destinations
    }

    /// Lease and process at most one message.
    ///
    /// Errors are only returned when the queue itself fails; a failed load
    /// is reported as [`Processed::Released`].
    pub async fn process_next(&self) -> Result<Processed, ConsumerError> {
        let Some(delivery) = self.queue.dequeue().await.context(QueueSnafu)? else {
            return Ok(Processed::Idle);
        };

        match self.load(&delivery).await {
            Ok(processed) => {
                self.queue.ack(&delivery.receipt).await.context(QueueSnafu)?;
                Ok(processed)
            }
            Err(e) if e.is_poison() => {
                let stage = e.stage();
                error!(
                    receipt = %delivery.receipt,
                    attempt = delivery.attempt,
                    stage,
                    "Dropping message that cannot be loaded: {e}"
                );
                emit!(PoisonMessage { stage });
                self.queue.ack(&delivery.receipt).await.context(QueueSnafu)?;
                Ok(Processed::Dropped { stage })
            }
            Err(e) => {
                let stage = e.stage();
                warn!(
                    receipt = %delivery.receipt,
                    attempt = delivery.attempt,
                    stage,
                    "Batch load failed, releasing message: {e}"
                );
                emit!(ConsumerFailure { stage });
                self.queue
                    .nack(&delivery.receipt)
                    .await
                    .context(QueueSnafu)?;
                Ok(Processed::Released { stage })
            }
        }
    }

    async fn load(&self, delivery: &Delivery) -> Result<Processed, ConsumerError> {
        let message = PointerMessage::decode(&delivery.payload).context(DecodeSnafu)?;
        let destination = self.destinations.get(&message.destination_id).await?;

        let staged = self.scratch_dir.join(format!("{}.ndjson", Uuid::now_v7()));
        let result = self.load_staged(&message, &destination, &staged).await;
        match tokio::fs::remove_file(&staged).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %staged.display(), "Failed to remove staged batch: {e}");
            }
            _ => {}
        }
        result
    }

    async fn load_staged(
        &self,
        message: &PointerMessage,
        destination: &DestinationRef,
        staged: &Path,
    ) -> Result<Processed, ConsumerError> {
        let started = Instant::now();
        let table = message.table.as_str();
        let destination_id = message.destination_id.as_str();

        self.store
            .download_to(&message.blob_key, staged)
            .await
            .context(DownloadSnafu {
                blob_key: &message.blob_key,
            })?;
        let data = tokio::fs::read(staged)
            .await
            .context(ReadBatchSnafu { path: staged })?;

        let (inferred, inference) = infer_ndjson(&data);
        if inference.skipped_lines > 0 {
            warn!(
                destination = destination_id,
                table,
                skipped = inference.skipped_lines,
                "Batch has lines that are not JSON objects"
            );
        }

        destination
            .create_empty_table(table)
            .await
            .context(PrepareTableSnafu { table })?;
        let existing = destination
            .columns(table)
            .await
            .context(PrepareTableSnafu { table })?;

        let comparison = compare_columns(&existing, &inferred);
        if !comparison.type_conflicts.is_empty() {
            for (column, current, batch) in &comparison.type_conflicts {
                warn!(
                    destination = destination_id,
                    table,
                    column,
                    table_type = %current,
                    batch_type = %batch,
                    "Type conflict, keeping the table's column type"
                );
            }
            emit!(TypeConflicts {
                destination: destination_id,
                table,
                count: comparison.type_conflicts.len(),
            });
        }

        let established = existing.names().any(|name| name != ROW_ID_COLUMN);
        comparison
            .check(table, self.evolution, established)
            .context(SchemaEvolutionFailedSnafu)?;

        let added = destination
            .create_columns(table, &inferred)
            .await
            .context(PrepareTableSnafu { table })?;
        if !added.is_empty() {
            info!(
                destination = destination_id,
                table,
                columns = ?added,
                "Added columns"
            );
            emit!(ColumnsAdded {
                destination: destination_id,
                table,
                count: added.len(),
            });
        }

        let stats = destination
            .insert_batch(table, Bytes::from(data))
            .await
            .context(InsertFailedSnafu { table })?;
        if message.rows != 0 && stats.rows != message.rows {
            debug!(
                destination = destination_id,
                table,
                announced = message.rows,
                inserted = stats.rows,
                "Row count differs from the pointer message"
            );
        }

        emit!(BatchLoaded {
            destination: destination_id,
            table,
            stats,
            duration: started.elapsed(),
        });
        debug!(
            destination = destination_id,
            table,
            blob_key = %message.blob_key,
            rows = stats.rows,
            "Batch loaded"
        );

        Ok(Processed::Loaded {
            destination_id: message.destination_id.clone(),
            table: message.table.clone(),
            rows: stats.rows,
        })
    }
}

/// Totals reported when the pool exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub batches: usize,
    pub rows: u64,
    pub dropped: usize,
    pub released: usize,
}

impl ConsumerStats {
    fn merge(&mut self, other: ConsumerStats) {
        self.batches += other.batches;
        self.rows += other.rows;
        self.dropped += other.dropped;
        self.released += other.released;
    }
}

/// Worker timing and disk admission settings.
#[derive(Debug, Clone)]
struct WorkerSettings {
    dequeue_interval: Duration,
    disk_backoff: Duration,
    required_free_bytes: u64,
}

/// A fixed set of workers sharing one [`Consumer`].
///
/// Cancelling the shutdown token stops workers from taking new messages; a
/// message already being processed is finished first.
pub struct ConsumerPool {
    workers: JoinSet<ConsumerStats>,
    shutdown: CancellationToken,
}

impl ConsumerPool {
    pub fn start(
        consumer: Consumer,
        config: &ConsumerConfig,
        disk: Arc<dyn DiskSpace>,
        shutdown: CancellationToken,
    ) -> Self {
        let settings = WorkerSettings {
            dequeue_interval: config.dequeue_interval(),
            disk_backoff: config.disk_backoff(),
            required_free_bytes: config.required_free_bytes(),
        };
        let active = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for worker in 0..config.workers.max(1) {
            workers.spawn(run_worker(
                worker,
                consumer.clone(),
                settings.clone(),
                disk.clone(),
                active.clone(),
                shutdown.clone(),
            ));
        }
        workers.spawn(report_queue_depth(
            consumer.queue.clone(),
            settings.dequeue_interval,
            shutdown.clone(),
        ));

        info!(workers = config.workers, "Consumer pool started");
        Self { workers, shutdown }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every worker to stop.
    pub async fn join(mut self) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        while let Some(result) = self.workers.join_next().await {
            match result {
                Ok(worker) => stats.merge(worker),
                Err(e) => error!(error = %e, "Consumer worker panicked"),
            }
        }
        info!(
            batches = stats.batches,
            rows = stats.rows,
            dropped = stats.dropped,
            released = stats.released,
            "Consumer pool stopped"
        );
        stats
    }
}

async fn run_worker(
    worker: usize,
    consumer: Consumer,
    settings: WorkerSettings,
    disk: Arc<dyn DiskSpace>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();

    // Stagger first polls so workers do not hit the queue in lockstep.
    let jitter_ms = settings.dequeue_interval.as_millis() as u64;
    if jitter_ms > 0 {
        let jitter = Duration::from_millis(rand::rng().random_range(0..jitter_ms));
        if shutdown
            .run_until_cancelled(tokio::time::sleep(jitter))
            .await
            .is_none()
        {
            return stats;
        }
    }
    debug!(worker, "Consumer worker started");

    while !shutdown.is_cancelled() {
        let available = disk.available_bytes().unwrap_or(u64::MAX);
        if available < settings.required_free_bytes {
            warn!(
                worker,
                available,
                required = settings.required_free_bytes,
                "Scratch disk low, pausing"
            );
            emit!(DiskLow {
                available,
                required: settings.required_free_bytes,
            });
            if shutdown
                .run_until_cancelled(tokio::time::sleep(settings.disk_backoff))
                .await
                .is_none()
            {
                break;
            }
            continue;
        }

        emit!(ActiveWorkers {
            count: active.fetch_add(1, Ordering::Relaxed) + 1,
        });
        let result = consumer.process_next().await;
        emit!(ActiveWorkers {
            count: active.fetch_sub(1, Ordering::Relaxed) - 1,
        });

        let pause = match result {
            Ok(Processed::Loaded { rows, .. }) => {
                stats.batches += 1;
                stats.rows += rows;
                false
            }
            Ok(Processed::Dropped { .. }) => {
                stats.dropped += 1;
                false
            }
            Ok(Processed::Released { .. }) => {
                stats.released += 1;
                true
            }
            Ok(Processed::Idle) => true,
            Err(e) => {
                error!(worker, "Queue error: {e}");
                true
            }
        };

        if pause
            && shutdown
                .run_until_cancelled(tokio::time::sleep(settings.dequeue_interval))
                .await
                .is_none()
        {
            break;
        }
    }

    debug!(worker, "Consumer worker stopped");
    stats
}

async fn report_queue_depth(
    queue: QueueRef,
    interval: Duration,
    shutdown: CancellationToken,
) -> ConsumerStats {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    while shutdown.run_until_cancelled(ticker.tick()).await.is_some() {
        match queue.pending().await {
            Ok(pending) => emit!(QueueDepth { pending }),
            Err(e) => debug!("Failed to read queue depth: {e}"),
        }
    }
    ConsumerStats::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{Destination, DestinationRegistry, MemoryDestination};
    use crate::error::DestinationError;
    use drift_core::{BlobStore, MemoryQueue, ObjectBlobStore, Queue, StaticDiskSpace};
    use indexmap::IndexMap;
    use tempfile::TempDir;

    struct Harness {
        queue: Arc<MemoryQueue>,
        store: Arc<ObjectBlobStore>,
        destination: Arc<MemoryDestination>,
        consumer: Consumer,
        _scratch: TempDir,
    }

    fn harness(evolution: SchemaEvolutionMode) -> Harness {
        let scratch = TempDir::new().unwrap();
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(60)));
        let store = Arc::new(ObjectBlobStore::memory());
        let destination = Arc::new(MemoryDestination::new());
        let manager = Arc::new(DestinationManager::new(
            DestinationRegistry::new(),
            IndexMap::new(),
        ));
        manager.insert("acme", destination.clone());

        let config = ConsumerConfig {
            scratch_dir: scratch.path().to_path_buf(),
            evolution,
            ..ConsumerConfig::default()
        };
        let consumer = Consumer::new(queue.clone(), store.clone(), manager, &config);
        Harness {
            queue,
            store,
            destination,
            consumer,
            _scratch: scratch,
        }
    }

    impl Harness {
        async fn announce(&self, destination_id: &str, blob_key: &str, body: &'static [u8]) {
            self.store
                .upload(blob_key, Bytes::from_static(body))
                .await
                .unwrap();
            let message = PointerMessage {
                destination_id: destination_id.to_string(),
                table: "events".to_string(),
                blob_key: blob_key.to_string(),
                rows: 0,
            };
            self.queue.enqueue(message.encode().unwrap()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_loads_batch_and_acks() {
        let h = harness(SchemaEvolutionMode::Merge);
        h.announce("acme", "acme/events/1.ndjson", b"{\"__row_id\":\"a\",\"n\":1}\n{\"__row_id\":\"b\",\"n\":2.5}\n")
            .await;

        let processed = h.consumer.process_next().await.unwrap();
        assert_eq!(
            processed,
            Processed::Loaded {
                destination_id: "acme".to_string(),
                table: "events".to_string(),
                rows: 2,
            }
        );
        assert_eq!(h.queue.pending().await.unwrap(), 0);
        assert_eq!(h.queue.in_flight().await, 0);

        let mut out = Vec::new();
        h.destination
            .query_json("select * from events", &mut out)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"[{"__row_id":"a","n":1.0},{"__row_id":"b","n":2.5}]"#
        );
        assert_eq!(h.consumer.process_next().await.unwrap(), Processed::Idle);
    }

    #[tokio::test]
    async fn test_poison_messages_are_acked() {
        let h = harness(SchemaEvolutionMode::Merge);
        h.queue
            .enqueue(Bytes::from_static(b"not a pointer"))
            .await
            .unwrap();
        h.announce("initech", "initech/events/1.ndjson", b"{}\n")
            .await;
        let message = PointerMessage {
            destination_id: "acme".to_string(),
            table: "events".to_string(),
            blob_key: "acme/events/missing.ndjson".to_string(),
            rows: 1,
        };
        h.queue.enqueue(message.encode().unwrap()).await.unwrap();

        let mut stages = Vec::new();
        for _ in 0..3 {
            match h.consumer.process_next().await.unwrap() {
                Processed::Dropped { stage } => stages.push(stage),
                other => panic!("expected a dropped message, got {other:?}"),
            }
        }
        stages.sort();
        assert_eq!(stages, vec!["decode", "destination", "download"]);
        assert_eq!(h.queue.pending().await.unwrap(), 0);
        assert_eq!(h.queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_strict_mode_releases_batch_with_new_columns() {
        let h = harness(SchemaEvolutionMode::Strict);
        h.announce("acme", "acme/events/1.ndjson", b"{\"__row_id\":\"a\",\"n\":1}\n")
            .await;
        assert!(matches!(
            h.consumer.process_next().await.unwrap(),
            Processed::Loaded { .. }
        ));

        h.announce("acme", "acme/events/2.ndjson", b"{\"__row_id\":\"b\",\"n\":2,\"extra\":true}\n")
            .await;
        assert_eq!(
            h.consumer.process_next().await.unwrap(),
            Processed::Released {
                stage: "schema_evolution"
            }
        );
        assert_eq!(h.queue.pending().await.unwrap(), 1);
        assert!(!h.destination.columns("events").await.unwrap().contains("extra"));
    }

    #[tokio::test]
    async fn test_staged_file_is_removed() {
        let h = harness(SchemaEvolutionMode::Merge);
        h.announce("acme", "acme/events/1.ndjson", b"{\"n\":1}\n").await;
        h.consumer.process_next().await.unwrap();
        let leftovers = std::fs::read_dir(&h.consumer.scratch_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[derive(Debug, Default)]
    struct RejectingDestination {
        inner: MemoryDestination,
    }

    #[async_trait::async_trait]
    impl Destination for RejectingDestination {
        fn kind(&self) -> &'static str {
            "rejecting"
        }

        async fn create_empty_table(&self, table: &str) -> Result<(), DestinationError> {
            self.inner.create_empty_table(table).await
        }

        async fn create_columns(
            &self,
            table: &str,
            columns: &crate::schema::InferredSchema,
        ) -> Result<Vec<String>, DestinationError> {
            self.inner.create_columns(table, columns).await
        }

        async fn insert_batch(
            &self,
            table: &str,
            _rows: Bytes,
        ) -> Result<crate::destination::InsertStats, DestinationError> {
            Err(DestinationError::InvalidSettings {
                kind: "rejecting".to_string(),
                message: format!("refusing insert into {table}"),
            })
        }

        async fn tables(&self) -> Result<Vec<String>, DestinationError> {
            self.inner.tables().await
        }

        async fn columns(
            &self,
            table: &str,
        ) -> Result<crate::schema::InferredSchema, DestinationError> {
            self.inner.columns(table).await
        }

        async fn scan(
            &self,
            table: &str,
            limit: Option<usize>,
        ) -> Result<(crate::schema::InferredSchema, Vec<crate::destination::Row>), DestinationError>
        {
            self.inner.scan(table, limit).await
        }
    }

    #[tokio::test]
    async fn test_insert_failure_nacks() {
        let h = harness(SchemaEvolutionMode::Merge);
        h.consumer
            .destinations()
            .insert("acme", Arc::new(RejectingDestination::default()));
        h.announce("acme", "acme/events/1.ndjson", b"{\"n\":1}\n").await;

        assert_eq!(
            h.consumer.process_next().await.unwrap(),
            Processed::Released { stage: "insert" }
        );
        assert_eq!(h.queue.pending().await.unwrap(), 1);

        let redelivered = h.queue.dequeue().await.unwrap().unwrap();
        assert_eq!(redelivered.attempt, 2);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let h = harness(SchemaEvolutionMode::Merge);
        for i in 0..5 {
            h.announce("acme", &format!("acme/events/{i}.ndjson"), b"{\"n\":1}\n{\"n\":2}\n")
                .await;
        }

        let config = ConsumerConfig {
            workers: 3,
            dequeue_interval_ms: 10,
            ..ConsumerConfig::default()
        };
        let shutdown = CancellationToken::new();
        let pool = ConsumerPool::start(
            h.consumer.clone(),
            &config,
            Arc::new(StaticDiskSpace::unlimited()),
            shutdown.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.queue.pending().await.unwrap() > 0 || h.queue.in_flight().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        pool.shutdown();
        let stats = pool.join().await;
        assert_eq!(stats.batches, 5);
        assert_eq!(stats.rows, 10);
    }

    #[tokio::test]
    async fn test_pool_pauses_when_disk_low() {
        let h = harness(SchemaEvolutionMode::Merge);
        h.announce("acme", "acme/events/1.ndjson", b"{\"n\":1}\n").await;

        let config = ConsumerConfig {
            workers: 1,
            dequeue_interval_ms: 10,
            disk_backoff_ms: 10,
            min_free_disk_bytes: 1000,
            ..ConsumerConfig::default()
        };
        let shutdown = CancellationToken::new();
        let pool = ConsumerPool::start(
            h.consumer.clone(),
            &config,
            Arc::new(StaticDiskSpace::new(10)),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.shutdown();
        let stats = pool.join().await;

        assert_eq!(stats.batches, 0);
        assert_eq!(h.queue.pending().await.unwrap(), 1);
    }
}
