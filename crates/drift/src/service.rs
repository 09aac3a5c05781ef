//! Wiring of buffer, handoff producer and ingest path into one running service.

use std::sync::Arc;

use drift_core::{BlobStoreRef, QueueRef};
use snafu::prelude::*;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::buffer::{DiskSpace, IngestBuffer, SysinfoDiskSpace, recover_scratch_dir};
use crate::config::{Config, FlattenConfig};
use crate::error::{ConfigSnafu, DriftError, RecoverySnafu};
use crate::flatten::{FlattenContext, FlattenerRegistry, SnowflakeIds, UuidIds};
use crate::handoff::{HandoffProducer, HandoffStats};
use crate::ingest::Ingestor;

/// A running ingest service.
pub struct Drift {
    ingestor: Ingestor,
    producer: HandoffProducer,
    config: Config,
}

impl Drift {
    /// Start with the built-in flatteners and a `sysinfo` disk probe.
    pub async fn start(
        config: Config,
        store: BlobStoreRef,
        queue: QueueRef,
    ) -> Result<Self, DriftError> {
        let disk = Arc::new(SysinfoDiskSpace::for_path(&config.buffer.scratch_dir));
        Self::start_with(
            config,
            store,
            queue,
            &FlattenerRegistry::with_builtins(),
            disk,
        )
        .await
    }

    /// Start with an explicit flattener registry and disk probe.
    ///
    /// Files left in the scratch directory by an earlier run are handed off
    /// before anything new.
    pub async fn start_with(
        config: Config,
        store: BlobStoreRef,
        queue: QueueRef,
        registry: &FlattenerRegistry,
        disk: Arc<dyn DiskSpace>,
    ) -> Result<Self, DriftError> {
        let flatteners = registry
            .build(
                &flatten_context(&config.flatten),
                &config.flatten.default_strategy,
            )
            .context(ConfigSnafu)?;

        let recovered = recover_scratch_dir(&config.buffer.scratch_dir)
            .await
            .context(RecoverySnafu)?;

        let (buffer, closed_rx) = IngestBuffer::start(config.buffer.clone(), disk, recovered);
        let producer = HandoffProducer::spawn(closed_rx, store, queue, config.handoff.clone());
        let ingestor = Ingestor::new(buffer, flatteners, config.destinations.clone());

        info!(
            scratch_dir = %config.buffer.scratch_dir.display(),
            default_strategy = %config.flatten.default_strategy,
            "Drift started"
        );

        Ok(Self {
            ingestor,
            producer,
            config,
        })
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Stop accepting writes, rotate everything and drain handoffs.
    ///
    /// Handoffs still retrying after `handoff.shutdown_timeout_secs` are
    /// abandoned; their files are recovered on the next start.
    pub async fn shutdown(self) -> HandoffStats {
        let timeout = self.config.handoff.shutdown_timeout();
        let deadline = Instant::now() + timeout;

        // Rotation waits for channel capacity, which a stuck producer never frees.
        if tokio::time::timeout(timeout, self.ingestor.buffer().shutdown())
            .await
            .is_err()
        {
            warn!("Buffer shutdown timed out; unsent files stay on disk for recovery");
        }

        let stats = self
            .producer
            .finish(deadline.saturating_duration_since(Instant::now()))
            .await;
        info!(
            completed = stats.completed,
            abandoned = stats.abandoned,
            "Drift stopped"
        );
        stats
    }
}

/// Strategy constructor inputs from configuration.
pub fn flatten_context(config: &FlattenConfig) -> FlattenContext {
    FlattenContext {
        separator: config.separator.clone(),
        order_tags: config.order_tags,
        document_ids: config
            .document_ids
            .then(|| Arc::new(UuidIds) as Arc<dyn crate::flatten::DocumentIds>),
        row_ids: Arc::new(
            config
                .node_id
                .map(SnowflakeIds::new)
                .unwrap_or_else(SnowflakeIds::random_node),
        ),
    }
}
