//! Wiring of the consumer pool from configuration.

use std::path::Path;
use std::sync::Arc;

use drift_core::{BlobStoreRef, DiskSpace, QueueRef, SysinfoDiskSpace};
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::consumer::{Consumer, ConsumerPool, ConsumerStats};
use crate::destination::{DestinationManager, DestinationRegistry};
use crate::error::{ConfigSnafu, CreateScratchSnafu, FloeError, OpenDestinationsSnafu};

/// A running floe consumer.
pub struct Floe {
    pool: ConsumerPool,
    destinations: Arc<DestinationManager>,
}

impl Floe {
    /// Start with the built-in destination types and a live disk probe.
    pub async fn start(
        config: Config,
        store: BlobStoreRef,
        queue: QueueRef,
        shutdown: CancellationToken,
    ) -> Result<Self, FloeError> {
        prepare_scratch(&config.consumer.scratch_dir).await?;
        let disk = Arc::new(SysinfoDiskSpace::for_path(&config.consumer.scratch_dir));
        Self::start_with(
            config,
            store,
            queue,
            DestinationRegistry::with_builtins(),
            disk,
            shutdown,
        )
        .await
    }

    pub async fn start_with(
        config: Config,
        store: BlobStoreRef,
        queue: QueueRef,
        registry: DestinationRegistry,
        disk: Arc<dyn DiskSpace>,
        shutdown: CancellationToken,
    ) -> Result<Self, FloeError> {
        config
            .check_destination_types(&registry)
            .context(ConfigSnafu)?;
        prepare_scratch(&config.consumer.scratch_dir).await?;

        let destinations = Arc::new(DestinationManager::new(
            registry,
            config.destinations.clone(),
        ));
        destinations
            .open_all()
            .await
            .context(OpenDestinationsSnafu)?;

        let consumer = Consumer::new(queue, store, destinations.clone(), &config.consumer);
        let pool = ConsumerPool::start(consumer, &config.consumer, disk, shutdown);
        Ok(Self { pool, destinations })
    }

    pub fn destinations(&self) -> &Arc<DestinationManager> {
        &self.destinations
    }

    /// Stop taking messages. In-progress loads still finish.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub async fn join(self) -> ConsumerStats {
        self.pool.join().await
    }
}

/// Create the scratch directory and clear batches staged by an earlier run.
async fn prepare_scratch(dir: &Path) -> Result<(), FloeError> {
    tokio::fs::create_dir_all(dir)
        .await
        .context(CreateScratchSnafu { path: dir })?;

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .context(CreateScratchSnafu { path: dir })?;
    let mut removed = 0usize;
    while let Some(entry) = entries
        .next_entry()
        .await
        .context(CreateScratchSnafu { path: dir })?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "ndjson") {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), "Failed to remove stale batch: {e}"),
            }
        }
    }
    if removed > 0 {
        info!(removed, dir = %dir.display(), "Removed stale staged batches");
    }
    Ok(())
}
