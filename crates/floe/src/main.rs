//! Floe CLI: consume handed-off batches until a shutdown signal.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::info;

use floe::error::{BlobStoreSnafu, MetricsSnafu, OpenQueueSnafu};
use floe::{
    CliArgs, Config, Floe, FloeError, ObjectBlobStore, cancel_on_signal, init_metrics,
    init_tracing, open_queue,
};

#[derive(Parser, Debug)]
#[command(name = "floe", about = "Load drift batches into destination tables")]
struct Args {
    #[command(flatten)]
    config: CliArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();

    let paths = args.config.config_paths();
    if paths.is_empty() {
        eprintln!("Error: no config files or directories specified");
        return ExitCode::FAILURE;
    }

    info!("Loading config from {} source(s)", paths.len());

    let config = match Config::from_paths(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Floe failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), FloeError> {
    init_metrics(&config.metrics).context(MetricsSnafu)?;

    let store = Arc::new(
        ObjectBlobStore::from_config(&config.blob_store)
            .await
            .context(BlobStoreSnafu)?,
    );
    let queue = open_queue(&config.queue).await.context(OpenQueueSnafu)?;

    let shutdown = CancellationToken::new();
    let service = Floe::start(config, store, queue, shutdown.clone()).await?;

    cancel_on_signal(shutdown);

    let stats = service.join().await;
    info!(batches = stats.batches, rows = stats.rows, "Floe stopped");
    Ok(())
}
