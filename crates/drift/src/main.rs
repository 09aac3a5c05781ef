//! Drift CLI: ingest JSON documents from stdin into the buffer and hand them off.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use snafu::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use drift::error::{BlobStoreSnafu, MetricsSnafu, OpenQueueSnafu};
use drift::{
    CliArgs, Config, Drift, DriftError, IngestError, ObjectBlobStore, init_metrics, init_tracing,
    open_queue,
};

#[derive(Parser, Debug)]
#[command(name = "drift", about = "Flatten, buffer and hand off JSON documents")]
struct Args {
    #[command(flatten)]
    config: CliArgs,

    /// Destination the documents belong to
    #[arg(short, long)]
    destination: String,

    /// Table the documents are written to
    #[arg(short, long)]
    table: String,

    /// Flattening strategy (horizontal, vertical, multitable)
    #[arg(short, long)]
    flatten: Option<String>,
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

    match run(config, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Drift failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, args: &Args) -> Result<(), DriftError> {
    init_metrics(&config.metrics).context(MetricsSnafu)?;

    let store = Arc::new(
        ObjectBlobStore::from_config(&config.blob_store)
            .await
            .context(BlobStoreSnafu)?,
    );
    let queue = open_queue(&config.queue).await.context(OpenQueueSnafu)?;

    let drift = Drift::start(config, store, queue).await?;
    let result = ingest_stdin(&drift, args).await;

    let stats = drift.shutdown().await;
    if stats.abandoned > 0 {
        warn!(
            abandoned = stats.abandoned,
            "Some files were not handed off and will be retried on next start"
        );
    }
    result
}

/// Ingest one document per non-empty stdin line until EOF or a shutdown signal.
///
/// Buffer backpressure ends the input early; rejected documents are only counted.
async fn ingest_stdin(drift: &Drift, args: &Args) -> Result<(), DriftError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = drift::shutdown_signal();
    tokio::pin!(shutdown);

    let (mut documents, mut rows, mut rejected) = (0usize, 0usize, 0usize);
    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping input");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(source) => return Err(DriftError::ReadInput { source }),
        };
        if line.trim().is_empty() {
            continue;
        }

        match drift
            .ingestor()
            .ingest(&args.destination, &args.table, &line, args.flatten.as_deref())
            .await
        {
            Ok(report) => {
                documents += report.documents;
                rows += report.rows;
                rejected += report.rejected.len();
            }
            Err(IngestError::Buffer { source }) if source.is_backpressure() => {
                error!("Ingest stopped: {source}");
                break;
            }
            Err(e) => {
                warn!("Rejected document: {e}");
                rejected += 1;
            }
        }
    }

    info!(documents, rows, rejected, "Input finished");
    Ok(())
}
