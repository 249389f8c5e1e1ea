use anyhow::{Context, Result};
use clap::Parser;
use nem12_ingestion::{
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::Pipeline,
    sinks::PgUpsertSink,
    sources::Nem12FileSource,
    transform,
};
use rust_client::{db::meter_readings, domain::MeterReading};
use sqlx::postgres::PgPoolOptions;
use std::{path::PathBuf, sync::Arc, time::Duration};

/// Load NEM12 interval data into the `meter_readings` table.
///
/// Configuration comes from `$INGESTION_CONFIG` or `ingestion-config.toml`.
#[derive(Debug, Parser)]
#[command(name = "nem12-ingestion", version, about)]
struct Args {
    /// NEM12 files to load. Each file runs as its own pipeline.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Create the meter_readings table if it does not exist.
    #[arg(long)]
    ensure_schema: bool,

    /// Distinct readings held in memory before an early flush.
    #[arg(long)]
    flush_threshold: Option<usize>,

    /// Readings per upsert statement.
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let args = Args::parse();

    let cfg = AppConfig::load()?.with_overrides(args.flush_threshold, args.batch_size)?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await
        .context("failed to connect to database")?;

    if args.ensure_schema {
        meter_readings::ensure_schema(&pool).await?;
    }

    // Files share nothing but the connection pool, so they load concurrently.
    let mut handles = Vec::with_capacity(args.files.len());
    for path in args.files {
        let sink = PgUpsertSink::new(
            pool.clone(),
            cfg.sink.batch_size,
            cfg.sink.max_retries,
            Duration::from_millis(cfg.sink.retry_backoff_ms),
        );
        let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
            source: Nem12FileSource::new(&path, cfg.parser.clone()),
            transforms: vec![Arc::new(transform::MeterReadingValidation)],
            sink,
        };

        handles.push(tokio::spawn(async move {
            pipeline
                .run()
                .await
                .with_context(|| format!("failed to load {}", path.display()))
        }));
    }

    for handle in handles {
        handle.await??;
    }

    Ok(())
}
