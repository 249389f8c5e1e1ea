use anyhow::{Context, Result};
use clap::Parser;
use nem12_ingestion::{
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    sinks::SqlScriptSink,
    sources::Nem12FileSource,
    transform,
};
use rust_client::domain::MeterReading;
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncWrite, BufWriter};

/// Convert a NEM12 file into additive-upsert SQL statements for
/// `meter_readings`.
///
/// Usage:
///   nem12_to_sql <nem12_file> [--output-file <sql_file>]
#[derive(Debug, Parser)]
#[command(name = "nem12_to_sql", version, about)]
struct Args {
    /// The NEM12 file to parse.
    filepath: PathBuf,

    /// File to write the statements to. Statements go to stdout when omitted.
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Distinct readings held in memory before an early flush.
    #[arg(long)]
    flush_threshold: Option<usize>,

    /// Readings per statement.
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let args = Args::parse();

    let cfg = AppConfig::load()?.with_overrides(args.flush_threshold, args.batch_size)?;

    let out: Box<dyn AsyncWrite + Send + Unpin> = match &args.output_file {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(tokio::io::stdout())),
    };

    let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
        source: Nem12FileSource::new(&args.filepath, cfg.parser.clone()),
        transforms: vec![Arc::new(transform::MeterReadingValidation)],
        sink: SqlScriptSink::new(out, cfg.sink.batch_size),
    };

    pipeline
        .run()
        .await
        .with_context(|| format!("failed to convert {}", args.filepath.display()))?;

    Ok(())
}
