use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Logs go to stderr so stdout stays free for generated output.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy()
        .add_directive("nem12_ingestion=info".parse().unwrap_or_else(|_| LevelFilter::INFO.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
