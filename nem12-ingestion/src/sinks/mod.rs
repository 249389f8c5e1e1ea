pub mod memory;
pub mod postgres;
pub mod sql_script;

pub use memory::InMemoryUpsertSink;
pub use postgres::PgUpsertSink;
pub use sql_script::SqlScriptSink;

use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use rust_client::domain::MeterReading;
use std::time::SystemTime;
use time::OffsetDateTime;

use crate::pipeline::Envelope;

pub(crate) const UPSERT_INSERT: &str = r#"INSERT INTO meter_readings (nmi, "timestamp", consumption) "#;

/// Conflicting keys are added to, never overwritten.
pub(crate) const UPSERT_ON_CONFLICT: &str =
    r#" ON CONFLICT (nmi, "timestamp") DO UPDATE SET consumption = meter_readings.consumption + EXCLUDED.consumption"#;

/// Sums readings that share a natural key within one batch.
///
/// A batch can straddle a flush boundary and carry the same key twice, and a
/// single `INSERT ... ON CONFLICT` may not update the same row twice.
pub fn coalesce(batch: &[Envelope<MeterReading>]) -> Vec<MeterReading> {
    let mut merged: IndexMap<(&str, OffsetDateTime), BigDecimal> = IndexMap::with_capacity(batch.len());
    for env in batch {
        *merged.entry(env.payload.key()).or_default() += &env.payload.consumption;
    }
    merged
        .into_iter()
        .map(|((meter_id, timestamp), consumption)| MeterReading::new(meter_id, timestamp, consumption))
        .collect()
}

/// Approximate end-to-end latency from earliest received_at to now.
pub(crate) fn record_latency<T>(batch: &[Envelope<T>]) {
    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
        if let Ok(dur) = SystemTime::now().duration_since(min_received) {
            metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
        }
    }
}
