use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

use bigdecimal::BigDecimal;
use futures::{pin_mut, StreamExt};
use indexmap::IndexMap;
use rust_client::domain::MeterReading;
use time::OffsetDateTime;

use super::coalesce;
use crate::pipeline::{batch::batches, Envelope, PipelineError, Sink};

/// Applies the same additive upsert as [`super::PgUpsertSink`] to an
/// in-memory table keyed by `(meter_id, timestamp)`.
pub struct InMemoryUpsertSink {
    batch_size: usize,
    table: Mutex<IndexMap<(String, OffsetDateTime), BigDecimal>>,
    batches_written: AtomicU64,
}

impl InMemoryUpsertSink {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            table: Mutex::new(IndexMap::new()),
            batches_written: AtomicU64::new(0),
        }
    }

    /// Current persisted totals, in order of first insert.
    pub fn totals(&self) -> Vec<MeterReading> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|((meter_id, timestamp), consumption)| {
                MeterReading::new(meter_id.clone(), *timestamp, consumption.clone())
            })
            .collect()
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written.load(Ordering::Relaxed)
    }

    fn upsert(&self, rows: Vec<MeterReading>) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for row in rows {
            *table.entry((row.meter_id, row.timestamp)).or_default() += row.consumption;
        }
    }
}

#[async_trait::async_trait]
impl Sink<MeterReading> for InMemoryUpsertSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<MeterReading>, PipelineError>> + Send + Unpin + 'static,
    {
        let batches = batches(input, self.batch_size);
        pin_mut!(batches);

        while let Some(batch) = batches.next().await {
            let batch = batch?;
            self.upsert(coalesce(&batch));
            self.batches_written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
