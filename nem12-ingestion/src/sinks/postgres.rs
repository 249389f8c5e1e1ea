use std::time::Duration;

use futures::{pin_mut, StreamExt};
use rust_client::domain::MeterReading;
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};

use super::{coalesce, record_latency, UPSERT_INSERT, UPSERT_ON_CONFLICT};
use crate::pipeline::{batch::batches, Envelope, PipelineError, Sink};

/// Writes batches into `meter_readings` with an additive upsert.
///
/// Each batch is one statement, so a failed attempt writes nothing and is safe
/// to retry.
pub struct PgUpsertSink {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgUpsertSink {
    pub fn new(pool: PgPool, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            batch_size,
            max_retries,
            retry_backoff,
        }
    }

    async fn flush_batch(&self, batch: &[Envelope<MeterReading>]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let rows = coalesce(batch);

        let mut attempt: u32 = 0;
        loop {
            match self.upsert(&rows).await {
                Ok(()) => {
                    metrics::counter!("meter_readings_upserted_total").increment(rows.len() as u64);
                    record_latency(batch);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    metrics::counter!("meter_readings_sink_retries_total").increment(1);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "meter_readings upsert failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "meter_readings upsert failed, giving up");
                    metrics::counter!("meter_readings_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }

    async fn upsert(&self, rows: &[MeterReading]) -> Result<(), sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(UPSERT_INSERT);
        builder.push_values(rows, |mut b, r| {
            b.push_bind(&r.meter_id)
                .push_bind(r.timestamp)
                .push_bind(&r.consumption);
        });
        builder.push(UPSERT_ON_CONFLICT);

        builder.build().execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl Sink<MeterReading> for PgUpsertSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<MeterReading>, PipelineError>> + Send + Unpin + 'static,
    {
        let batches = batches(input, self.batch_size);
        pin_mut!(batches);

        while let Some(batch) = batches.next().await {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline, stopping PgUpsertSink");
                    return Err(e);
                }
            };
            self.flush_batch(&batch).await?;
        }

        Ok(())
    }
}
