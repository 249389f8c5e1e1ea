use futures::{pin_mut, StreamExt};
use rust_client::domain::MeterReading;
use time::macros::format_description;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use super::{coalesce, record_latency, UPSERT_INSERT, UPSERT_ON_CONFLICT};
use crate::pipeline::{batch::batches, Envelope, PipelineError, Sink};

/// Renders each batch as one additive-upsert SQL statement with literal
/// values, one statement per line.
pub struct SqlScriptSink<W> {
    out: Mutex<W>,
    batch_size: usize,
}

impl<W> SqlScriptSink<W> {
    pub fn new(out: W, batch_size: usize) -> Self {
        Self {
            out: Mutex::new(out),
            batch_size,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

fn push_string_literal(out: &mut String, value: &str) {
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
}

/// Appends one `INSERT ... ON CONFLICT` statement for `rows` to `out`.
pub fn render_upsert(rows: &[MeterReading], out: &mut String) -> Result<(), time::error::Format> {
    out.push_str(UPSERT_INSERT);
    out.push_str("VALUES ");
    for (i, r) in rows.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('(');
        push_string_literal(out, &r.meter_id);
        out.push_str(", ");
        let timestamp = r.timestamp.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
        ))?;
        push_string_literal(out, &timestamp);
        out.push_str(", ");
        out.push_str(&r.consumption.to_string());
        out.push(')');
    }
    out.push_str(UPSERT_ON_CONFLICT);
    out.push_str(";\n");
    Ok(())
}

#[async_trait::async_trait]
impl<W> Sink<MeterReading> for SqlScriptSink<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<MeterReading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut out = self.out.lock().await;
        let batches = batches(input, self.batch_size);
        pin_mut!(batches);

        let mut statement = String::new();
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }

            let rows = coalesce(&batch);
            statement.clear();
            render_upsert(&rows, &mut statement)
                .map_err(|e| PipelineError::Sink(format!("failed to format timestamp: {e}")))?;
            out.write_all(statement.as_bytes())
                .await
                .map_err(|e| PipelineError::Sink(format!("failed to write SQL: {e}")))?;

            metrics::counter!("meter_readings_rendered_total").increment(rows.len() as u64);
            record_latency(&batch);
        }

        out.flush()
            .await
            .map_err(|e| PipelineError::Sink(format!("failed to flush SQL output: {e}")))?;
        Ok(())
    }
}
