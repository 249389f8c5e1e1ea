use std::path::PathBuf;

use async_stream::try_stream;
use futures::Stream;
use rust_client::domain::MeterReading;

use crate::{
    config::ParserConfig,
    nem12::Nem12Reader,
    pipeline::{Envelope, ItemStream, PipelineError, Source},
};

/// NEM12 file source for aggregated `MeterReading`s.
///
/// The file is opened when the stream is first polled and read one row at a
/// time as the sink pulls; it is closed when the stream ends or is dropped.
pub struct Nem12FileSource {
    path: PathBuf,
    config: ParserConfig,
}

impl Nem12FileSource {
    pub fn new<P: Into<PathBuf>>(path: P, config: ParserConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }
}

#[async_trait::async_trait]
impl Source<MeterReading> for Nem12FileSource {
    async fn stream(&self) -> ItemStream<MeterReading> {
        Box::pin(read_file(self.path.clone(), self.config.clone()))
    }
}

// The reader is blocking; rows are small and the sink sets the pace.
fn read_file(
    path: PathBuf,
    config: ParserConfig,
) -> impl Stream<Item = Result<Envelope<MeterReading>, PipelineError>> + Send {
    try_stream! {
        let mut reader = match Nem12Reader::from_path(&path, &config) {
            Ok(reader) => reader,
            Err(e) => {
                metrics::counter!("nem12_parse_errors_total").increment(1);
                tracing::error!(path = %path.display(), error = %e, "failed to open NEM12 file");
                Err(e)?
            }
        };
        tracing::info!(path = %path.display(), "reading NEM12 file");

        for result in reader.by_ref() {
            let reading = match result {
                Ok(r) => r,
                Err(e) => {
                    metrics::counter!("nem12_parse_errors_total").increment(1);
                    tracing::error!(path = %path.display(), error = %e, "NEM12 parse failed");
                    Err(e)?
                }
            };
            yield Envelope::new(reading);
        }

        let stats = reader.stats();
        tracing::info!(
            path = %path.display(),
            rows = stats.rows,
            interval_rows = stats.interval_rows,
            readings = stats.readings_emitted,
            flushes = stats.flushes,
            unknown_records = stats.unknown_records,
            "finished NEM12 file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;

    #[tokio::test]
    async fn streams_readings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "100,NEM12,200506081149,UNITEDDP,NEMMCO\n\
             200,NMI1,E1E2,1,E1,N1,01009,kWh,30,20050610\n\
             300,20230101,1.5,0,2.5,A,,,20050310121004,\n\
             900\n"
        )
        .unwrap();

        let source = Nem12FileSource::new(file.path(), ParserConfig::default());
        let readings: Vec<_> = source.stream().await.collect().await;

        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn missing_file_is_reported_through_the_stream() {
        let source = Nem12FileSource::new("/definitely/not/here.csv", ParserConfig::default());
        let items: Vec<_> = source.stream().await.collect().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Parse(_))));
    }
}
