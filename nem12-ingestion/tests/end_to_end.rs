//! File → parser → validation → additive sink, the way the binaries wire it.

use std::{io::Write, str::FromStr, sync::Arc};

use bigdecimal::BigDecimal;
use nem12_ingestion::{
    config::{ParserConfig, ZeroReadingPolicy},
    nem12::Nem12Error,
    pipeline::{Pipeline, PipelineError},
    sinks::{InMemoryUpsertSink, SqlScriptSink},
    sources::Nem12FileSource,
    transform::MeterReadingValidation,
};
use rust_client::domain::MeterReading;
use tempfile::NamedTempFile;
use time::macros::datetime;

const SAMPLE: &str = "\
100,NEM12,200506081149,UNITEDDP,NEMMCO
200,NEM1201009,E1E2,1,E1,N1,01009,kWh,30,20050610
300,20050301,0,0,0,0,0,0,0,0,0,0,0,0,0.461,0.810,0.568,1.234,1.353,1.507,1.344,1.773,0.848,1.271,0.895,1.327,1.013,1.793,0.988,0.985,0.876,0.555,0.760,0.938,0.566,0.512,0.970,0.760,0.731,0.615,0.886,0.531,0.774,0.712,0.598,0.670,0.587,0.657,0.345,0.231,A,,,20050310121004,20050310182204
300,20050302,0,0,0,0,0,0,0,0,0,0,0,0,0.235,0.567,0.890,1.123,1.345,1.567,1.543,1.234,0.987,1.123,0.876,1.345,1.145,1.173,1.265,0.987,0.678,0.998,0.768,0.954,0.876,0.845,0.932,0.786,0.945,0.636,0.568,0.888,0.791,0.878,0.576,0.785,0.734,0.632,0.543,0.458,A,,,20050310121004,20050310182204
400,1,48,F14,76,
500,O,S01009,20050310121004,
200,NEM1201009,E1E2,2,E2,,01009,kWh,30,20050610
300,20050301,0,0,0,0,0,0,0,0,0,0,0,0,0.154,0.460,0.770,1.003,1.059,1.750,1.423,1.200,0.980,1.111,0.800,1.403,1.145,1.173,1.065,1.187,0.900,0.998,0.768,1.432,0.899,1.211,0.873,0.786,1.504,0.719,0.817,0.780,0.709,0.700,0.565,0.655,0.543,0.786,0.430,0.432,A,,,20050310121004,20050310182204
500,O,S01009,20050310121004,
900
";

fn write_input(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn parser(flush_threshold: usize) -> ParserConfig {
    ParserConfig {
        flush_threshold,
        ..ParserConfig::default()
    }
}

async fn load(path: &std::path::Path, flush_threshold: usize, batch_size: usize) -> Result<Arc<InMemoryUpsertSink>, PipelineError> {
    let sink = Arc::new(InMemoryUpsertSink::new(batch_size));
    let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
        source: Nem12FileSource::new(path, parser(flush_threshold)),
        transforms: vec![Arc::new(MeterReadingValidation)],
        sink: sink.clone(),
    };
    pipeline.run().await?;
    Ok(sink)
}

fn sorted(mut readings: Vec<MeterReading>) -> Vec<MeterReading> {
    readings.sort_by(|a, b| (&a.meter_id, a.timestamp).cmp(&(&b.meter_id, b.timestamp)));
    readings
}

#[tokio::test]
async fn both_registers_of_the_same_nmi_are_summed_per_interval() {
    let file = write_input(SAMPLE);
    let sink = load(file.path(), 100_000, 100).await.unwrap();
    let totals = sorted(sink.totals());

    // 36 non-zero intervals on each of two days.
    assert_eq!(totals.len(), 72);

    let first = &totals[0];
    assert_eq!(first.meter_id, "NEM1201009");
    assert_eq!(first.timestamp, datetime!(2005-03-01 06:00 +10));
    assert_eq!(first.consumption, BigDecimal::from_str("0.615").unwrap()); // 0.461 + 0.154

    let last_of_day_one = totals.iter().find(|r| r.timestamp == datetime!(2005-03-01 23:30 +10)).unwrap();
    assert_eq!(last_of_day_one.consumption, BigDecimal::from_str("0.663").unwrap()); // 0.231 + 0.432
}

#[tokio::test]
async fn totals_do_not_depend_on_flush_threshold_or_batch_size() {
    let file = write_input(SAMPLE);
    let reference = sorted(load(file.path(), 100_000, 100).await.unwrap().totals());

    for (threshold, batch_size) in [(1, 1), (3, 7), (50, 2), (71, 100)] {
        let sink = load(file.path(), threshold, batch_size).await.unwrap();
        assert_eq!(sorted(sink.totals()), reference, "threshold {threshold}, batch {batch_size}");
    }
}

#[tokio::test]
async fn single_reading_example() {
    let mut readings = vec!["0"; 47];
    readings.push("1.234");
    let input = format!(
        "100,NEM12,200506081149,UNITEDDP,NEMMCO\n\
         200,TEST0001,E1,1,E1,N1,01009,kWh,30,20230102\n\
         300,20230101,{},A,,,20230102000000,\n\
         900\n",
        readings.join(",")
    );
    let file = write_input(&input);

    let sink = load(file.path(), 100_000, 100).await.unwrap();

    assert_eq!(
        sink.totals(),
        vec![MeterReading::new(
            "TEST0001",
            datetime!(2023-01-01 23:30 +10),
            BigDecimal::from_str("1.234").unwrap()
        )]
    );
}

#[tokio::test]
async fn bad_header_writes_nothing() {
    let file = write_input("100,NEM13,200506081149\n200,NMI1,E1,1,E1,N1,01009,kWh,30,\n900\n");
    let sink = Arc::new(InMemoryUpsertSink::new(10));
    let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
        source: Nem12FileSource::new(file.path(), ParserConfig::default()),
        transforms: vec![],
        sink: sink.clone(),
    };

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Parse(Nem12Error::Format(_))));
    assert_eq!(sink.batches_written(), 0);
}

#[tokio::test]
async fn context_error_keeps_already_flushed_batches() {
    let input = "\
100,NEM12,200506081149,UNITEDDP,NEMMCO
200,NMI1,E1,1,E1,N1,01009,kWh,30,
300,20230101,1,2,3,4,A,,,,
500,O,S01009,,
300,20230102,1,2,3,4,A,,,,
900
";
    let file = write_input(input);
    let sink = Arc::new(InMemoryUpsertSink::new(2));
    let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
        source: Nem12FileSource::new(file.path(), parser(2)),
        transforms: vec![],
        sink: sink.clone(),
    };

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Parse(Nem12Error::Context { line: 5 })));
    assert_eq!(sink.totals().len(), 4);
}

#[tokio::test]
async fn flushed_readings_reach_the_sink_before_a_bad_reading() {
    let input = "\
100,NEM12,200506081149,UNITEDDP,NEMMCO
200,NMI1,E1,1,E1,N1,01009,kWh,30,
300,20230101,1,2,1.2.3,A,,,,
900
";
    let file = write_input(input);
    let sink = Arc::new(InMemoryUpsertSink::new(1));
    let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
        source: Nem12FileSource::new(file.path(), parser(2)),
        transforms: vec![],
        sink: sink.clone(),
    };

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Parse(Nem12Error::Numeric { line: 3, .. })));
    assert_eq!(sink.batches_written(), 2);
    assert_eq!(
        sink.totals(),
        vec![
            MeterReading::new("NMI1", datetime!(2023-01-01 00:00 +10), BigDecimal::from(1)),
            MeterReading::new("NMI1", datetime!(2023-01-01 00:30 +10), BigDecimal::from(2)),
        ]
    );
}

#[tokio::test]
async fn overlong_nmi_is_rejected_by_validation() {
    let input = "\
100,NEM12,200506081149,UNITEDDP,NEMMCO
200,NMI12345678,E1,1,E1,N1,01009,kWh,30,
300,20230101,1,A,,,,
900
";
    let file = write_input(input);
    let err = load(file.path(), 100_000, 10).await.err().unwrap();
    assert!(matches!(err, PipelineError::Transform(_)));
}

#[tokio::test]
async fn record_policy_emits_zero_intervals() {
    let input = "\
100,NEM12,200506081149,UNITEDDP,NEMMCO
200,NMI1,E1,1,E1,N1,01009,kWh,360,
300,20230101,0,,1.5,0,A,,,,
900
";
    let file = write_input(input);
    let sink = Arc::new(InMemoryUpsertSink::new(10));
    let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
        source: Nem12FileSource::new(
            file.path(),
            ParserConfig {
                zero_readings: ZeroReadingPolicy::Record,
                ..ParserConfig::default()
            },
        ),
        transforms: vec![],
        sink: sink.clone(),
    };
    pipeline.run().await.unwrap();

    let totals = sink.totals();
    assert_eq!(totals.len(), 4);
    assert_eq!(totals[3].timestamp, datetime!(2023-01-01 18:00 +10));
}

#[tokio::test]
async fn sql_script_output_for_sample_file() {
    let file = write_input(SAMPLE);
    let sink = Arc::new(SqlScriptSink::new(Vec::<u8>::new(), 100));
    let pipeline: Pipeline<_, MeterReading, _> = Pipeline {
        source: Nem12FileSource::new(file.path(), ParserConfig::default()),
        transforms: vec![Arc::new(MeterReadingValidation)],
        sink: sink.clone(),
    };
    pipeline.run().await.unwrap();

    let sink = Arc::try_unwrap(sink).ok().unwrap();
    let script = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(script.lines().count(), 1);
    assert!(script.contains("('NEM1201009', '2005-03-01 06:00:00+10:00', 0.615)"));
    assert!(script.trim_end().ends_with("EXCLUDED.consumption;"));
}
