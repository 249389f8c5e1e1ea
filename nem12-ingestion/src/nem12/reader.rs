use std::{collections::VecDeque, fs::File, io::Read, iter::FusedIterator, path::Path};

use csv::StringRecord;
use rust_client::domain::MeterReading;
use time::UtcOffset;

use super::{
    aggregate::AggregationTable,
    error::{Nem12Error, Nem12Result},
    interval::{IntervalReadings, MINUTES_PER_DAY},
    record::{RecordType, HEADER_FORMAT},
};
use crate::config::{ParserConfig, ZeroReadingPolicy};

/// Meter block opened by a `200` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterContext {
    pub meter_id: String,
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserState {
    NoContext,
    InContext(MeterContext),
    /// End of data reached, input exhausted, or a fatal error. No further rows
    /// are read.
    Terminal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows: u64,
    pub interval_rows: u64,
    pub readings_emitted: u64,
    pub flushes: u64,
    pub unknown_records: u64,
}

/// Streaming NEM12 reader.
///
/// Pulls one row at a time, aggregates interval readings per
/// `(meter, timestamp)` and yields [`MeterReading`]s whenever the aggregation
/// table is flushed: early, once it holds `flush_threshold` distinct keys, and
/// finally at end of data. The first error ends the iteration; readings
/// already flushed before it are still yielded ahead of the error.
pub struct Nem12Reader<R> {
    rows: csv::Reader<R>,
    record: StringRecord,
    offset: UtcOffset,
    zero_readings: ZeroReadingPolicy,
    state: ParserState,
    table: AggregationTable,
    pending: VecDeque<MeterReading>,
    failure: Option<Nem12Error>,
    stats: ParseStats,
}

impl Nem12Reader<File> {
    pub fn from_path<P: AsRef<Path>>(path: P, config: &ParserConfig) -> Nem12Result<Self> {
        let file = File::open(path)?;
        Self::new(file, config)
    }
}

impl<R: Read> Nem12Reader<R> {
    /// Wraps `reader` and validates the header record before returning.
    pub fn new(reader: R, config: &ParserConfig) -> Nem12Result<Self> {
        let offset = config
            .utc_offset()
            .map_err(|e| Nem12Error::Config(format!("utc offset: {e}")))?;
        if config.flush_threshold == 0 {
            return Err(Nem12Error::Config("flush_threshold must be at least 1".to_string()));
        }

        let mut rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut record = StringRecord::new();
        if !rows.read_record(&mut record)? {
            return Err(Nem12Error::Format("header record missing".to_string()));
        }
        validate_header(&record)?;

        Ok(Self {
            rows,
            record,
            offset,
            zero_readings: config.zero_readings,
            state: ParserState::NoContext,
            table: AggregationTable::new(config.flush_threshold),
            pending: VecDeque::new(),
            failure: None,
            stats: ParseStats {
                rows: 1,
                ..ParseStats::default()
            },
        })
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Reads and dispatches the next row.
    fn advance(&mut self) -> Nem12Result<()> {
        if !self.rows.read_record(&mut self.record)? {
            self.finish();
            return Ok(());
        }
        self.stats.rows += 1;
        let line = line_of(&self.record);

        match RecordType::from_code(self.record.get(0).unwrap_or_default()) {
            RecordType::NmiDataDetails => {
                self.state = ParserState::InContext(parse_meter_context(&self.record, line)?);
            }
            RecordType::IntervalData => self.aggregate_interval_row(line)?,
            RecordType::IntervalEvent => {}
            RecordType::B2BDetails => self.state = ParserState::NoContext,
            RecordType::EndOfData => self.finish(),
            other @ (RecordType::Header | RecordType::Unknown(_)) => {
                tracing::debug!(line, record_type = %other, "ignoring unrecognised NEM12 record");
                metrics::counter!("nem12_unknown_records_total").increment(1);
                self.stats.unknown_records += 1;
            }
        }
        Ok(())
    }

    fn aggregate_interval_row(&mut self, line: u64) -> Nem12Result<()> {
        let ParserState::InContext(context) = &self.state else {
            return Err(Nem12Error::Context { line });
        };

        let readings = IntervalReadings::new(
            &self.record,
            line,
            context.interval_minutes,
            self.offset,
            self.zero_readings,
        )?;
        self.stats.interval_rows += 1;

        for reading in readings {
            let (timestamp, consumption) = reading?;
            if self.table.merge(&context.meter_id, timestamp, consumption) {
                tracing::debug!(line, keys = self.table.distinct_keys(), "flush threshold reached");
                self.stats.flushes += 1;
                self.pending.extend(self.table.drain());
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.state = ParserState::Terminal;
        if !self.table.is_empty() {
            self.stats.flushes += 1;
            self.pending.extend(self.table.drain());
        }
    }

    /// Drops the unflushed window and parks `error` behind the readings that
    /// were already flushed.
    fn abort(&mut self, error: Nem12Error) {
        self.state = ParserState::Terminal;
        self.table.clear();
        self.failure = Some(error);
    }
}

impl<R: Read> Iterator for Nem12Reader<R> {
    type Item = Nem12Result<MeterReading>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reading) = self.pending.pop_front() {
                self.stats.readings_emitted += 1;
                return Some(Ok(reading));
            }
            if let Some(e) = self.failure.take() {
                return Some(Err(e));
            }
            if self.state == ParserState::Terminal {
                return None;
            }
            if let Err(e) = self.advance() {
                self.abort(e);
            }
        }
    }
}

impl<R: Read> FusedIterator for Nem12Reader<R> {}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn validate_header(record: &StringRecord) -> Nem12Result<()> {
    let record_type = record.get(0).unwrap_or_default().trim_start_matches('\u{feff}');
    if RecordType::from_code(record_type) != RecordType::Header {
        return Err(Nem12Error::Format(format!(
            "expected header record 100 on the first line, found '{record_type}'"
        )));
    }

    let format = record.get(1).unwrap_or_default();
    if format != HEADER_FORMAT {
        return Err(Nem12Error::Format(format!(
            "only {HEADER_FORMAT} files are supported, found '{format}'"
        )));
    }
    Ok(())
}

/// NMI is field 1; interval length is the second-to-last field.
fn parse_meter_context(record: &StringRecord, line: u64) -> Nem12Result<MeterContext> {
    let meter_id = record
        .get(1)
        .filter(|nmi| !nmi.is_empty())
        .ok_or(Nem12Error::MissingField { line, field: "NMI" })?;

    if record.len() < 3 {
        return Err(Nem12Error::MissingField {
            line,
            field: "interval length",
        });
    }
    let raw_interval = record.get(record.len() - 2).unwrap_or_default();
    let interval_minutes = raw_interval
        .parse::<u32>()
        .ok()
        .filter(|&m| m > 0 && MINUTES_PER_DAY % m == 0)
        .ok_or_else(|| Nem12Error::IntervalLength {
            line,
            value: raw_interval.to_string(),
        })?;

    Ok(MeterContext {
        meter_id: meter_id.to_string(),
        interval_minutes,
    })
}
