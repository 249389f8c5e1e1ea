use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use csv::StringRecord;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};

use super::error::{Nem12Error, Nem12Result};
use crate::config::ZeroReadingPolicy;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Fractional digits kept for every consumption value (`numeric(_, 3)`).
pub const CONSUMPTION_SCALE: i64 = 3;

const DATE_FIELD: usize = 1;
const FIRST_READING_FIELD: usize = 2;

/// Lazily expands one `300` record into `(timestamp, consumption)` pairs.
///
/// The number of intervals is the run of numeric fields after the date,
/// ending at the first quality/metadata field. Interval `i` starts at local
/// midnight of the record date plus `i * interval_minutes`.
///
/// Iteration stops after the first numeric parse error.
#[derive(Debug)]
pub struct IntervalReadings<'a> {
    record: &'a StringRecord,
    line: u64,
    start: OffsetDateTime,
    interval_minutes: i64,
    count: usize,
    next_index: usize,
    zero_readings: ZeroReadingPolicy,
}

impl<'a> IntervalReadings<'a> {
    pub fn new(
        record: &'a StringRecord,
        line: u64,
        interval_minutes: u32,
        offset: UtcOffset,
        zero_readings: ZeroReadingPolicy,
    ) -> Nem12Result<Self> {
        let raw_date = record
            .get(DATE_FIELD)
            .ok_or(Nem12Error::MissingField { line, field: "interval date" })?;
        let date = parse_interval_date(raw_date).ok_or_else(|| Nem12Error::Date {
            line,
            value: raw_date.to_string(),
        })?;

        let count = interval_count(record);
        if count as u64 * u64::from(interval_minutes) > u64::from(MINUTES_PER_DAY) {
            return Err(Nem12Error::IntervalOverflow {
                line,
                count,
                minutes: interval_minutes,
            });
        }

        Ok(Self {
            record,
            line,
            start: date.midnight().assume_offset(offset),
            interval_minutes: i64::from(interval_minutes),
            count,
            next_index: 0,
            zero_readings,
        })
    }

    /// Number of interval fields on the record, including zero and blank ones.
    pub fn interval_count(&self) -> usize {
        self.count
    }
}

impl Iterator for IntervalReadings<'_> {
    type Item = Nem12Result<(OffsetDateTime, BigDecimal)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_index < self.count {
            let index = self.next_index;
            self.next_index += 1;

            let raw = self.record.get(FIRST_READING_FIELD + index).unwrap_or("");
            let reading = match parse_reading(raw) {
                Ok(reading) => reading,
                Err(_) => {
                    self.next_index = self.count;
                    return Some(Err(Nem12Error::Numeric {
                        line: self.line,
                        index,
                        value: raw.to_string(),
                    }));
                }
            };

            let consumption = match reading {
                Some(value) if !value.is_zero() => value,
                _ if self.zero_readings == ZeroReadingPolicy::Record => BigDecimal::zero(),
                _ => continue,
            };

            let timestamp = self.start + Duration::minutes(self.interval_minutes * index as i64);
            return Some(Ok((timestamp, consumption)));
        }
        None
    }
}

/// A field is numeric when every `.`-separated part is made of ASCII digits.
/// Blank fields count as numeric.
fn is_numeric_field(field: &str) -> bool {
    field.split('.').all(|part| part.bytes().all(|b| b.is_ascii_digit()))
}

fn interval_count(record: &StringRecord) -> usize {
    record
        .iter()
        .skip(FIRST_READING_FIELD)
        .take_while(|field| is_numeric_field(field))
        .count()
}

/// `YYYYMMDD`
fn parse_interval_date(raw: &str) -> Option<Date> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = raw[0..4].parse().ok()?;
    let month: u8 = raw[4..6].parse().ok()?;
    let day: u8 = raw[6..8].parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

fn parse_reading(raw: &str) -> Result<Option<BigDecimal>, bigdecimal::ParseBigDecimalError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let value = BigDecimal::from_str(raw)?;
    Ok(Some(value.with_scale_round(CONSUMPTION_SCALE, RoundingMode::HalfEven)))
}
