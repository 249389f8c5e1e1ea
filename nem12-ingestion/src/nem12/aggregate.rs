use bigdecimal::BigDecimal;
use indexmap::{map::Entry, IndexMap};
use rust_client::domain::MeterReading;
use time::OffsetDateTime;

/// In-memory additive accumulator keyed by meter, then interval timestamp.
///
/// Only holds the current flush window. A key that reappears after a flush
/// starts a fresh entry and is emitted again; the sink's additive upsert
/// brings the two back together.
#[derive(Debug)]
pub struct AggregationTable {
    readings: IndexMap<String, IndexMap<OffsetDateTime, BigDecimal>>,
    distinct_keys: usize,
    flush_threshold: usize,
}

impl AggregationTable {
    /// `flush_threshold` is expected to be at least 1; the reader rejects 0.
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            readings: IndexMap::new(),
            distinct_keys: 0,
            flush_threshold,
        }
    }

    /// Adds `consumption` to the entry for `(meter_id, timestamp)`.
    ///
    /// Returns `true` once the table holds `flush_threshold` distinct keys
    /// and must be drained.
    pub fn merge(&mut self, meter_id: &str, timestamp: OffsetDateTime, consumption: BigDecimal) -> bool {
        let meter_index = match self.readings.get_index_of(meter_id) {
            Some(index) => index,
            None => self.readings.insert_full(meter_id.to_string(), IndexMap::new()).0,
        };

        match self.readings[meter_index].entry(timestamp) {
            Entry::Occupied(mut existing) => *existing.get_mut() += consumption,
            Entry::Vacant(slot) => {
                slot.insert(consumption);
                self.distinct_keys += 1;
            }
        }

        self.distinct_keys >= self.flush_threshold
    }

    pub fn distinct_keys(&self) -> usize {
        self.distinct_keys
    }

    pub fn is_empty(&self) -> bool {
        self.distinct_keys == 0
    }

    /// Discards every entry without emitting it.
    pub fn clear(&mut self) {
        self.readings.clear();
        self.distinct_keys = 0;
    }

    /// Empties the table, yielding its readings in order of first appearance.
    pub fn drain(&mut self) -> impl Iterator<Item = MeterReading> {
        self.distinct_keys = 0;
        std::mem::take(&mut self.readings)
            .into_iter()
            .flat_map(|(meter_id, intervals)| {
                intervals
                    .into_iter()
                    .map(move |(timestamp, consumption)| MeterReading::new(meter_id.clone(), timestamp, consumption))
            })
    }
}
