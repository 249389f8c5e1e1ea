//! Streaming NEM12 interval-data reader.
//!
//! Rows are tokenised with `csv`, dispatched on their record type, expanded
//! into per-interval readings and summed per `(meter, timestamp)` in a bounded
//! aggregation table.

pub mod aggregate;
pub mod error;
pub mod interval;
pub mod reader;
pub mod record;

pub use aggregate::AggregationTable;
pub use error::{Nem12Error, Nem12Result};
pub use interval::IntervalReadings;
pub use reader::{MeterContext, Nem12Reader, ParseStats, ParserState};
pub use record::RecordType;
