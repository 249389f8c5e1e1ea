use thiserror::Error;

/// Errors raised while reading a NEM12 file.
///
/// All of them are fatal for the file being read: malformed input is a data
/// problem, so nothing here is retried.
#[derive(Debug, Error)]
pub enum Nem12Error {
    #[error("format error: {0}")]
    Format(String),

    #[error("line {line}: interval data record outside of an NMI data details block")]
    Context { line: u64 },

    #[error("line {line}: invalid reading '{value}' in interval {index}")]
    Numeric { line: u64, index: usize, value: String },

    #[error("line {line}: invalid interval date '{value}'")]
    Date { line: u64, value: String },

    #[error("line {line}: invalid interval length '{value}'")]
    IntervalLength { line: u64, value: String },

    #[error("line {line}: {count} intervals of {minutes} minutes overrun one day")]
    IntervalOverflow { line: u64, count: usize, minutes: u32 },

    #[error("line {line}: missing {field}")]
    MissingField { line: u64, field: &'static str },

    #[error("invalid parser config: {0}")]
    Config(String),

    #[error("failed to open NEM12 file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read NEM12 record: {0}")]
    Csv(#[from] csv::Error),
}

pub type Nem12Result<T> = Result<T, Nem12Error>;
