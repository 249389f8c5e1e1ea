use std::fmt;

pub const HEADER_FORMAT: &str = "NEM12";

/// Record type, taken from the leading field of each row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordType {
    /// `100`: file header.
    Header,
    /// `200`: NMI data details; opens a block for one meter.
    NmiDataDetails,
    /// `300`: one day of interval readings.
    IntervalData,
    /// `400`: interval event (quality override).
    IntervalEvent,
    /// `500`: B2B details; closes the current meter block.
    B2BDetails,
    /// `900`: end of data.
    EndOfData,
    Unknown(String),
}

impl RecordType {
    pub fn from_code(code: &str) -> Self {
        match code {
            "100" => Self::Header,
            "200" => Self::NmiDataDetails,
            "300" => Self::IntervalData,
            "400" => Self::IntervalEvent,
            "500" => Self::B2BDetails,
            "900" => Self::EndOfData,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Header => "100",
            Self::NmiDataDetails => "200",
            Self::IntervalData => "300",
            Self::IntervalEvent => "400",
            Self::B2BDetails => "500",
            Self::EndOfData => "900",
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
