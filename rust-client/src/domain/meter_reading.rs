use bigdecimal::BigDecimal;
use time::OffsetDateTime;

/// One aggregated interval of consumption for a single meter.
///
/// `(meter_id, timestamp)` is the natural key. Two readings with the same key
/// describe the same physical interval and are combined by addition.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterReading {
    #[sqlx(rename = "nmi")]
    pub meter_id: String,
    pub timestamp: OffsetDateTime,
    pub consumption: BigDecimal,
}

impl MeterReading {
    pub fn new(meter_id: impl Into<String>, timestamp: OffsetDateTime, consumption: BigDecimal) -> Self {
        Self {
            meter_id: meter_id.into(),
            timestamp,
            consumption,
        }
    }

    pub fn key(&self) -> (&str, OffsetDateTime) {
        (&self.meter_id, self.timestamp)
    }
}
