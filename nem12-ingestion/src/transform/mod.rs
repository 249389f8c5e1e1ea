use crate::pipeline::{Envelope, PipelineError, Transform};
use rust_client::domain::MeterReading;
use time::macros::datetime;

/// Longest NMI the `meter_readings.nmi` column accepts.
pub const MAX_NMI_LEN: usize = 10;

/// Pure validation of a `MeterReading` against the persisted schema.
///
/// Rules:
/// - meter_id must be 1..=10 characters.
/// - timestamp must be within a broad sanity window [2000-01-01, 2100-01-01).
///
/// Consumption values are not inspected.
pub fn validate_meter_reading(env: Envelope<MeterReading>) -> Result<Envelope<MeterReading>, PipelineError> {
    let m = &env.payload;

    let nmi_len = m.meter_id.chars().count();
    if nmi_len == 0 || nmi_len > MAX_NMI_LEN {
        return Err(PipelineError::Transform(format!(
            "meter id '{}' must be 1 to {MAX_NMI_LEN} characters",
            m.meter_id
        )));
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if m.timestamp < min_ts || m.timestamp >= max_ts {
        return Err(PipelineError::Transform(format!(
            "timestamp {} out of allowed range",
            m.timestamp
        )));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct MeterReadingValidation;

#[async_trait::async_trait]
impl Transform<MeterReading, MeterReading> for MeterReadingValidation {
    async fn apply(&self, input: Envelope<MeterReading>) -> Result<Envelope<MeterReading>, PipelineError> {
        match validate_meter_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_meter_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
