use anyhow::Result;
use sqlx::PgPool;

/// DDL for the `meter_readings` table.
///
/// The unique constraint on `(nmi, "timestamp")` is what the additive upsert
/// conflicts on.
pub const CREATE_METER_READINGS: &str = r#"
CREATE TABLE IF NOT EXISTS meter_readings (
    id uuid DEFAULT gen_random_uuid() NOT NULL,
    nmi varchar(10) NOT NULL,
    "timestamp" timestamptz NOT NULL,
    consumption numeric(12, 3) NOT NULL,
    CONSTRAINT meter_readings_pk PRIMARY KEY (id),
    CONSTRAINT meter_readings_unique_consumption UNIQUE (nmi, "timestamp")
)
"#;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(CREATE_METER_READINGS).execute(pool).await?;
    Ok(())
}
