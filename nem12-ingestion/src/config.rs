use anyhow::{bail, Context};
use serde::Deserialize;
use std::{env, fs, path::Path};
use time::UtcOffset;

const DEFAULT_CONFIG_PATH: &str = "ingestion-config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_uri")]
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_database_uri(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_uri() -> String {
    env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/meter_readings".to_string())
}

fn default_max_connections() -> u32 {
    4
}

/// What to do with interval readings that are zero or blank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroReadingPolicy {
    /// The interval contributes nothing to the aggregation table.
    #[default]
    Skip,
    /// The interval is recorded as an explicit zero reading.
    Record,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    /// Distinct (meter, timestamp) keys held in memory before an early flush.
    /// Small values give the low-memory behaviour.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Offset applied to every interval date. 600 minutes is AEST, which
    /// has no daylight saving.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub zero_readings: ZeroReadingPolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            utc_offset_minutes: default_utc_offset_minutes(),
            zero_readings: ZeroReadingPolicy::default(),
        }
    }
}

impl ParserConfig {
    pub fn utc_offset(&self) -> Result<UtcOffset, time::error::ComponentRange> {
        UtcOffset::from_whole_seconds(self.utc_offset_minutes * 60)
    }
}

fn default_flush_threshold() -> usize {
    100_000
}

fn default_utc_offset_minutes() -> i32 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Load from `$INGESTION_CONFIG` if set, otherwise from
    /// `ingestion-config.toml` when it exists, otherwise defaults.
    pub fn load() -> anyhow::Result<Self> {
        let cfg = match env::var("INGESTION_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH)?,
            Err(_) => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("failed to read config '{path}'"))?;
        let cfg: AppConfig = toml::from_str(&contents).with_context(|| format!("invalid config '{path}'"))?;
        Ok(cfg)
    }

    /// Applies command-line overrides and re-validates.
    pub fn with_overrides(mut self, flush_threshold: Option<usize>, batch_size: Option<usize>) -> anyhow::Result<Self> {
        if let Some(n) = flush_threshold {
            self.parser.flush_threshold = n;
        }
        if let Some(n) = batch_size {
            self.sink.batch_size = n;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parser.flush_threshold == 0 {
            bail!("parser.flush_threshold must be at least 1");
        }
        if self.sink.batch_size == 0 {
            bail!("sink.batch_size must be at least 1");
        }
        self.parser
            .utc_offset()
            .map_err(|e| anyhow::anyhow!("invalid parser.utc_offset_minutes: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.parser.flush_threshold, 100_000);
        assert_eq!(cfg.parser.zero_readings, ZeroReadingPolicy::Skip);
        assert_eq!(cfg.parser.utc_offset().unwrap(), UtcOffset::from_hms(10, 0, 0).unwrap());
        assert_eq!(cfg.sink.batch_size, 100);
        assert!(cfg.metrics.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [parser]
            flush_threshold = 500
            utc_offset_minutes = 570
            zero_readings = "record"

            [sink]
            batch_size = 25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.parser.flush_threshold, 500);
        assert_eq!(cfg.parser.zero_readings, ZeroReadingPolicy::Record);
        assert_eq!(cfg.parser.utc_offset().unwrap(), UtcOffset::from_hms(9, 30, 0).unwrap());
        assert_eq!(cfg.sink.batch_size, 25);
        assert_eq!(cfg.sink.max_retries, 3);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let cfg: AppConfig = toml::from_str("[parser]\nflush_threshold = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_replace_sizes_and_are_validated() {
        let cfg = AppConfig::default().with_overrides(Some(10), Some(5)).unwrap();
        assert_eq!(cfg.parser.flush_threshold, 10);
        assert_eq!(cfg.sink.batch_size, 5);

        assert!(AppConfig::default().with_overrides(None, Some(0)).is_err());
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let cfg: AppConfig = toml::from_str("[parser]\nutc_offset_minutes = 6000\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
