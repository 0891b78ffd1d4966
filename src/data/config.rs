use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::Utc;
use chrono_tz::Asia::Seoul;
use serde::{Deserialize, Serialize};

use crate::{
    data::{frequency::Frequency, indicator::IndicatorSpec, table::DEFAULT_INDEX},
    error::{ConfigError, IoError, PrepResult},
    transform::lag::LagSpec,
};

// ================================================================================================
// Run Timestamp
// ================================================================================================

/// Wall-clock stamp identifying one run, formatted `%Y%m%d_%H%M%S`.
///
/// Used in backup and log file names, so lexicographic order equals
/// chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTimestamp(String);

impl RunTimestamp {
    pub const FORMAT: &'static str = "%Y%m%d_%H%M%S";

    /// The current time in the deployment's time zone (Asia/Seoul).
    pub fn now() -> Self {
        Self(Utc::now().with_timezone(&Seoul).format(Self::FORMAT).to_string())
    }

    pub fn new(stamp: impl Into<String>) -> Self {
        Self(stamp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ================================================================================================
// Source Configuration
// ================================================================================================

/// Selects raw column `from` and exposes it as `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub from: String,
    pub to: String,
}

impl ColumnMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Keeps a column under its raw name.
    pub fn keep(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            from: name.clone(),
            to: name,
        }
    }
}

/// Declarative description of one raw source and the features derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Label used in logs (e.g. "SPY", "CLI").
    pub name: String,

    /// File name inside the raw data directory.
    pub file_name: String,

    /// Raw column holding the dates.
    #[serde(default = "default_date_column")]
    pub date_column: String,

    /// Fixed `chrono` format of the date column.
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Sampling cadence of the raw series. Month-start sources are expanded to
    /// a daily calendar before the merge.
    pub frequency: Frequency,

    /// Raw columns to keep, with their output names.
    pub columns: Vec<ColumnMapping>,

    /// Indicators derived after column selection, in order.
    #[serde(default)]
    pub indicators: Vec<IndicatorSpec>,

    /// Lag features derived after the indicators, in order.
    #[serde(default)]
    pub lags: Vec<LagSpec>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, file_name: impl Into<String>, frequency: Frequency) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            date_column: default_date_column(),
            date_format: default_date_format(),
            frequency,
            columns: Vec::new(),
            indicators: Vec::new(),
            lags: Vec::new(),
        }
    }

    pub fn with_date_column(mut self, column: impl Into<String>, format: impl Into<String>) -> Self {
        self.date_column = column.into();
        self.date_format = format.into();
        self
    }

    pub fn with_column(mut self, mapping: ColumnMapping) -> Self {
        self.columns.push(mapping);
        self
    }

    pub fn with_indicator(mut self, indicator: IndicatorSpec) -> Self {
        self.indicators.push(indicator);
        self
    }

    pub fn with_lag(mut self, lag: LagSpec) -> Self {
        self.lags.push(lag);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.columns.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "source '{}' selects no columns",
                self.name
            )));
        }
        if let Some(lag) = self.lags.iter().find(|lag| lag.n_lags == 0) {
            return Err(ConfigError::Invalid(format!(
                "source '{}' has a zero-period lag on '{}'",
                self.name, lag.target
            )));
        }
        Ok(())
    }
}

fn default_date_column() -> String {
    "datetime".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

// ================================================================================================
// Run Configuration
// ================================================================================================

/// Where the run log is written locally and where it is shipped afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub local_dir: PathBuf,
    pub durable_dir: PathBuf,
    pub file_prefix: String,
}

impl LogConfig {
    pub fn file_name(&self, timestamp: &RunTimestamp) -> String {
        format!("{}_{timestamp}.log", self.file_prefix)
    }
}

/// Everything one preprocessing run needs. Built once per invocation and
/// passed down explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub timestamp: RunTimestamp,
    pub raw_data_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub output_file_name: String,

    /// Timestamped backups of the output kept after rotation.
    pub max_backups: usize,

    /// Decimal places of every value in the feature table.
    #[serde(default = "default_decimals")]
    pub decimals: u32,

    /// Name of the date index shared by all prepared sources.
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Sources in merge order. The first one anchors the left join.
    pub sources: Vec<SourceConfig>,

    pub logs: LogConfig,
}

impl RunConfig {
    /// The production daily configuration: SPY price/volume with technical
    /// indicators, joined with the monthly OECD composite leading indicator.
    pub fn daily_deployment(timestamp: RunTimestamp) -> Self {
        let spy = SourceConfig::new("SPY", "spy_data.csv", Frequency::Day)
            .with_column(ColumnMapping::new("close", "spy_close"))
            .with_column(ColumnMapping::new("volume", "spy_volume"))
            .with_indicator(IndicatorSpec::Sma {
                input: "spy_close".into(),
                length: 60,
            })
            .with_indicator(IndicatorSpec::Sma {
                input: "spy_close".into(),
                length: 120,
            })
            .with_indicator(IndicatorSpec::BollingerBands {
                input: "spy_close".into(),
                length: 20,
                std: 2.0,
            })
            .with_indicator(IndicatorSpec::Macd {
                input: "spy_close".into(),
                fast: 12,
                slow: 26,
                signal: 9,
            })
            .with_indicator(IndicatorSpec::Rsi {
                input: "spy_close".into(),
                length: 14,
            })
            .with_lag(LagSpec::new("spy_volume", 1, Frequency::Day).with_drop_target(true));

        let cli = SourceConfig::new("CLI", "cli_data.csv", Frequency::MonthStart)
            .with_column(ColumnMapping::keep("CLI"))
            .with_lag(
                LagSpec::new("CLI", 1, Frequency::MonthStart)
                    .with_extend(true)
                    .with_drop_target(true),
            );

        let processed_dir = PathBuf::from("/bucket/data/processed_data");
        Self {
            timestamp,
            raw_data_dir: PathBuf::from("/bucket/data/raw_data"),
            backup_dir: processed_dir.join("backups"),
            processed_dir,
            output_file_name: "prep_D_data.csv".to_string(),
            max_backups: 2,
            decimals: default_decimals(),
            index_name: default_index_name(),
            sources: vec![spy, cli],
            logs: LogConfig {
                local_dir: PathBuf::from("/logs"),
                durable_dir: PathBuf::from("/bucket/logs/Preprocess"),
                file_prefix: "log_prep_D".to_string(),
            },
        }
    }

    /// Loads a deployment from JSON. The stored timestamp is replaced by
    /// `timestamp`.
    pub fn from_json_file(path: impl AsRef<Path>, timestamp: RunTimestamp) -> PrepResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IoError::ReadFailed(format!("run configuration {}: {e}", path.display()))
        })?;
        let mut cfg: Self = serde_json::from_str(&raw).map_err(ConfigError::Json)?;
        cfg.timestamp = timestamp;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_raw_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raw_data_dir = dir.into();
        self
    }

    /// Points the output at `dir`, with backups in `dir/backups`.
    pub fn with_processed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.processed_dir = dir.into();
        self.backup_dir = self.processed_dir.join("backups");
        self
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_logs(mut self, logs: LogConfig) -> Self {
        self.logs = logs;
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.processed_dir.join(&self.output_file_name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let primary = self.sources.first().ok_or(ConfigError::NoSources)?;
        if !primary.frequency.is_daily() {
            return Err(ConfigError::Invalid(format!(
                "primary source '{}' must be daily to anchor the merge",
                primary.name
            )));
        }
        if self.decimals > 15 {
            return Err(ConfigError::Invalid(format!(
                "{} decimals exceed f64 precision",
                self.decimals
            )));
        }
        if self.output_file_name.is_empty() {
            return Err(ConfigError::Invalid("empty output file name".to_string()));
        }
        self.sources.iter().try_for_each(SourceConfig::validate)
    }
}

fn default_decimals() -> u32 {
    6
}

fn default_index_name() -> String {
    DEFAULT_INDEX.to_string()
}
