//! Keeping the raw series files current.
//!
//! Retrieval itself (market data provider, statistics agency) lives outside
//! this crate behind [`SeriesFetcher`]. This module owns what happens to the
//! retrieved rows: merging them into the stored series, writing the raw file
//! with a timestamped backup, and shaping agency extracts into dated tables.

use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::{BooleanChunked, DataFrame, DataType};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    data::{
        config::RunTimestamp,
        frequency::parse_date,
        table::{self, DatedTable},
    },
    error::{DataError, PrepResult, polars_to_prep_error},
    io::{backup::persist_with_backup, csv::read_raw_table},
};

/// The "fetch raw series as a dated table" collaborator.
pub trait SeriesFetcher {
    /// Label used in logs.
    fn source_name(&self) -> &str;

    /// Returns the series from `since` (inclusive) onwards, or the full
    /// history when `since` is `None`.
    fn fetch(&self, since: Option<NaiveDate>) -> PrepResult<DatedTable>;
}

/// One raw file kept up to date from a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshJob {
    pub file_name: String,
    pub date_column: String,
    pub date_format: String,

    /// Merge fetched rows into the stored series instead of replacing it.
    pub incremental: bool,
}

impl RefreshJob {
    pub fn incremental(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            date_column: "datetime".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            incremental: true,
        }
    }

    pub fn replacing(file_name: impl Into<String>) -> Self {
        Self {
            incremental: false,
            ..Self::incremental(file_name)
        }
    }
}

/// Refreshes `raw_dir/job.file_name` from `fetcher`.
///
/// Incremental jobs read the stored series, fetch from its last date onwards
/// and upsert the fetched rows (fetched rows win on shared dates). Other jobs
/// replace the file with the full fetched history. The result is written
/// together with a timestamped copy in `backup_dir`, which is then rotated
/// down to `max_backups`.
#[tracing::instrument(skip_all, fields(source = fetcher.source_name(), file = %job.file_name))]
pub fn refresh_raw_series(
    fetcher: &dyn SeriesFetcher,
    job: &RefreshJob,
    raw_dir: &Path,
    backup_dir: &Path,
    timestamp: &RunTimestamp,
    max_backups: usize,
) -> PrepResult<DatedTable> {
    let name = fetcher.source_name();
    let path = raw_dir.join(&job.file_name);
    info!("Start: [{name}]");

    let stored = if job.incremental {
        let stored = read_raw_table(&path, &job.date_column, &job.date_format, &job.date_column)?;
        info!("[{name}] Existing data: {} rows", stored.height());
        Some(stored)
    } else {
        None
    };

    let since = match &stored {
        Some(table) => table.last_date()?,
        None => None,
    };
    if let Some(since) = since {
        info!("[{name}] Download start date: {since}");
    }

    let fetched = rename_index(fetcher.fetch(since)?, &job.date_column)?;
    info!("[{name}] Successfully retrieved data: {} rows", fetched.height());

    let refreshed = match stored {
        Some(stored) => stored.upsert(&fetched)?,
        None => fetched.deduplicated()?,
    };
    info!("[{name}] Total data after merge: {} rows", refreshed.height());

    let outcome = persist_with_backup(&refreshed, &path, backup_dir, timestamp, max_backups)?;
    info!("[{name}] Saved data: {}", outcome.primary.display());
    info!("End: [{name}]");
    Ok(refreshed)
}

/// Shapes a statistics-agency extract (SDMX CSV with `MEASURE`, `TIME_PERIOD`
/// and `OBS_VALUE` columns) into a monthly dated table.
///
/// Keeps the rows of `measure`, parses `TIME_PERIOD` as `%Y-%m` into a
/// month-start index named `index_name`, and names the values `value_name`.
/// When a period repeats, the last row wins.
pub fn extract_measure(
    raw: &DataFrame,
    measure: &str,
    value_name: &str,
    index_name: &str,
) -> PrepResult<DatedTable> {
    let text = |name: &str| -> PrepResult<Vec<Option<String>>> {
        let column = raw
            .column(name)
            .map_err(|_| DataError::MissingColumn(name.to_string()))?
            .cast(&DataType::String)
            .map_err(|e| polars_to_prep_error("Failed to read column as text", e))?;
        Ok(column
            .str()
            .map_err(|e| polars_to_prep_error("Column is not text", e))?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect())
    };

    let measures = text(SDMX_MEASURE)?;
    let periods = text(SDMX_TIME_PERIOD)?;
    let keep = measures
        .iter()
        .map(|m| m.as_deref() == Some(measure))
        .collect::<BooleanChunked>();

    let dates = periods
        .iter()
        .zip(measures.iter())
        .filter(|(_, m)| m.as_deref() == Some(measure))
        .enumerate()
        .map(|(row, (period, _))| -> PrepResult<NaiveDate> {
            let period = period.as_deref().unwrap_or_default();
            Ok(parse_date(period, SDMX_PERIOD_FORMAT).map_err(|e| DataError::MalformedDate {
                column: SDMX_TIME_PERIOD.to_string(),
                format: SDMX_PERIOD_FORMAT.to_string(),
                msg: format!("row {row}: '{period}': {e}"),
            })?)
        })
        .collect::<PrepResult<Vec<_>>>()?;

    let values = raw
        .column(SDMX_OBS_VALUE)
        .map_err(|_| DataError::MissingColumn(SDMX_OBS_VALUE.to_string()))?
        .filter(&keep)
        .and_then(|c| c.cast(&DataType::Float64))
        .map_err(|e| polars_to_prep_error("Failed to read observations", e))?
        .with_name(value_name.into());

    let df = DataFrame::new(vec![table::date_column(index_name, &dates)?, values])
        .map_err(|e| polars_to_prep_error("Failed to build measure frame", e))?;

    // The frame is sorted stably on construction, so repeated periods keep
    // their extract order before deduplication.
    DatedTable::new(df, index_name)?.deduplicated()
}

const SDMX_MEASURE: &str = "MEASURE";
const SDMX_TIME_PERIOD: &str = "TIME_PERIOD";
const SDMX_OBS_VALUE: &str = "OBS_VALUE";
const SDMX_PERIOD_FORMAT: &str = "%Y-%m";

fn rename_index(fetched: DatedTable, index: &str) -> PrepResult<DatedTable> {
    if fetched.index_name().as_str() == index {
        return Ok(fetched);
    }
    let old = fetched.index_name().clone();
    let mut df = fetched.into_df();
    df.rename(old.as_str(), index.into())
        .map_err(|e| polars_to_prep_error("Failed to rename index", e))?;
    DatedTable::new(df, index)
}
