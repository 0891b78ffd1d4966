use std::{fs, path::Path};

use chrono::NaiveDate;
use polars::prelude::{
    CsvWriterOptions, DataType, IntoLazy, LazyCsvReader, LazyFileListReader, PlPath, SinkOptions,
    SinkTarget,
};
use tracing::debug;

use crate::{
    data::{
        frequency::parse_date,
        table::{self, DatedTable},
    },
    error::{DataError, IoError, PrepResult, polars_to_prep_error},
};

/// Reads a delimited raw table and parses `date_column` with the fixed
/// `date_format` into a `Date` index named `index_name`.
///
/// The raw date column is replaced by the index; every other column is kept
/// as read.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn read_raw_table(
    path: &Path,
    date_column: &str,
    date_format: &str,
    index_name: &str,
) -> PrepResult<DatedTable> {
    if !path.is_file() {
        return Err(IoError::MissingInputFile(path.to_path_buf()).into());
    }

    let mut df = LazyCsvReader::new(PlPath::new(path_str(path)?))
        .with_has_header(true)
        // Whole file: a decimal can first appear deep into an integer column
        .with_infer_schema_length(None)
        .finish()
        .and_then(|lf| lf.collect())
        .map_err(|e| IoError::ReadFailed(format!("{}: {e}", path.display())))?;

    let raw_dates = df
        .column(date_column)
        .map_err(|_| DataError::MissingColumn(date_column.to_string()))?
        .cast(&DataType::String)
        .map_err(|e| polars_to_prep_error("Failed to read date column as text", e))?;
    let dates = parse_dates(
        raw_dates
            .str()
            .map_err(|e| polars_to_prep_error("Date column is not text", e))?
            .into_iter(),
        date_column,
        date_format,
    )?;

    df = df
        .drop(date_column)
        .map_err(|e| polars_to_prep_error("Failed to drop raw date column", e))?;
    if df.column(index_name).is_ok() {
        df = df
            .drop(index_name)
            .map_err(|e| polars_to_prep_error("Failed to drop shadowed index column", e))?;
    }
    df.insert_column(0, table::date_column(index_name, &dates)?)
        .map_err(|e| polars_to_prep_error("Failed to insert index", e))?;

    debug!(rows = df.height(), cols = df.width(), "Raw table parsed");
    DatedTable::new(df, index_name)
}

/// Writes `table` as CSV with the date index as the first column. Missing
/// values are written as empty fields. Parent directories are created.
pub fn write_table(table: &DatedTable, path: &Path) -> PrepResult<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                IoError::FileSystem(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
    }

    let target = SinkTarget::Path(PlPath::new(path_str(path)?));
    let sink_plan = table
        .as_df()
        .clone()
        .lazy()
        .sink_csv(
            target,
            CsvWriterOptions::default(),
            None,
            SinkOptions::default(),
        )
        .map_err(|e| DataError::DataFrame(format!("Failed to build CSV sink plan: {e}")))?;

    let _ = sink_plan.collect().map_err(|e| {
        IoError::WriteFailed(format!("Failed to write CSV to '{}': {e}", path.display()))
    })?;

    Ok(())
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn path_str(path: &Path) -> PrepResult<&str> {
    path.to_str().ok_or_else(|| {
        IoError::FileSystem(format!(
            "Path contains invalid UTF-8 characters: {}",
            path.display()
        ))
        .into()
    })
}

fn parse_dates<'a>(
    values: impl Iterator<Item = Option<&'a str>>,
    column: &str,
    format: &str,
) -> PrepResult<Vec<NaiveDate>> {
    values
        .enumerate()
        .map(|(row, value)| -> PrepResult<NaiveDate> {
            let malformed = |msg: String| DataError::MalformedDate {
                column: column.to_string(),
                format: format.to_string(),
                msg: format!("row {row}: {msg}"),
            };
            let value = value.ok_or_else(|| malformed("empty value".to_string()))?;
            Ok(parse_date(value, format).map_err(|e| malformed(format!("'{value}': {e}")))?)
        })
        .collect()
}
