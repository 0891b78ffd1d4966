use std::path::Path;

use tracing::info;

use crate::{
    data::{config::SourceConfig, indicator::apply_indicators, table::DatedTable},
    error::PrepResult,
    io::csv::read_raw_table,
    transform::{lag::make_lag, reconcile::expand_to_daily},
};

/// Turns one raw source into a daily table ready to be merged.
///
/// Reads `raw_dir/file_name`, keeps and renames the configured columns,
/// derives indicators, adds lag features, and expands month-start sources to
/// a forward-filled daily calendar.
#[tracing::instrument(skip_all, fields(source = %source.name))]
pub fn prepare_source(source: &SourceConfig, raw_dir: &Path, index: &str) -> PrepResult<DatedTable> {
    let name = &source.name;
    info!("Start: [{name}]");

    let path = raw_dir.join(&source.file_name);
    info!("[{name}] raw file: {}", path.display());
    let raw = read_raw_table(&path, &source.date_column, &source.date_format, index)?;
    info!(
        "[{name}] Successfully read raw data: shape ({}, {})",
        raw.height(),
        raw.width()
    );

    let selected = raw.select_renamed(&source.columns)?;
    let with_indicators = apply_indicators(&selected, &source.indicators)?;
    let lagged = source
        .lags
        .iter()
        .try_fold(with_indicators, |table, lag| make_lag(&table, lag))?;

    let prepared = if source.frequency.is_daily() {
        lagged
    } else {
        expand_to_daily(&lagged, true)?
    };

    info!(
        "[{name}] Preprocessing completed: shape ({}, {})",
        prepared.height(),
        prepared.width()
    );
    info!("End: [{name}]");
    Ok(prepared)
}
