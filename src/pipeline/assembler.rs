use itertools::Itertools;
use tracing::{debug, info};

use crate::{
    data::{config::RunConfig, table::DatedTable},
    error::{ConfigError, DataError, PrepResult},
    io::backup::{PersistOutcome, persist_with_backup},
    pipeline::source::prepare_source,
};

/// A merged daily table with no missing values and rounded floats.
#[derive(Debug, Clone)]
pub struct FeatureTable(DatedTable);

impl FeatureTable {
    pub fn as_table(&self) -> &DatedTable {
        &self.0
    }

    pub fn into_table(self) -> DatedTable {
        self.0
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub feature_table: FeatureTable,
    pub persisted: PersistOutcome,
}

/// Left-merges `tables` on the date index, anchored on the first table, then
/// forward-fills, drops rows with any missing value and rounds to `decimals`.
///
/// `NaN` counts as missing. A merge that leaves no complete row is an error.
#[tracing::instrument(skip_all, fields(tables = tables.len()))]
pub fn merge_feature_table(tables: &[DatedTable], decimals: u32) -> PrepResult<FeatureTable> {
    let (anchor, rest) = tables.split_first().ok_or(ConfigError::NoSources)?;

    let merged = rest
        .iter()
        .try_fold(anchor.clone(), |acc, table| acc.left_join(table))?;
    info!(
        "[Total] Merged table: shape ({}, {})",
        merged.height(),
        merged.width()
    );

    let complete = merged.nan_as_missing()?.forward_filled()?.drop_incomplete()?;
    if complete.is_empty() {
        return Err(DataError::EmptyMergeResult(format!(
            "all {} merged rows have a missing value",
            merged.height()
        ))
        .into());
    }

    let table = complete.rounded(decimals)?;
    debug!(columns = %table.value_columns().iter().join(", "), "Feature columns");
    Ok(FeatureTable(table))
}

/// Prepares every configured source and merges them into the feature table.
pub fn assemble(cfg: &RunConfig) -> PrepResult<FeatureTable> {
    cfg.validate()?;

    let tables = cfg
        .sources
        .iter()
        .map(|source| prepare_source(source, &cfg.raw_data_dir, &cfg.index_name))
        .collect::<PrepResult<Vec<_>>>()?;

    info!("Start: [Total]");
    let feature_table = merge_feature_table(&tables, cfg.decimals)?;
    let table = feature_table.as_table();
    info!(
        "[Total] Preprocessing completed: shape ({}, {})",
        table.height(),
        table.width()
    );
    Ok(feature_table)
}

/// Runs the whole preprocessing job: assemble, then persist with a
/// timestamped backup and rotation.
#[tracing::instrument(skip_all, fields(timestamp = %cfg.timestamp))]
pub fn run(cfg: &RunConfig) -> PrepResult<RunOutput> {
    info!("Start Preprocess.");
    let feature_table = assemble(cfg)?;

    let output_path = cfg.output_path();
    info!("[Total] output file: {}", output_path.display());
    let persisted = persist_with_backup(
        feature_table.as_table(),
        &output_path,
        &cfg.backup_dir,
        &cfg.timestamp,
        cfg.max_backups,
    )?;
    info!("End: [Total]");
    info!("End Preprocess.");

    Ok(RunOutput {
        feature_table,
        persisted,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Days, NaiveDate};
    use polars::df;

    use super::*;
    use crate::{
        data::{frequency::Frequency, table::DEFAULT_INDEX},
        error::PrepError,
        transform::{
            lag::{LagSpec, make_lag},
            reconcile::expand_to_daily,
        },
    };

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn daily_from(start: NaiveDate, values: &[f64]) -> DatedTable {
        let dates = (0..values.len())
            .map(|i| start + Days::new(i as u64))
            .collect::<Vec<_>>();
        let df = df!["v" => values].expect("Failed to create DF");
        DatedTable::from_parts(DEFAULT_INDEX, &dates, df).expect("Failed to create table")
    }

    fn monthly(dates: &[NaiveDate], values: &[f64]) -> DatedTable {
        let df = df!["CLI" => values].expect("Failed to create DF");
        DatedTable::from_parts(DEFAULT_INDEX, dates, df).expect("Failed to create table")
    }

    #[test]
    fn test_merge_keeps_anchor_dates_with_known_values() {
        // Daily series from late January into February
        let a = daily_from(ymd(2023, 1, 30), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let a = make_lag(&a, &LagSpec::new("v", 1, Frequency::Day)).expect("lag failed");
        // Monthly series known from February only
        let b = expand_to_daily(&monthly(&[ymd(2023, 2, 1)], &[20.0]), true)
            .expect("expand failed");

        let out = merge_feature_table(&[a, b], 6).expect("merge failed");
        let t = out.as_table();

        assert_eq!(
            t.dates().unwrap(),
            vec![ymd(2023, 2, 1), ymd(2023, 2, 2), ymd(2023, 2, 3)]
        );
        let cli = t.as_df().column("CLI").unwrap().f64().unwrap();
        assert!(cli.into_iter().all(|v| v == Some(20.0)));
    }

    #[test]
    fn test_merge_rounds_and_fills() {
        let a = daily_from(ymd(2023, 1, 1), &[1.23456789, f64::NAN, 3.0]);
        let out = merge_feature_table(&[a], 6).expect("merge failed");
        let v = out
            .as_table()
            .as_df()
            .column("v")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>();

        assert_eq!(v, vec![Some(1.234568), Some(1.234568), Some(3.0)]);
    }

    #[test]
    fn test_merge_without_complete_rows_fails() {
        let a = daily_from(ymd(2023, 1, 1), &[1.0, 2.0]);
        let b = monthly(&[ymd(2024, 1, 1)], &[5.0]);

        let err = merge_feature_table(&[a, b], 6).expect_err("should fail");
        assert!(matches!(
            err,
            PrepError::Data(DataError::EmptyMergeResult(_))
        ));
    }

    #[test]
    fn test_no_tables_is_a_config_error() {
        assert!(matches!(
            merge_feature_table(&[], 6),
            Err(PrepError::Config(ConfigError::NoSources))
        ));
    }
}
