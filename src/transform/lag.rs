use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    data::{frequency::Frequency, table::DatedTable},
    error::{DataError, PrepResult, polars_to_prep_error},
};

/// Describes one lag feature: `{target}_lag_{n_lags}{freq}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LagSpec {
    pub target: String,
    pub n_lags: usize,
    pub freq: Frequency,

    /// Append `n_lags` future periods before shifting, so the last known
    /// value reaches into the future.
    #[serde(default)]
    pub extend: bool,

    /// Remove the target column from the output.
    #[serde(default)]
    pub drop_target: bool,
}

impl LagSpec {
    pub fn new(target: impl Into<String>, n_lags: usize, freq: Frequency) -> Self {
        Self {
            target: target.into(),
            n_lags,
            freq,
            extend: false,
            drop_target: false,
        }
    }

    pub fn with_extend(mut self, extend: bool) -> Self {
        self.extend = extend;
        self
    }

    pub fn with_drop_target(mut self, drop_target: bool) -> Self {
        self.drop_target = drop_target;
        self
    }

    pub fn output_name(&self) -> String {
        format!("{}_lag_{}{}", self.target, self.n_lags, self.freq)
    }
}

/// Adds a lag feature of `spec.target` to `table`.
///
/// The lag is positional: row `k` of the output column holds the target's
/// value at row `k - n_lags` of the date-sorted table, whatever the calendar
/// distance between those rows. The first `n_lags` rows are missing; a table
/// shorter than `n_lags` yields an entirely missing column.
///
/// With `extend`, `n_lags` rows are first appended after the last date, one per
/// `freq` period, with every field missing.
#[tracing::instrument(skip_all, fields(target = %spec.target, n_lags = spec.n_lags, freq = %spec.freq))]
pub fn make_lag(table: &DatedTable, spec: &LagSpec) -> PrepResult<DatedTable> {
    if spec.n_lags == 0 {
        return Err(DataError::InvalidLag(format!(
            "lag of '{}' must span at least one period",
            spec.target
        ))
        .into());
    }
    if !table.has_column(&spec.target) {
        return Err(DataError::MissingColumn(spec.target.clone()).into());
    }

    let mut base = table.sorted()?;
    if spec.extend {
        let last = base.last_date()?.ok_or_else(|| {
            DataError::EmptyTable(format!("cannot extend '{}' past an empty index", spec.target))
        })?;
        let start = spec.freq.next_period(last)?;
        let future = spec.freq.date_range(start, spec.n_lags)?;
        debug!(from = %start, periods = future.len(), "Extending index");
        base = base.extended(&future)?;
    }

    let index = base.index_name().clone();
    let mut df = base.into_df();
    let lagged = df
        .column(&spec.target)
        .map_err(|_| DataError::MissingColumn(spec.target.clone()))?
        .shift(spec.n_lags as i64)
        .with_name(spec.output_name().into());
    df.with_column(lagged)
        .map_err(|e| polars_to_prep_error("Failed to add lag column", e))?;

    if spec.drop_target {
        df = df
            .drop(&spec.target)
            .map_err(|e| polars_to_prep_error("Failed to drop lag target", e))?;
    }

    DatedTable::new(df, index)
}

#[cfg(test)]
mod tests {
    use chrono::{Days, NaiveDate};
    use polars::df;

    use super::*;
    use crate::data::table::DEFAULT_INDEX;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn daily(values: &[f64]) -> DatedTable {
        let start = ymd(2023, 1, 1);
        let dates = (0..values.len())
            .map(|i| start + Days::new(i as u64))
            .collect::<Vec<_>>();
        let df = df!["v" => values, "other" => values].expect("Failed to create DF");
        DatedTable::from_parts(DEFAULT_INDEX, &dates, df).expect("Failed to create table")
    }

    fn column(t: &DatedTable, name: &str) -> Vec<Option<f64>> {
        t.as_df()
            .column(name)
            .unwrap_or_else(|_| panic!("missing column {name}"))
            .f64()
            .expect("not f64")
            .into_iter()
            .collect()
    }

    #[test]
    fn test_lag_one_day_drop_target() {
        let t = daily(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let spec = LagSpec::new("v", 1, Frequency::Day).with_drop_target(true);

        let out = make_lag(&t, &spec).expect("lag failed");

        assert_eq!(out.height(), 5);
        assert!(!out.has_column("v"));
        assert_eq!(
            column(&out, "v_lag_1D"),
            vec![None, Some(1.0), Some(2.0), Some(3.0), Some(4.0)]
        );
        assert_eq!(out.dates().unwrap(), t.dates().unwrap());
        // Untouched columns pass through
        assert_eq!(column(&out, "other"), column(&t, "other"));
    }

    #[test]
    fn test_lag_is_positional_over_calendar_gaps() {
        let df = df!["v" => &[1.0, 2.0, 3.0]].expect("Failed to create DF");
        let t = DatedTable::from_parts(
            DEFAULT_INDEX,
            &[ymd(2023, 1, 1), ymd(2023, 1, 5), ymd(2023, 1, 20)],
            df,
        )
        .expect("Failed to create table");

        let out = make_lag(&t, &LagSpec::new("v", 1, Frequency::Day)).expect("lag failed");
        assert_eq!(column(&out, "v_lag_1D"), vec![None, Some(1.0), Some(2.0)]);
        assert!(out.has_column("v"));
    }

    #[test]
    fn test_lag_sorts_unsorted_input() {
        let df = df!["v" => &[3.0, 1.0, 2.0]].expect("Failed to create DF");
        let t = DatedTable::from_parts(
            DEFAULT_INDEX,
            &[ymd(2023, 1, 3), ymd(2023, 1, 1), ymd(2023, 1, 2)],
            df,
        )
        .expect("Failed to create table");

        let out = make_lag(&t, &LagSpec::new("v", 1, Frequency::Day)).expect("lag failed");
        assert_eq!(column(&out, "v_lag_1D"), vec![None, Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_extend_adds_future_month_starts() {
        let df = df!["CLI" => &[10.0, 20.0]].expect("Failed to create DF");
        let t = DatedTable::from_parts(DEFAULT_INDEX, &[ymd(2023, 1, 1), ymd(2023, 2, 1)], df)
            .expect("Failed to create table");
        let spec = LagSpec::new("CLI", 2, Frequency::MonthStart)
            .with_extend(true)
            .with_drop_target(true);

        let out = make_lag(&t, &spec).expect("lag failed");

        assert_eq!(out.height(), 4);
        assert_eq!(
            out.dates().unwrap(),
            vec![
                ymd(2023, 1, 1),
                ymd(2023, 2, 1),
                ymd(2023, 3, 1),
                ymd(2023, 4, 1)
            ]
        );
        assert_eq!(
            column(&out, "CLI_lag_2MS"),
            vec![None, None, Some(10.0), Some(20.0)]
        );
        assert_eq!(out.as_df().get_column_names()[0].as_str(), DEFAULT_INDEX);
    }

    #[test]
    fn test_row_count_and_shift_properties() {
        let values = [5.0, 7.0, 11.0, 13.0, 17.0, 19.0];
        let t = daily(&values);
        for n in 1..=values.len() + 2 {
            let plain = make_lag(&t, &LagSpec::new("v", n, Frequency::Day)).expect("lag failed");
            assert_eq!(plain.height(), t.height());

            let lag = column(&plain, &format!("v_lag_{n}D"));
            for (k, got) in lag.iter().enumerate() {
                if k < n {
                    assert_eq!(*got, None, "row {k} of lag {n} should be missing");
                } else {
                    assert_eq!(*got, Some(values[k - n]));
                }
            }

            let extended = make_lag(&t, &LagSpec::new("v", n, Frequency::Day).with_extend(true))
                .expect("lag failed");
            assert_eq!(extended.height(), t.height() + n);
        }
    }

    #[test]
    fn test_invalid_specs_are_rejected() {
        let t = daily(&[1.0, 2.0]);
        assert!(make_lag(&t, &LagSpec::new("v", 0, Frequency::Day)).is_err());
        assert!(make_lag(&t, &LagSpec::new("missing", 1, Frequency::Day)).is_err());
    }
}
