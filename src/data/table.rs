use std::collections::HashMap;

use chrono::NaiveDate;
use polars::prelude::{
    BooleanChunked, Column, DataFrame, DataType, FillNullStrategy, IntoColumn, IntoLazy, JoinArgs,
    JoinType, NamedFrom, PlSmallStr, Series, SortMultipleOptions, col,
};

use crate::{
    data::{
        config::ColumnMapping,
        frequency::{from_epoch_days, to_epoch_days},
        polars_ext::DataFrameExt,
    },
    error::{DataError, PrepResult, polars_to_prep_error},
};

/// Index name used when a source does not name its date index.
pub const DEFAULT_INDEX: &str = "ds";

/// An ordered table of dated rows, keyed by a `Date` index column.
///
/// Every transform returns a new table sorted ascending by the index; the
/// wrapped frame is never mutated in place once constructed. The index is
/// always the first column.
#[derive(Debug, Clone)]
pub struct DatedTable {
    df: DataFrame,
    index: PlSmallStr,
}

impl DatedTable {
    /// Wraps `df`, validating that `index` is a `Date` column without gaps in its
    /// values, moving it to the front and sorting by it.
    pub fn new(df: DataFrame, index: impl Into<PlSmallStr>) -> PrepResult<Self> {
        let index = index.into();
        let column = df
            .column(index.as_str())
            .map_err(|_| DataError::MissingColumn(index.to_string()))?;

        if column.dtype() != &DataType::Date {
            return Err(DataError::DataFrame(format!(
                "Index column '{index}' must be Date, got {}",
                column.dtype()
            ))
            .into());
        }
        if column.null_count() > 0 {
            return Err(DataError::DataFrame(format!(
                "Index column '{index}' contains {} missing dates",
                column.null_count()
            ))
            .into());
        }

        let mut order = vec![index.clone()];
        order.extend(df.column_names_except(index.as_str()));
        let df = df
            .select(order)
            .map_err(|e| polars_to_prep_error("Failed to reorder columns", e))?;

        Self { df, index }.sorted()
    }

    /// Builds a table from explicit dates and value columns of equal height.
    pub fn from_parts(
        index: impl Into<PlSmallStr>,
        dates: &[NaiveDate],
        values: DataFrame,
    ) -> PrepResult<Self> {
        let index = index.into();
        let mut df = values;
        if df.width() == 0 {
            df = DataFrame::new(vec![date_column(index.clone(), dates)?])
                .map_err(|e| polars_to_prep_error("Failed to build calendar frame", e))?;
        } else {
            df.insert_column(0, date_column(index.clone(), dates)?)
                .map_err(|e| polars_to_prep_error("Failed to insert index column", e))?;
        }
        Self::new(df, index)
    }

    /// A table holding only the index column.
    pub fn calendar(index: impl Into<PlSmallStr>, dates: &[NaiveDate]) -> PrepResult<Self> {
        Self::from_parts(index, dates, DataFrame::empty())
    }

    pub fn index_name(&self) -> &PlSmallStr {
        &self.index
    }

    pub fn as_df(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_df(self) -> DataFrame {
        self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn width(&self) -> usize {
        self.df.width()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.df.column(name).is_ok()
    }

    /// Names of all non-index columns, in table order.
    pub fn value_columns(&self) -> Vec<PlSmallStr> {
        self.df.column_names_except(self.index.as_str())
    }

    pub fn dates(&self) -> PrepResult<Vec<NaiveDate>> {
        let physical = self
            .df
            .column(self.index.as_str())
            .and_then(|c| c.cast(&DataType::Int32))
            .map_err(|e| polars_to_prep_error("Failed to read index", e))?;
        let ca = physical
            .i32()
            .map_err(|e| polars_to_prep_error("Index is not a date column", e))?;

        ca.into_iter()
            .map(|days| {
                days.ok_or_else(|| {
                    DataError::DataFrame(format!("Missing date in index '{}'", self.index)).into()
                })
                .and_then(from_epoch_days)
            })
            .collect()
    }

    pub fn first_date(&self) -> PrepResult<Option<NaiveDate>> {
        Ok(self.dates()?.first().copied())
    }

    pub fn last_date(&self) -> PrepResult<Option<NaiveDate>> {
        Ok(self.dates()?.last().copied())
    }

    /// Returns a copy sorted ascending by the index. Rows sharing a date keep
    /// their relative order.
    pub fn sorted(&self) -> PrepResult<Self> {
        let df = self
            .df
            .sort(
                vec![self.index.clone()],
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .map_err(|e| polars_to_prep_error("Failed to sort by index", e))?;
        Ok(Self {
            df,
            index: self.index.clone(),
        })
    }

    /// Selects the index plus the mapped columns, renamed to their targets and
    /// cast to `Float64`.
    pub fn select_renamed(&self, mappings: &[ColumnMapping]) -> PrepResult<Self> {
        let mut columns = vec![self.index_column()?];
        for mapping in mappings {
            let source = self
                .df
                .column(&mapping.from)
                .map_err(|_| DataError::MissingColumn(mapping.from.clone()))?;
            let renamed = source
                .cast(&DataType::Float64)
                .map_err(|e| polars_to_prep_error("Failed to cast value column", e))?
                .with_name(mapping.to.as_str().into());
            columns.push(renamed);
        }
        let df = DataFrame::new(columns)
            .map_err(|e| polars_to_prep_error("Failed to build selected frame", e))?;
        Self::new(df, self.index.clone())
    }

    /// Appends one row per date in `dates`; every non-index field of those rows
    /// is missing. Column dtypes are preserved.
    pub fn extended(&self, dates: &[NaiveDate]) -> PrepResult<Self> {
        if dates.is_empty() {
            return Ok(self.clone());
        }

        let columns = self
            .df
            .get_columns()
            .iter()
            .map(|c| {
                if c.name() == &self.index {
                    date_column(self.index.clone(), dates)
                } else {
                    Ok(Series::full_null(c.name().clone(), dates.len(), c.dtype()).into_column())
                }
            })
            .collect::<PrepResult<Vec<_>>>()?;

        let tail = DataFrame::new(columns)
            .map_err(|e| polars_to_prep_error("Failed to build extension rows", e))?;
        let df = self
            .df
            .vstack(&tail)
            .map_err(|e| polars_to_prep_error("Failed to append extension rows", e))?;

        Self::new(df, self.index.clone())
    }

    /// Left join on the index, anchored on `self`. Rows of `self` are kept in
    /// index order; dates only present in `other` are discarded.
    pub fn left_join(&self, other: &DatedTable) -> PrepResult<Self> {
        let df = self
            .df
            .clone()
            .lazy()
            .join(
                other.df.clone().lazy(),
                [col(self.index.clone())],
                [col(other.index.clone())],
                JoinArgs {
                    how: JoinType::Left,
                    ..Default::default()
                },
            )
            .collect()
            .map_err(|e| polars_to_prep_error("Failed to join on index", e))?;

        Self::new(df, self.index.clone())
    }

    /// Carries the most recent known value forward through missing cells, per
    /// column. Leading missing values stay missing.
    pub fn forward_filled(&self) -> PrepResult<Self> {
        let fills = self
            .value_columns()
            .into_iter()
            .map(|name| {
                col(name.clone())
                    .fill_null_with_strategy(FillNullStrategy::Forward(None))
                    .alias(name)
            })
            .collect::<Vec<_>>();

        if fills.is_empty() {
            return Ok(self.clone());
        }

        let df = self
            .df
            .clone()
            .lazy()
            .with_columns(fills)
            .collect()
            .map_err(|e| polars_to_prep_error("Failed to forward fill", e))?;

        Ok(Self {
            df,
            index: self.index.clone(),
        })
    }

    /// Treats `NaN` in float columns as a missing value.
    pub fn nan_as_missing(&self) -> PrepResult<Self> {
        let df = self
            .df
            .map_float_columns(self.index.as_str(), |v| (!v.is_nan()).then_some(v))?;
        Ok(Self {
            df,
            index: self.index.clone(),
        })
    }

    /// Drops every row with a missing value in any column.
    pub fn drop_incomplete(&self) -> PrepResult<Self> {
        let df = self
            .df
            .clone()
            .lazy()
            .drop_nulls(None)
            .collect()
            .map_err(|e| polars_to_prep_error("Failed to drop incomplete rows", e))?;

        Ok(Self {
            df,
            index: self.index.clone(),
        })
    }

    /// Rounds every float value to `decimals` places.
    pub fn rounded(&self, decimals: u32) -> PrepResult<Self> {
        let df = self
            .df
            .map_float_columns(self.index.as_str(), |v| Some(round_to(v, decimals)))?;
        Ok(Self {
            df,
            index: self.index.clone(),
        })
    }

    /// Merges `newer` into this table. Where both hold a row for the same date,
    /// the row from `newer` wins. Columns of `newer` are aligned to this table's
    /// schema; columns unknown to this table are ignored.
    pub fn upsert(&self, newer: &DatedTable) -> PrepResult<Self> {
        let aligned = self
            .df
            .get_columns()
            .iter()
            .map(|c| -> PrepResult<Column> {
                let name = if c.name() == &self.index {
                    newer.index.clone()
                } else {
                    c.name().clone()
                };
                let incoming = match newer.df.column(name.as_str()) {
                    Ok(found) => found
                        .cast(c.dtype())
                        .map_err(|e| polars_to_prep_error("Failed to align column", e))?,
                    Err(_) => Series::full_null(name, newer.height(), c.dtype()).into_column(),
                };
                Ok(incoming.with_name(c.name().clone()))
            })
            .collect::<PrepResult<Vec<_>>>()?;

        let incoming = DataFrame::new(aligned)
            .map_err(|e| polars_to_prep_error("Failed to align incoming rows", e))?;
        let stacked = self
            .df
            .vstack(&incoming)
            .map_err(|e| polars_to_prep_error("Failed to concatenate rows", e))?;
        Self {
            df: stacked,
            index: self.index.clone(),
        }
        .deduplicated()
    }

    /// Keeps one row per date: the last one in current row order.
    pub fn deduplicated(&self) -> PrepResult<Self> {
        let dates = self.dates()?;
        let mut last_row = HashMap::with_capacity(dates.len());
        for (row, date) in dates.iter().enumerate() {
            last_row.insert(*date, row);
        }
        if last_row.len() == dates.len() {
            return self.sorted();
        }

        let keep = dates
            .iter()
            .enumerate()
            .map(|(row, date)| last_row.get(date) == Some(&row))
            .collect::<BooleanChunked>();

        let df = self
            .df
            .filter(&keep)
            .map_err(|e| polars_to_prep_error("Failed to deduplicate dates", e))?;
        Self::new(df, self.index.clone())
    }

    fn index_column(&self) -> PrepResult<Column> {
        self.df
            .column(self.index.as_str())
            .cloned()
            .map_err(|_| DataError::MissingColumn(self.index.to_string()).into())
    }
}

/// A polars `Date` column holding `dates`.
pub fn date_column(name: impl Into<PlSmallStr>, dates: &[NaiveDate]) -> PrepResult<Column> {
    let days = dates.iter().copied().map(to_epoch_days).collect::<Vec<_>>();
    Series::new(name.into(), days)
        .cast(&DataType::Date)
        .map(|s| s.into_column())
        .map_err(|e| polars_to_prep_error("Failed to build date column", e))
}

/// Rounds half to even.
fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round_ties_even() / factor;
    if rounded.is_finite() { rounded } else { value }
}
