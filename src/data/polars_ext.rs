use polars::prelude::{
    Column, DataFrame, DataType, Expr, Float64Chunked, IntoColumn, IntoSeries, PlSmallStr, lit,
    when,
};

use crate::error::{DataError, PrepResult, polars_to_prep_error};

pub trait ExprExt {
    /// Safely divides two expressions, protecting against division-by-zero.
    ///
    /// If the denominator is zero, returns `fallback` (default: `f64::NAN`, which
    /// the feature table treats as missing).
    fn safe_div(self, other: Expr, fallback: Option<f64>) -> Expr;
}

impl ExprExt for Expr {
    fn safe_div(self, other: Expr, fallback: Option<f64>) -> Expr {
        let fallback_val = fallback.unwrap_or(f64::NAN);
        when(other.clone().eq(lit(0.0)))
            .then(lit(fallback_val))
            .otherwise(self / other)
    }
}

pub trait DataFrameExt {
    /// Rewrites every `Float64` column except `skip` value by value.
    ///
    /// Returning `None` from `f` turns the cell into a missing value.
    fn map_float_columns<F>(&self, skip: &str, f: F) -> PrepResult<DataFrame>
    where
        F: Fn(f64) -> Option<f64>;

    /// Names of all columns except `skip`, in frame order.
    fn column_names_except(&self, skip: &str) -> Vec<PlSmallStr>;
}

impl DataFrameExt for DataFrame {
    fn map_float_columns<F>(&self, skip: &str, f: F) -> PrepResult<DataFrame>
    where
        F: Fn(f64) -> Option<f64>,
    {
        let mut out = self.clone();
        for column in self.get_columns() {
            if column.name().as_str() == skip || column.dtype() != &DataType::Float64 {
                continue;
            }
            let mapped = map_column(column, &f)?;
            out.with_column(mapped)
                .map_err(|e| polars_to_prep_error("Failed to replace float column", e))?;
        }
        Ok(out)
    }

    fn column_names_except(&self, skip: &str) -> Vec<PlSmallStr> {
        self.get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != skip)
            .cloned()
            .collect()
    }
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn map_column<F>(column: &Column, f: &F) -> PrepResult<Column>
where
    F: Fn(f64) -> Option<f64>,
{
    let ca = column.f64().map_err(|e| {
        DataError::DataFrame(format!("Column '{}' is not f64: {e}", column.name()))
    })?;
    let out = ca
        .into_iter()
        .map(|opt_val| opt_val.and_then(f))
        .collect::<Float64Chunked>()
        .with_name(column.name().clone())
        .into_series()
        .into_column();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use polars::{df, prelude::IntoLazy, prelude::col};

    use super::*;

    #[test]
    fn test_map_float_columns_skips_index_and_non_floats() {
        let df = df![
            "ds" => &[1.0, 2.0],
            "count" => &[1i64, 2],
            "price" => &[1.5, f64::NAN],
        ]
        .expect("Failed to create DF");

        let out = df
            .map_float_columns("ds", |v| if v.is_nan() { None } else { Some(v * 2.0) })
            .expect("map failed");

        let price = out.column("price").unwrap().f64().unwrap();
        assert_eq!(price.get(0), Some(3.0));
        assert_eq!(price.get(1), None);

        let ds = out.column("ds").unwrap().f64().unwrap();
        assert_eq!(ds.get(1), Some(2.0));
        assert_eq!(out.column("count").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_safe_div_falls_back_on_zero_denominator() {
        let df = df![
            "a" => &[1.0, 4.0],
            "b" => &[0.0, 2.0],
        ]
        .expect("Failed to create DF");

        let out = df
            .lazy()
            .select([col("a").safe_div(col("b"), Some(-1.0)).alias("q")])
            .collect()
            .expect("collect failed");

        let q = out.column("q").unwrap().f64().unwrap();
        assert_eq!(q.get(0), Some(-1.0));
        assert_eq!(q.get(1), Some(2.0));
    }
}
