use polars::{
    prelude::{
        Column, DataFrame, DataType, EWMOptions, Expr, IntoLazy, RollingOptionsFixedWindow, col,
        lit,
    },
    series::ops::NullBehavior,
};
use serde::{Deserialize, Serialize};

use crate::{
    data::{polars_ext::ExprExt, table::DatedTable},
    error::{DataError, PrepResult, polars_to_prep_error},
};

/// A technical indicator derived from one input column of a source.
///
/// Sources list these declaratively; [`apply_indicators`] interprets the list
/// in order and appends the output columns. Leading rows without a full
/// window are missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSpec {
    /// `SMA_{length}`.
    Sma { input: String, length: u16 },

    /// `BBL_`, `BBM_`, `BBU_`, `BBB_`, `BBP_{length}`: lower/middle/upper band,
    /// bandwidth in percent of the middle band, and percent-b.
    BollingerBands { input: String, length: u16, std: f64 },

    /// `MACD_`, `MACDh_`, `MACDs_{fast}_{slow}_{signal}`: line, histogram, signal.
    Macd {
        input: String,
        fast: u16,
        slow: u16,
        signal: u16,
    },

    /// `RSI_{length}` with Wilder's smoothing.
    Rsi { input: String, length: u16 },
}

impl IndicatorSpec {
    pub fn input(&self) -> &str {
        match self {
            Self::Sma { input, .. }
            | Self::BollingerBands { input, .. }
            | Self::Macd { input, .. }
            | Self::Rsi { input, .. } => input,
        }
    }

    /// Names of the columns this indicator appends.
    pub fn output_names(&self) -> Vec<String> {
        match self {
            Self::Sma { length, .. } => vec![format!("SMA_{length}")],
            Self::BollingerBands { length, .. } => ["BBL", "BBM", "BBU", "BBB", "BBP"]
                .iter()
                .map(|prefix| format!("{prefix}_{length}"))
                .collect(),
            Self::Macd {
                fast, slow, signal, ..
            } => ["MACD", "MACDh", "MACDs"]
                .iter()
                .map(|prefix| format!("{prefix}_{fast}_{slow}_{signal}"))
                .collect(),
            Self::Rsi { length, .. } => vec![format!("RSI_{length}")],
        }
    }

    fn validate(&self) -> PrepResult<()> {
        let ok = match self {
            Self::Sma { length, .. } | Self::Rsi { length, .. } => *length > 0,
            Self::BollingerBands { length, std, .. } => *length > 1 && std.is_finite(),
            Self::Macd {
                fast, slow, signal, ..
            } => *fast > 0 && *slow > *fast && *signal > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(DataError::DataFrame(format!("Invalid indicator parameters: {self:?}")).into())
        }
    }

    /// Lazy expressions for the rolling and Wilder-smoothed kinds. MACD is
    /// computed eagerly by [`macd_columns`] and has none.
    fn exprs(&self) -> Vec<Expr> {
        let names = self.output_names();
        let close = col(self.input());

        let exprs = match self {
            Self::Sma { length, .. } => vec![close.rolling_mean(fixed_window(*length))],

            Self::BollingerBands { length, std, .. } => {
                let n = *length as f64;
                let mid = close.clone().rolling_mean(fixed_window(*length));
                // Population std (ddof 0) from the sample std
                let population = ((n - 1.0) / n).sqrt();
                let dev = close.clone().rolling_std(fixed_window(*length)) * lit(population * *std);
                let lower = mid.clone() - dev.clone();
                let upper = mid.clone() + dev;
                let width = upper.clone() - lower.clone();
                let bandwidth = (width.clone() * lit(100.0)).safe_div(mid.clone(), None);
                let percent = (close - lower.clone()).safe_div(width, None);
                vec![lower, mid, upper, bandwidth, percent]
            }

            Self::Macd { .. } => Vec::new(),

            Self::Rsi { length, .. } => vec![rsi_expr(close, *length)],
        };

        exprs
            .into_iter()
            .zip(names)
            .map(|(expr, name)| expr.alias(name))
            .collect()
    }
}

/// Appends every indicator in `specs` to `table`, in order.
#[tracing::instrument(skip_all, fields(indicators = specs.len()))]
pub fn apply_indicators(table: &DatedTable, specs: &[IndicatorSpec]) -> PrepResult<DatedTable> {
    if specs.is_empty() {
        return Ok(table.clone());
    }

    let sorted = table.sorted()?;
    let mut df = sorted.as_df().clone();
    for spec in specs {
        spec.validate()?;
        if !sorted.has_column(spec.input()) {
            return Err(DataError::MissingColumn(spec.input().to_string()).into());
        }
        df = match spec {
            IndicatorSpec::Macd {
                fast, slow, signal, ..
            } => macd_columns(df, spec, *fast, *slow, *signal)?,
            _ => df
                .lazy()
                .with_columns(spec.exprs())
                .collect()
                .map_err(|e| polars_to_prep_error("Failed to compute indicators", e))?,
        };
    }

    DatedTable::new(df, sorted.index_name().clone())
}

/// Appends MACD line, histogram and signal. Every EMA is seeded with the
/// mean of its first `span` valid inputs.
fn macd_columns(
    mut df: DataFrame,
    spec: &IndicatorSpec,
    fast: u16,
    slow: u16,
    signal: u16,
) -> PrepResult<DataFrame> {
    let close = df
        .column(spec.input())
        .and_then(|c| c.cast(&DataType::Float64))
        .map_err(|e| polars_to_prep_error("Failed to read MACD input", e))?;
    let close = close
        .f64()
        .map_err(|e| polars_to_prep_error("Failed to read MACD input", e))?
        .into_iter()
        .collect::<Vec<_>>();

    let fast_ema = seeded_ema(&close, fast as usize);
    let slow_ema = seeded_ema(&close, slow as usize);
    let line = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect::<Vec<_>>();
    let signal_line = seeded_ema(&line, signal as usize);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect::<Vec<_>>();

    for (name, values) in spec
        .output_names()
        .into_iter()
        .zip([line, histogram, signal_line])
    {
        df.with_column(Column::new(name.into(), values))
            .map_err(|e| polars_to_prep_error("Failed to append MACD column", e))?;
    }
    Ok(df)
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn fixed_window(length: u16) -> RollingOptionsFixedWindow {
    RollingOptionsFixedWindow {
        window_size: length as usize,
        min_periods: length as usize, // Strict: Require full window validity
        weights: None,
        center: false, // False prevents look-ahead bias
        fn_params: None,
    }
}

fn ewm_options(alpha: f64, min_periods: usize) -> EWMOptions {
    EWMOptions {
        alpha,
        adjust: false,
        bias: false,
        min_periods,
        // The leading null of the price difference is skipped.
        ignore_nulls: true,
    }
}

/// EMA with alpha = 2 / (span + 1) and `adjust = false`.
///
/// Leading missing values are skipped. The first output sits on the
/// `span`-th valid input and is the mean of those inputs; the recursion runs
/// from there. A missing value inside the series repeats the previous average.
fn seeded_ema(values: &[Option<f64>], span: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    let Some(start) = values.iter().position(Option::is_some) else {
        return out;
    };
    let seed_end = start + span;
    if span == 0 || seed_end > values.len() {
        return out;
    }

    let window = values[start..seed_end].iter().flatten().collect::<Vec<_>>();
    if window.is_empty() {
        return out;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut ema = window.iter().copied().sum::<f64>() / window.len() as f64;
    out[seed_end - 1] = Some(ema);

    for (slot, value) in out.iter_mut().zip(values).skip(seed_end) {
        if let Some(x) = value {
            ema = alpha * x + (1.0 - alpha) * ema;
        }
        *slot = Some(ema);
    }
    out
}

fn rsi_expr(close: Expr, length: u16) -> Expr {
    // Wilder's smoothing: alpha = 1 / N
    let options = ewm_options(1.0 / (length as f64), length as usize);

    let delta = close.diff(lit(1), NullBehavior::Ignore);
    let gain = delta.clone().clip(lit(0.0), lit(f64::MAX));
    let loss = delta.clip(lit(f64::MIN), lit(0.0)).abs();

    let avg_gain = gain.ewm_mean(options);
    let avg_loss = loss.ewm_mean(options);

    // A flat window (no gains, no losses) yields NaN and is treated as missing.
    let rs = avg_gain / avg_loss;
    lit(100.0) - (lit(100.0) / (lit(1.0) + rs))
}

#[cfg(test)]
mod tests {
    use chrono::{Days, NaiveDate};
    use polars::df;

    use super::*;
    use crate::data::table::DEFAULT_INDEX;

    fn close_table(closes: &[f64]) -> DatedTable {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date");
        let dates = (0..closes.len())
            .map(|i| start + Days::new(i as u64))
            .collect::<Vec<_>>();
        let values = df!["close" => closes].expect("Failed to create DF");
        DatedTable::from_parts(DEFAULT_INDEX, &dates, values).expect("Failed to create table")
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
    fn test_sma_requires_full_window() {
        let t = close_table(&[1.0, 2.0, 3.0, 4.0]);
        let spec = IndicatorSpec::Sma {
            input: "close".into(),
            length: 3,
        };
        let out = apply_indicators(&t, &[spec]).expect("indicator failed");
        assert_eq!(column(&out, "SMA_3"), vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_bollinger_band_columns() {
        let t = close_table(&[1.0, 2.0, 3.0, 4.0]);
        let spec = IndicatorSpec::BollingerBands {
            input: "close".into(),
            length: 3,
            std: 2.0,
        };
        let out = apply_indicators(&t, &[spec.clone()]).expect("indicator failed");

        for name in spec.output_names() {
            assert!(out.has_column(&name), "missing {name}");
        }
        // Window [2, 3, 4]: mean 3, population std sqrt(2/3)
        let sd = (2.0_f64 / 3.0).sqrt();
        let close_to = |name: &str, want: f64| {
            let got = column(&out, name)[3].unwrap_or_else(|| panic!("{name} missing"));
            assert!((got - want).abs() < 1e-9, "{name}: got {got}, want {want}");
        };
        close_to("BBM_3", 3.0);
        close_to("BBL_3", 3.0 - 2.0 * sd);
        close_to("BBU_3", 3.0 + 2.0 * sd);
        close_to("BBB_3", 100.0 * 4.0 * sd / 3.0);
        close_to("BBP_3", (1.0 + 2.0 * sd) / (4.0 * sd));
        assert_eq!(column(&out, "BBL_3")[1], None);
    }

    #[test]
    fn test_bollinger_uses_population_std() {
        let t = close_table(&[1.0, 2.0, 3.0]);
        let spec = IndicatorSpec::BollingerBands {
            input: "close".into(),
            length: 3,
            std: 2.0,
        };
        let out = apply_indicators(&t, &[spec]).expect("indicator failed");
        let upper = column(&out, "BBU_3")[2].expect("upper band");
        assert!((upper - 3.632993).abs() < 1e-6, "got {upper}");
    }

    #[test]
    fn test_macd_line_is_fast_minus_slow() {
        let closes = (1..=40).map(f64::from).collect::<Vec<_>>();
        let spec = IndicatorSpec::Macd {
            input: "close".into(),
            fast: 3,
            slow: 6,
            signal: 4,
        };
        let out = apply_indicators(&close_table(&closes), &[spec]).expect("indicator failed");

        let line = column(&out, "MACD_3_6_4");
        let signal = column(&out, "MACDs_3_6_4");
        let hist = column(&out, "MACDh_3_6_4");
        assert!(line[4].is_none());
        assert!(line[5].is_some());
        // Signal needs `signal` non-null MACD values
        assert!(signal[7].is_none());
        assert!(signal[8].is_some());

        let last = closes.len() - 1;
        let diff = line[last].unwrap() - signal[last].unwrap();
        assert!((hist[last].unwrap() - diff).abs() < 1e-12);
        // A steadily rising series keeps the fast average above the slow one
        assert!(line[last].unwrap() > 0.0);
    }

    #[test]
    fn test_macd_averages_are_seeded_with_sma() {
        // On a straight line the seeded averages lag by a constant: 1 for
        // span 3 and 2.5 for span 6, so the MACD line is flat at 1.5.
        let closes = (1..=40).map(f64::from).collect::<Vec<_>>();
        let spec = IndicatorSpec::Macd {
            input: "close".into(),
            fast: 3,
            slow: 6,
            signal: 4,
        };
        let out = apply_indicators(&close_table(&closes), &[spec]).expect("indicator failed");

        let line = column(&out, "MACD_3_6_4");
        let signal = column(&out, "MACDs_3_6_4");
        let hist = column(&out, "MACDh_3_6_4");
        for i in 5..closes.len() {
            assert!((line[i].unwrap() - 1.5).abs() < 1e-9, "MACD[{i}] = {:?}", line[i]);
        }
        for i in 8..closes.len() {
            assert!((signal[i].unwrap() - 1.5).abs() < 1e-9, "signal[{i}] = {:?}", signal[i]);
            assert!(hist[i].unwrap().abs() < 1e-9);
        }
    }

    #[test]
    fn test_seeded_ema_skips_leading_missing_values() {
        let values = [None, None, Some(2.0), Some(4.0), Some(6.0), None, Some(10.0)];
        let ema = seeded_ema(&values, 2);

        // Seed: mean(2, 4) on the second valid row; alpha = 2/3
        assert_eq!(&ema[..3], &[None, None, None]);
        assert_eq!(ema[3], Some(3.0));
        assert_eq!(ema[4], Some(5.0));
        assert_eq!(ema[5], Some(5.0));
        let want = 2.0 / 3.0 * 10.0 + 1.0 / 3.0 * 5.0;
        assert!((ema[6].unwrap() - want).abs() < 1e-12);
        assert!(seeded_ema(&[Some(1.0)], 2).iter().all(Option::is_none));
    }

    #[test]
    fn test_rsi_saturates_on_monotonic_rise() {
        let closes = (1..=20).map(f64::from).collect::<Vec<_>>();
        let spec = IndicatorSpec::Rsi {
            input: "close".into(),
            length: 5,
        };
        let out = apply_indicators(&close_table(&closes), &[spec]).expect("indicator failed");
        let rsi = column(&out, "RSI_5");
        assert_eq!(rsi[19], Some(100.0));
        assert!(rsi[0].is_none());
    }

    #[test]
    fn test_missing_input_column_is_reported() {
        let t = close_table(&[1.0, 2.0]);
        let spec = IndicatorSpec::Sma {
            input: "open".into(),
            length: 2,
        };
        assert!(apply_indicators(&t, &[spec]).is_err());
    }

    #[test]
    fn test_specs_deserialize_from_tagged_json() {
        let json = r#"[
            {"kind": "sma", "input": "spy_close", "length": 60},
            {"kind": "bollinger_bands", "input": "spy_close", "length": 20, "std": 2.0}
        ]"#;
        let specs: Vec<IndicatorSpec> = serde_json::from_str(json).expect("parse failed");
        assert_eq!(
            specs[0],
            IndicatorSpec::Sma {
                input: "spy_close".into(),
                length: 60
            }
        );
        assert_eq!(specs[1].output_names()[0], "BBL_20");
    }
}
