use chrono::{Datelike, Days, Months, NaiveDate, format::ParseErrorKind};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{DataError, PrepResult};

/// Days between 0001-01-01 (CE) and 1970-01-01, the epoch of the polars `Date` dtype.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Calendar cadence of a dated series.
///
/// The token (`D`, `MS`) is used both to label lag features and to pick the
/// offset rule when a table is extended into the future.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
pub enum Frequency {
    /// One period per calendar day.
    #[strum(serialize = "D")]
    #[serde(rename = "D")]
    Day,

    /// One period per calendar month, anchored on the first day of the month.
    #[strum(serialize = "MS")]
    #[serde(rename = "MS")]
    MonthStart,
}

impl Frequency {
    pub fn token(&self) -> &'static str {
        self.into()
    }

    pub fn is_daily(&self) -> bool {
        matches!(self, Self::Day)
    }

    /// Rolls `date` forward to the next period anchor.
    ///
    /// - `Day`: the following calendar day.
    /// - `MonthStart`: the first day of the following month. A date that already
    ///   sits on a month start still advances by one full month.
    pub fn next_period(&self, date: NaiveDate) -> PrepResult<NaiveDate> {
        let next = match self {
            Self::Day => date.checked_add_days(Days::new(1)),
            Self::MonthStart => date
                .with_day(1)
                .and_then(|d| d.checked_add_months(Months::new(1))),
        };
        next.ok_or_else(|| {
            DataError::DateOutOfRange(format!("no {self} period after {date}")).into()
        })
    }

    /// Returns `date` if it is already a period anchor, otherwise the next anchor.
    pub fn roll_forward(&self, date: NaiveDate) -> PrepResult<NaiveDate> {
        match self {
            Self::Day => Ok(date),
            Self::MonthStart if date.day() == 1 => Ok(date),
            Self::MonthStart => self.next_period(date),
        }
    }

    /// `periods` consecutive anchors, the first being `start` rolled forward.
    pub fn date_range(&self, start: NaiveDate, periods: usize) -> PrepResult<Vec<NaiveDate>> {
        let mut dates = Vec::with_capacity(periods);
        let mut current = self.roll_forward(start)?;
        for i in 0..periods {
            if i > 0 {
                current = self.next_period(current)?;
            }
            dates.push(current);
        }
        Ok(dates)
    }

    /// All anchors in the half-open interval `[start, end)`.
    pub fn range_until(&self, start: NaiveDate, end: NaiveDate) -> PrepResult<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        let mut current = self.roll_forward(start)?;
        while current < end {
            dates.push(current);
            current = self.next_period(current)?;
        }
        Ok(dates)
    }
}

// ================================================================================================
// Date Conversions
// ================================================================================================

/// Physical representation of a polars `Date` (days since 1970-01-01).
pub fn to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn from_epoch_days(days: i32) -> PrepResult<NaiveDate> {
    days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| DataError::DateOutOfRange(format!("{days} days since epoch")).into())
}

/// Parses `value` with a fixed `format`.
///
/// Month-granular formats such as `%Y-%m` carry no day field; those resolve to
/// the first day of the month.
pub fn parse_date(value: &str, format: &str) -> Result<NaiveDate, chrono::ParseError> {
    let value = value.trim();
    match NaiveDate::parse_from_str(value, format) {
        Err(e) if e.kind() == ParseErrorKind::NotEnough && !format.contains("%d") => {
            NaiveDate::parse_from_str(&format!("{value}-01"), &format!("{format}-%d"))
        }
        other => other,
    }
}
