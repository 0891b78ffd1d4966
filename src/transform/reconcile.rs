use tracing::debug;

use crate::{
    data::{frequency::Frequency, table::DatedTable},
    error::{DataError, PrepResult},
};

/// Re-expands a month-start table onto a contiguous daily calendar.
///
/// The calendar spans `[first_date, last_date + one month-start step)`, so the
/// last represented month is covered through its final day. Dates absent from
/// the input become rows with every field missing. With `forward_fill`, each
/// known value is carried forward until the next known value.
///
/// A daily table that already ends on the last day of a month comes back
/// unchanged.
#[tracing::instrument(skip_all, fields(rows = table.height(), forward_fill = forward_fill))]
pub fn expand_to_daily(table: &DatedTable, forward_fill: bool) -> PrepResult<DatedTable> {
    let sorted = table.sorted()?;
    let dates = sorted.dates()?;
    let (Some(first), Some(last)) = (dates.first().copied(), dates.last().copied()) else {
        return Err(DataError::EmptyTable("cannot expand an empty table to daily".into()).into());
    };

    let end = Frequency::MonthStart.next_period(last)?;
    let days = Frequency::Day.range_until(first, end)?;
    debug!(%first, %end, days = days.len(), "Daily calendar built");

    let calendar = DatedTable::calendar(sorted.index_name().clone(), &days)?;
    let expanded = calendar.left_join(&sorted)?;

    if forward_fill {
        expanded.forward_filled()
    } else {
        Ok(expanded)
    }
}
