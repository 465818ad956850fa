//! Sales totals for a shift window.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::model::{SaleRecord, ShiftSalesTotals, ShiftWindow};
use crate::window::local_date;

/// Total and count of the sales belonging to the open shift.
///
/// A sale belongs to the window when it happened strictly after
/// `window.start` and on the window's calendar day. A sale stamped exactly at
/// `window.start` was already covered by the closure that produced it.
pub fn aggregate_shift_sales<Tz: TimeZone>(
    sales: &[SaleRecord],
    window: &ShiftWindow,
    tz: &Tz,
) -> ShiftSalesTotals {
    sum_matching(sales, |sale| {
        sale.timestamp > window.start && local_date(tz, &sale.timestamp) == window.closure_date
    })
}

/// Like [`aggregate_shift_sales`] for a window that is already closed:
/// `start < timestamp <= end`, on `day`.
pub fn aggregate_between<Tz: TimeZone>(
    sales: &[SaleRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    day: NaiveDate,
    tz: &Tz,
) -> ShiftSalesTotals {
    sum_matching(sales, |sale| {
        sale.timestamp > start && sale.timestamp <= end && local_date(tz, &sale.timestamp) == day
    })
}

fn sum_matching<F>(sales: &[SaleRecord], belongs: F) -> ShiftSalesTotals
where
    F: Fn(&SaleRecord) -> bool,
{
    sales
        .iter()
        .filter(|sale| belongs(sale))
        .fold(ShiftSalesTotals::default(), |mut acc, sale| {
            acc.total += sale.total;
            acc.count += 1;
            acc
        })
}
