//! Reporting over confirmed closures.
//!
//! `total_divergence` nets every difference in a period, so a surplus in one
//! shift hides a shortfall in another. `summarize_divergence` keeps the two
//! sides apart for audits that need them.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{aggregate_between, aggregate_shift_sales};
use crate::model::{ClosureRecord, SaleRecord, ShiftLabel, ShiftSalesTotals, ShiftWindow};
use crate::window::start_of_day;

/// Net divergence of `closures`, which the caller has already filtered to
/// the period of interest.
pub fn total_divergence(closures: &[ClosureRecord]) -> Decimal {
    closures.iter().map(ClosureRecord::difference).sum()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivergenceSummary {
    pub closure_count: usize,
    pub total_divergence: Decimal,
    /// Sum of negative differences (zero or below).
    pub shortfall_total: Decimal,
    pub shortfall_count: usize,
    /// Sum of positive differences (zero or above).
    pub surplus_total: Decimal,
    pub surplus_count: usize,
}

pub fn summarize_divergence(closures: &[ClosureRecord]) -> DivergenceSummary {
    let mut summary = DivergenceSummary {
        closure_count: closures.len(),
        total_divergence: total_divergence(closures),
        ..DivergenceSummary::default()
    };
    for difference in closures.iter().map(ClosureRecord::difference) {
        if difference.is_sign_negative() && !difference.is_zero() {
            summary.shortfall_total += difference;
            summary.shortfall_count += 1;
        } else if !difference.is_zero() {
            summary.surplus_total += difference;
            summary.surplus_count += 1;
        }
    }
    summary
}

/// Closures of `date`, oldest first.
pub fn closures_on_day(closures: &[ClosureRecord], date: NaiveDate) -> Vec<&ClosureRecord> {
    closures_in_period(closures, date, date)
}

/// Closures whose `closure_date` lies in `from..=to`, oldest first.
pub fn closures_in_period(
    closures: &[ClosureRecord],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<&ClosureRecord> {
    let mut selected: Vec<&ClosureRecord> = closures
        .iter()
        .filter(|c| c.closure_date >= from && c.closure_date <= to)
        .collect();
    selected.sort_by_key(|c| c.created_at);
    selected
}

/// One slice of a day's sales: a closed shift, or the shift still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub label: ShiftLabel,
    /// Exclusive lower bound.
    pub start: DateTime<Utc>,
    /// Inclusive upper bound; `None` for the open shift.
    pub end: Option<DateTime<Utc>>,
    pub closure_id: Option<Uuid>,
    pub totals: ShiftSalesTotals,
}

/// Replay `day`: one entry per closure in confirmation order, then the open
/// shift. The windows are disjoint and together cover every sale of the day
/// after local midnight.
pub fn day_breakdown<Tz: TimeZone>(
    sales: &[SaleRecord],
    closures: &[ClosureRecord],
    day: NaiveDate,
    tz: &Tz,
) -> Vec<WindowSummary> {
    let days_closures = closures_on_day(closures, day);
    let mut windows = Vec::with_capacity(days_closures.len() + 1);
    let mut start = start_of_day(tz, day);

    for closure in &days_closures {
        windows.push(WindowSummary {
            label: closure.shift_label,
            start,
            end: Some(closure.created_at),
            closure_id: Some(closure.id),
            totals: aggregate_between(sales, start, closure.created_at, day, tz),
        });
        start = closure.created_at;
    }

    let open = ShiftWindow {
        label: ShiftLabel::for_prior_closures(days_closures.len()),
        start,
        closure_date: day,
    };
    windows.push(WindowSummary {
        label: open.label,
        start: open.start,
        end: None,
        closure_id: None,
        totals: aggregate_shift_sales(sales, &open, tz),
    });

    windows
}
