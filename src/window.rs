//! Open-shift window resolution.
//!
//! The shift still open is implicit: it is whatever comes after the most
//! recent closure of the day, or after local midnight when the day has none.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::model::{ClosureRecord, ShiftLabel, ShiftWindow};

/// Derive the label and lower bound of the next shift to close.
///
/// `todays_closures` must hold the closures already confirmed on `now`'s
/// calendar day; order does not matter.
pub fn resolve_next_shift<Tz: TimeZone>(
    todays_closures: &[ClosureRecord],
    now: &DateTime<Tz>,
) -> ShiftWindow {
    let closure_date = now.date_naive();

    let mut latest_first: Vec<&ClosureRecord> = todays_closures.iter().collect();
    latest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let label = ShiftLabel::for_prior_closures(latest_first.len());
    let start = match latest_first.first() {
        Some(latest) => latest.created_at,
        None => start_of_day(&now.timezone(), closure_date),
    };

    ShiftWindow {
        label,
        start,
        closure_date,
    }
}

/// Local midnight of `date` in `tz`, as a UTC instant.
///
/// When midnight falls in a DST gap the first local minute that exists is
/// used; when it is ambiguous, the earlier instant.
pub fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..24 * 60)
        .find_map(|minute| {
            tz.from_local_datetime(&(midnight + Duration::minutes(minute)))
                .earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Calendar day of `instant` in `tz`.
pub fn local_date<Tz: TimeZone>(tz: &Tz, instant: &DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(tz).date_naive()
}
