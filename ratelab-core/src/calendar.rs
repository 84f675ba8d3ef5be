//! Calendar-month arithmetic for the partitioned cache.
//!
//! Partitions are keyed by the last day of a calendar month; ranges are
//! half-open `[month start, next month start)` so no observation can land
//! in two partitions.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::cache::CacheError;

/// One entry per calendar month touched by `[start, end]`, each the last
/// day of its month. A range inside a single month yields one entry.
///
/// Fails with [`CacheError::InvalidRange`] when `start > end`.
pub fn months_between(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<NaiveDate>, CacheError> {
    if start > end {
        return Err(CacheError::InvalidRange { start, end });
    }
    let mut months = Vec::new();
    let mut cursor = first_of_month(start.date_naive());
    let last = first_of_month(end.date_naive());
    while cursor <= last {
        months.push(last_day_of_month(cursor));
        cursor = next_month(cursor);
    }
    Ok(months)
}

/// Half-open UTC span `[month start, next month start)` for the month
/// containing `month_end`.
pub fn month_span(month_end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = first_of_month(month_end);
    let end = next_month(month_end);
    (utc_midnight(start), utc_midnight(end))
}

/// Last day of the month containing `date`.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    next_month(date)
        .pred_opt()
        .expect("month start has a predecessor")
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("day 1 exists in every month")
}

fn next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("day 1 exists in every month")
}

fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn spans_partial_months_inclusive() {
        let months = months_between(day(2022, 1, 20), day(2022, 3, 10)).unwrap();
        assert_eq!(
            months,
            vec![date(2022, 1, 31), date(2022, 2, 28), date(2022, 3, 31)]
        );
    }

    #[test]
    fn single_month_single_entry() {
        let months = months_between(day(2022, 5, 3), day(2022, 5, 30)).unwrap();
        assert_eq!(months, vec![date(2022, 5, 31)]);
    }

    #[test]
    fn start_equal_end_single_entry() {
        let months = months_between(day(2022, 5, 3), day(2022, 5, 3)).unwrap();
        assert_eq!(months, vec![date(2022, 5, 31)]);
    }

    #[test]
    fn crosses_year_boundary() {
        let months = months_between(day(2021, 12, 31), day(2022, 1, 1)).unwrap();
        assert_eq!(months, vec![date(2021, 12, 31), date(2022, 1, 31)]);
    }

    #[test]
    fn leap_february() {
        let months = months_between(day(2024, 2, 1), day(2024, 2, 29)).unwrap();
        assert_eq!(months, vec![date(2024, 2, 29)]);
    }

    #[test]
    fn reversed_range_is_an_error() {
        let err = months_between(day(2022, 3, 1), day(2022, 1, 1)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidRange { .. }));
    }

    #[test]
    fn month_span_is_half_open() {
        let (start, end) = month_span(date(2024, 2, 29));
        assert_eq!(start, day(2024, 2, 1));
        assert_eq!(end, day(2024, 3, 1));
    }

    #[test]
    fn month_span_december_rolls_year() {
        let (start, end) = month_span(date(2021, 12, 31));
        assert_eq!(start, day(2021, 12, 1));
        assert_eq!(end, day(2022, 1, 1));
    }
}
