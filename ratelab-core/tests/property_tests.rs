//! Property tests for calendar math and wide-table merging.
//!
//! Uses proptest to verify:
//! 1. Month boundaries: count, endpoint coverage, and month-end invariants
//! 2. Merge algebra: idempotence, dedup, newest-wins, disjoint columns
//! 3. Slicing and filtering: half-open bounds and base-symbol retention

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use ratelab_core::{months_between, Pair, RatePoint, SourceId, WideTable};

// ── Strategies ───────────────────────────────────────────────────────

const BASES: [&str; 5] = ["BTC", "ETH", "SOL", "XRP", "DOGE"];

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // Hour-aligned instants across 2020 through 2025.
    (0i64..52_600).prop_map(|hours| {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    })
}

fn arb_range() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
    (arb_timestamp(), arb_timestamp()).prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
}

fn arb_pair() -> impl Strategy<Value = Pair> {
    (0..BASES.len()).prop_map(|i| Pair::new(BASES[i], "USDT"))
}

fn arb_rate_points(max: usize) -> impl Strategy<Value = Vec<RatePoint>> {
    prop::collection::vec((arb_timestamp(), arb_pair(), -0.01f64..0.01), 1..max).prop_map(
        |entries| {
            entries
                .into_iter()
                .map(|(timestamp, pair, rate)| RatePoint {
                    timestamp,
                    pair,
                    rate,
                })
                .collect()
        },
    )
}

fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month() as i32 - 1
}

// ── 1. Month Boundaries ──────────────────────────────────────────────

proptest! {
    /// One boundary per distinct calendar month the range touches.
    #[test]
    fn month_count_matches_touched_months((start, end) in arb_range()) {
        let months = months_between(start, end).unwrap();
        let expected = month_index(end.date_naive()) - month_index(start.date_naive()) + 1;
        prop_assert_eq!(months.len() as i32, expected);
    }

    /// The first boundary falls in start's month, the last in end's.
    #[test]
    fn month_boundaries_cover_both_endpoints((start, end) in arb_range()) {
        let months = months_between(start, end).unwrap();
        let first = *months.first().unwrap();
        let last = *months.last().unwrap();
        prop_assert_eq!(month_index(first), month_index(start.date_naive()));
        prop_assert_eq!(month_index(last), month_index(end.date_naive()));
    }

    /// Every boundary is the last day of its month, in ascending order.
    #[test]
    fn month_boundaries_are_ascending_month_ends((start, end) in arb_range()) {
        let months = months_between(start, end).unwrap();
        for window in months.windows(2) {
            prop_assert!(window[0] < window[1]);
        }
        for month in months {
            let next = month.succ_opt().unwrap();
            prop_assert_eq!(next.day(), 1, "boundary {} is not a month end", month);
        }
    }

    /// A reversed range always errors.
    #[test]
    fn reversed_ranges_error((start, end) in arb_range()) {
        prop_assert!(months_between(end + Duration::hours(1), start).is_err());
    }
}

// ── 2. Merge Algebra ─────────────────────────────────────────────────

proptest! {
    /// Merging a batch into itself changes nothing.
    #[test]
    fn merge_is_idempotent(points in arb_rate_points(40)) {
        let source = SourceId::new("binance");
        let table = WideTable::from_rate_points(&source, &points);
        let mut merged = table.clone();
        merged.merge(&table);
        prop_assert_eq!(merged, table);
    }

    /// Row count equals the number of distinct (timestamp, identity) keys.
    #[test]
    fn rows_dedup_on_time_and_identity(points in arb_rate_points(40)) {
        let source = SourceId::new("binance");
        let table = WideTable::from_rate_points(&source, &points);
        let distinct: std::collections::BTreeSet<_> = points
            .iter()
            .map(|p| (p.timestamp, p.pair.clone()))
            .collect();
        prop_assert_eq!(table.len(), distinct.len());
    }

    /// A fresh batch wins every key collision; keys unique to the older
    /// batch keep their value.
    #[test]
    fn newer_batch_wins_collisions(
        old_points in arb_rate_points(30),
        new_points in arb_rate_points(30),
    ) {
        let source = SourceId::new("binance");
        let old = WideTable::from_rate_points(&source, &old_points);
        let fresh = WideTable::from_rate_points(&source, &new_points);
        let mut merged = old.clone();
        merged.merge(&fresh);

        for ((timestamp, identity), _) in fresh.rows() {
            prop_assert_eq!(
                merged.get(*timestamp, identity, &source, "rate"),
                fresh.get(*timestamp, identity, &source, "rate")
            );
        }
        for ((timestamp, identity), _) in old.rows() {
            if fresh.get(*timestamp, identity, &source, "rate").is_none() {
                prop_assert_eq!(
                    merged.get(*timestamp, identity, &source, "rate"),
                    old.get(*timestamp, identity, &source, "rate")
                );
            }
        }
    }

    /// Merging per-source tables fills disjoint column blocks without
    /// disturbing each other's cells.
    #[test]
    fn sources_fill_disjoint_columns(
        points_a in arb_rate_points(20),
        points_b in arb_rate_points(20),
    ) {
        let binance = SourceId::new("binance");
        let okx = SourceId::new("okx");
        let table_a = WideTable::from_rate_points(&binance, &points_a);
        let table_b = WideTable::from_rate_points(&okx, &points_b);

        let mut merged = WideTable::for_rates(vec![binance.clone(), okx.clone()]);
        merged.merge(&table_a);
        merged.merge(&table_b);

        prop_assert_eq!(
            merged.column_names(),
            vec!["rate_binance".to_string(), "rate_okx".to_string()]
        );
        for ((timestamp, identity), _) in table_a.rows() {
            prop_assert_eq!(
                merged.get(*timestamp, identity, &binance, "rate"),
                table_a.get(*timestamp, identity, &binance, "rate")
            );
        }
        for ((timestamp, identity), _) in table_b.rows() {
            prop_assert_eq!(
                merged.get(*timestamp, identity, &okx, "rate"),
                table_b.get(*timestamp, identity, &okx, "rate")
            );
        }
    }
}

// ── 3. Slicing and Filtering ─────────────────────────────────────────

proptest! {
    /// slice keeps exactly the rows with timestamps in [start, end).
    #[test]
    fn slice_bounds_are_half_open(
        points in arb_rate_points(40),
        (cut_start, cut_end) in arb_range(),
    ) {
        let source = SourceId::new("binance");
        let table = WideTable::from_rate_points(&source, &points);
        let sliced = table.slice(cut_start, cut_end);

        let expected = table
            .rows()
            .filter(|(key, _)| key.0 >= cut_start && key.0 < cut_end)
            .count();
        prop_assert_eq!(sliced.len(), expected);
        for (key, _) in sliced.rows() {
            prop_assert!(key.0 >= cut_start && key.0 < cut_end);
        }
    }

    /// Retaining one base symbol keeps exactly its rows.
    #[test]
    fn retain_filters_by_base_symbol(
        points in arb_rate_points(40),
        pick in 0..BASES.len(),
    ) {
        let source = SourceId::new("binance");
        let mut table = WideTable::from_rate_points(&source, &points);
        let wanted = BASES[pick].to_string();
        let expected = table
            .rows()
            .filter(|(key, _)| key.1.base_symbol() == wanted)
            .count();
        table.retain_instruments(&[wanted]);
        prop_assert_eq!(table.len(), expected);
    }
}
