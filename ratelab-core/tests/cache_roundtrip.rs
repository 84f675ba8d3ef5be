//! Partition cache integration: month splitting, merge-on-save, reload.
//!
//! Exercises the cache through the public crate surface the way the
//! query engine drives it: wide tables in, Parquet partitions plus meta
//! sidecars on disk, wide tables back out.

use chrono::{DateTime, TimeZone, Utc};
use ratelab_core::{
    Asset, CacheError, Identity, InstrumentKind, Interval, Pair, PartitionCache, PricePoint,
    RatePoint, SourceId, WideTable,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_cache_dir(tag: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("ratelab_{tag}_{}_{id}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn rate_point(when: DateTime<Utc>, base: &str, value: f64) -> RatePoint {
    RatePoint {
        timestamp: when,
        pair: Pair::new(base, "USDT"),
        rate: value,
    }
}

fn funding_table(source: &str, points: &[RatePoint]) -> WideTable {
    WideTable::from_rate_points(&SourceId::new(source), points)
}

fn candle(when: DateTime<Utc>, base: &str, close: f64) -> PricePoint {
    PricePoint {
        open_time: when,
        close_time: when + chrono::Duration::hours(1),
        pair: Pair::new(base, "USDT"),
        open: close - 1.0,
        high: close + 2.0,
        low: close - 2.0,
        close,
    }
}

#[test]
fn save_splits_rows_across_month_partitions() {
    let dir = temp_cache_dir("split");
    let cache = PartitionCache::new(&dir);

    let table = funding_table(
        "binance",
        &[
            rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001),
            rate_point(ts(2022, 2, 3, 8), "BTC", 0.0002),
        ],
    );
    cache.save_funding_rates(&table).unwrap();

    assert!(dir.join("funding_rates/2022_01.parquet").exists());
    assert!(dir.join("funding_rates/2022_02.parquet").exists());
    assert!(dir.join("funding_rates/meta.json").exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_merges_partitions_across_months() {
    let dir = temp_cache_dir("span");
    let cache = PartitionCache::new(&dir);

    let table = funding_table(
        "binance",
        &[
            rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001),
            rate_point(ts(2022, 2, 3, 8), "BTC", 0.0002),
        ],
    );
    cache.save_funding_rates(&table).unwrap();

    let loaded = cache
        .load_funding_rates(ts(2022, 1, 1, 0), ts(2022, 2, 28, 0), &[])
        .unwrap();
    assert_eq!(loaded.len(), 2);

    let timestamps: Vec<_> = loaded.rows().map(|(key, _)| key.0).collect();
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]), "rows are sorted");

    let btc: Identity = Pair::new("BTC", "USDT").into();
    let binance = SourceId::new("binance");
    assert_eq!(
        loaded.get(ts(2022, 1, 15, 8), &btc, &binance, "rate"),
        Some(0.0001)
    );
    assert_eq!(
        loaded.get(ts(2022, 2, 3, 8), &btc, &binance, "rate"),
        Some(0.0002)
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_returns_whole_touched_months() {
    // Partitions are month-granular: any range touching a month loads
    // that month's full partition.
    let dir = temp_cache_dir("whole_month");
    let cache = PartitionCache::new(&dir);

    let table = funding_table("binance", &[rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001)]);
    cache.save_funding_rates(&table).unwrap();

    let loaded = cache
        .load_funding_rates(ts(2022, 1, 20, 0), ts(2022, 1, 25, 0), &[])
        .unwrap();
    assert_eq!(loaded.len(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn resave_overwrites_colliding_rows_with_newest() {
    let dir = temp_cache_dir("newest");
    let cache = PartitionCache::new(&dir);

    let first = funding_table("binance", &[rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001)]);
    cache.save_funding_rates(&first).unwrap();
    let second = funding_table("binance", &[rate_point(ts(2022, 1, 15, 8), "BTC", 0.0009)]);
    cache.save_funding_rates(&second).unwrap();

    let loaded = cache
        .load_funding_rates(ts(2022, 1, 1, 0), ts(2022, 1, 31, 0), &[])
        .unwrap();
    assert_eq!(loaded.len(), 1);
    let btc: Identity = Pair::new("BTC", "USDT").into();
    assert_eq!(
        loaded.get(ts(2022, 1, 15, 8), &btc, &SourceId::new("binance"), "rate"),
        Some(0.0009)
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn saving_twice_equals_saving_once() {
    let dir = temp_cache_dir("idempotent");
    let cache = PartitionCache::new(&dir);

    let table = funding_table(
        "binance",
        &[
            rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001),
            rate_point(ts(2022, 1, 15, 8), "ETH", 0.0002),
        ],
    );
    cache.save_funding_rates(&table).unwrap();
    let once = cache
        .load_funding_rates(ts(2022, 1, 1, 0), ts(2022, 1, 31, 0), &[])
        .unwrap();

    cache.save_funding_rates(&table).unwrap();
    let twice = cache
        .load_funding_rates(ts(2022, 1, 1, 0), ts(2022, 1, 31, 0), &[])
        .unwrap();

    assert_eq!(once, twice);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn sources_accumulate_in_a_partition() {
    let dir = temp_cache_dir("accumulate");
    let cache = PartitionCache::new(&dir);
    let when = ts(2022, 1, 15, 8);

    cache
        .save_funding_rates(&funding_table("binance", &[rate_point(when, "BTC", 0.0001)]))
        .unwrap();
    cache
        .save_funding_rates(&funding_table("okx", &[rate_point(when, "BTC", 0.0002)]))
        .unwrap();

    let loaded = cache
        .load_funding_rates(ts(2022, 1, 1, 0), ts(2022, 1, 31, 0), &[])
        .unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(
        loaded.column_names(),
        vec!["rate_binance".to_string(), "rate_okx".to_string()]
    );

    let btc: Identity = Pair::new("BTC", "USDT").into();
    assert_eq!(
        loaded.get(when, &btc, &SourceId::new("binance"), "rate"),
        Some(0.0001)
    );
    assert_eq!(
        loaded.get(when, &btc, &SourceId::new("okx"), "rate"),
        Some(0.0002)
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cache_miss_loads_empty_table() {
    let dir = temp_cache_dir("miss");
    let cache = PartitionCache::new(&dir);

    let loaded = cache
        .load_funding_rates(ts(2022, 1, 1, 0), ts(2022, 3, 31, 0), &[])
        .unwrap();
    assert!(loaded.is_empty());
    assert!(loaded.column_names().is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn empty_save_is_rejected() {
    let dir = temp_cache_dir("empty");
    let cache = PartitionCache::new(&dir);

    let empty = WideTable::for_rates(vec![SourceId::new("binance")]);
    match cache.save_funding_rates(&empty) {
        Err(CacheError::EmptyInput) => {}
        other => panic!("expected EmptyInput, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reversed_load_range_is_invalid() {
    let dir = temp_cache_dir("reversed");
    let cache = PartitionCache::new(&dir);

    match cache.load_funding_rates(ts(2022, 3, 1, 0), ts(2022, 1, 1, 0), &[]) {
        Err(CacheError::InvalidRange { .. }) => {}
        other => panic!("expected InvalidRange, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_filter_matches_base_symbols_case_insensitively() {
    let dir = temp_cache_dir("filter");
    let cache = PartitionCache::new(&dir);

    let table = funding_table(
        "binance",
        &[
            rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001),
            rate_point(ts(2022, 1, 15, 8), "ETH", 0.0002),
        ],
    );
    cache.save_funding_rates(&table).unwrap();

    let loaded = cache
        .load_funding_rates(ts(2022, 1, 1, 0), ts(2022, 1, 31, 0), &["btc".to_string()])
        .unwrap();
    assert_eq!(loaded.len(), 1);
    let (key, _) = loaded.rows().next().unwrap();
    assert_eq!(key.1.base_symbol(), "BTC");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn borrow_rates_roundtrip_on_asset_identity() {
    let dir = temp_cache_dir("borrow");
    let cache = PartitionCache::new(&dir);
    let binance = SourceId::new("binance");

    let mut table = WideTable::for_rates(vec![binance.clone()]);
    table.insert(ts(2022, 1, 10, 0), Asset::new("BTC").into(), &binance, &[0.01]);
    table.insert(ts(2022, 1, 10, 0), Asset::new("ETH").into(), &binance, &[0.015]);
    cache.save_borrow_rates(&table).unwrap();

    let loaded = cache
        .load_borrow_rates(ts(2022, 1, 1, 0), ts(2022, 1, 31, 0), &["ETH".to_string()])
        .unwrap();
    assert_eq!(loaded.len(), 1);
    let eth: Identity = Asset::new("ETH").into();
    assert_eq!(
        loaded.get(ts(2022, 1, 10, 0), &eth, &binance, "rate"),
        Some(0.015)
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn price_partitions_are_keyed_by_kind_and_interval() {
    let dir = temp_cache_dir("prices");
    let cache = PartitionCache::new(&dir);
    let interval = Interval::new("1h");
    let binance = SourceId::new("binance");

    let spot = WideTable::from_price_points(&binance, &[candle(ts(2022, 1, 5, 0), "BTC", 40_000.0)]);
    let perp = WideTable::from_price_points(&binance, &[candle(ts(2022, 1, 5, 0), "ETH", 3_000.0)]);
    cache.save_prices(&spot, InstrumentKind::Spot, &interval).unwrap();
    cache.save_prices(&perp, InstrumentKind::Perp, &interval).unwrap();

    assert!(dir.join("prices/spot_1h_2022_01.parquet").exists());
    assert!(dir.join("prices/perp_1h_2022_01.parquet").exists());

    let loaded = cache
        .load_prices(
            ts(2022, 1, 1, 0),
            ts(2022, 1, 31, 0),
            InstrumentKind::Spot,
            &interval,
            &[],
        )
        .unwrap();
    assert_eq!(loaded.len(), 1);
    let btc: Identity = Pair::new("BTC", "USDT").into();
    assert_eq!(
        loaded.get(ts(2022, 1, 5, 0), &btc, &binance, "open"),
        Some(39_999.0)
    );
    assert_eq!(
        loaded.get(ts(2022, 1, 5, 0), &btc, &binance, "close"),
        Some(40_000.0)
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn status_lists_saved_datasets() {
    let dir = temp_cache_dir("status");
    let cache = PartitionCache::new(&dir);

    let before = cache.status();
    assert!(before.iter().all(|s| !s.cached));

    let table = funding_table(
        "binance",
        &[
            rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001),
            rate_point(ts(2022, 2, 3, 8), "BTC", 0.0002),
        ],
    );
    cache.save_funding_rates(&table).unwrap();
    let prices = WideTable::from_price_points(
        &SourceId::new("binance"),
        &[candle(ts(2022, 1, 5, 0), "BTC", 40_000.0)],
    );
    cache
        .save_prices(&prices, InstrumentKind::Spot, &Interval::new("1h"))
        .unwrap();

    let after = cache.status();
    let funding = after.iter().find(|s| s.dataset == "funding_rates").unwrap();
    assert!(funding.cached);
    assert_eq!(funding.row_count, Some(2));

    let borrow = after.iter().find(|s| s.dataset == "borrow_rates").unwrap();
    assert!(!borrow.cached);

    assert!(after.iter().any(|s| s.dataset == "prices/spot_1h"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn meta_range_widens_across_saves() {
    let dir = temp_cache_dir("meta_widen");
    let cache = PartitionCache::new(&dir);

    cache
        .save_funding_rates(&funding_table(
            "binance",
            &[rate_point(ts(2022, 2, 10, 8), "BTC", 0.0002)],
        ))
        .unwrap();
    cache
        .save_funding_rates(&funding_table(
            "binance",
            &[rate_point(ts(2022, 1, 15, 8), "BTC", 0.0001)],
        ))
        .unwrap();

    let status = cache.status();
    let funding = status.iter().find(|s| s.dataset == "funding_rates").unwrap();
    assert_eq!(funding.start, Some(ts(2022, 1, 15, 8)));
    assert_eq!(funding.end, Some(ts(2022, 2, 10, 8)));

    let _ = std::fs::remove_dir_all(&dir);
}
