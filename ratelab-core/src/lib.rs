//! Ratelab Core — multi-exchange market data with a month-partitioned cache.
//!
//! This crate provides:
//! - Domain types (pairs, assets, rate/price points, wide per-source tables)
//! - Venue adapters for Binance, Bybit, and OKX over a shared REST transport
//! - A month-partitioned Parquet cache with atomic merge-on-save
//! - An aggregation engine that fans one query out across venues and merges
//!   per-source columns into a single stable-schema table

pub mod cache;
pub mod calendar;
pub mod config;
pub mod domain;
pub mod engine;
pub mod source;

pub use cache::{CacheError, CacheMeta, CacheStatus, PartitionCache};
pub use calendar::{month_span, months_between};
pub use config::{ConfigError, RatelabConfig};
pub use domain::{
    Asset, AvailabilityMatrix, BorrowPoint, Identity, InstrumentKind, Interval, Pair, PricePoint,
    RatePoint, SourceId, WideTable,
};
pub use engine::MarketData;
pub use source::{
    ApiCredentials, BinanceSource, BybitSource, ExchangeSource, OkxSource, RestClient, SourceError,
};
