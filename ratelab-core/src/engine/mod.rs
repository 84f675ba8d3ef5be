//! Multi-source aggregation over venue adapters and the partition cache.
//!
//! [`MarketData`] is the query surface of the crate. One query fans out
//! to every configured source on a private rayon pool and joins all
//! fetches before merging; a failed source is logged and omitted from
//! the merge, never fatal. Merged output keeps one value column per
//! configured source regardless of which sources answered, so a query
//! result has a stable schema.
//!
//! Queries run to completion: in-flight fetches are not cancelled
//! mid-query, the per-request HTTP timeout bounds each one.

mod availability;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cache::{CacheError, CacheStatus, PartitionCache};
use crate::domain::{AvailabilityMatrix, InstrumentKind, Interval, SourceId, WideTable};
use crate::source::{ExchangeSource, SourceError};

/// Aggregated market data over a set of exchange sources, backed by the
/// month-partitioned cache.
pub struct MarketData {
    sources: Vec<Box<dyn ExchangeSource>>,
    cache: PartitionCache,
    pool: rayon::ThreadPool,
}

impl MarketData {
    /// Build an engine over the given sources. The worker pool is private
    /// and sized to the source count, so one slow venue never starves
    /// unrelated rayon users.
    pub fn new(sources: Vec<Box<dyn ExchangeSource>>, cache: PartitionCache) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(sources.len().max(1))
            .thread_name(|i| format!("ratelab-source-{i}"))
            .build()
            .expect("failed to build source thread pool");
        Self {
            sources,
            cache,
            pool,
        }
    }

    /// Configured source ids, in configuration order.
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id().clone()).collect()
    }

    /// Ping every source, in parallel.
    pub fn source_health(&self) -> Vec<(SourceId, bool)> {
        self.fan_out(|source| Ok(source.is_available()))
            .into_iter()
            .map(|(id, up)| (id, up.unwrap_or(false)))
            .collect()
    }

    // ── Instrument availability ─────────────────────────────────────

    /// Spot pairs listed per source, unioned into one matrix.
    pub fn spot_pairs(&self) -> AvailabilityMatrix {
        let results = self.fan_out(|source| source.spot_pairs());
        availability::fold_listings(self.source_ids(), results)
    }

    /// Perpetual pairs listed per source, unioned into one matrix.
    pub fn perp_pairs(&self) -> AvailabilityMatrix {
        let results = self.fan_out(|source| source.perp_pairs());
        availability::fold_listings(self.source_ids(), results)
    }

    /// Borrowable assets listed per source, unioned into one matrix.
    pub fn borrowable_assets(&self) -> AvailabilityMatrix {
        let results = self.fan_out(|source| source.borrowable_assets());
        availability::fold_listings(self.source_ids(), results)
    }

    // ── Aggregated queries ──────────────────────────────────────────

    /// Settled funding rates over `[start, end)`, one `rate_{source}`
    /// column per configured source. `filter` narrows by base symbol.
    /// Pass a precomputed matrix to skip listing resolution.
    pub fn historical_funding_rates(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &[String],
        availability: Option<&AvailabilityMatrix>,
    ) -> WideTable {
        let resolved;
        let matrix = match availability {
            Some(m) => m,
            None => {
                resolved = self.perp_pairs();
                &resolved
            }
        };
        let results = self.fan_out(|source| {
            let pairs = availability::pairs_for(matrix, source.id(), filter, &[]);
            if pairs.is_empty() {
                return Ok(Vec::new());
            }
            source.historical_funding_rates(&pairs, start, end)
        });
        self.merge_results(
            WideTable::for_rates(self.source_ids()),
            results,
            WideTable::from_rate_points,
        )
    }

    /// The upcoming funding rate per pair per source.
    pub fn predicted_funding_rates(
        &self,
        filter: &[String],
        availability: Option<&AvailabilityMatrix>,
    ) -> WideTable {
        let resolved;
        let matrix = match availability {
            Some(m) => m,
            None => {
                resolved = self.perp_pairs();
                &resolved
            }
        };
        let results = self.fan_out(|source| {
            let pairs = availability::pairs_for(matrix, source.id(), filter, &[]);
            if pairs.is_empty() {
                return Ok(Vec::new());
            }
            source.predicted_funding_rates(&pairs)
        });
        self.merge_results(
            WideTable::for_rates(self.source_ids()),
            results,
            WideTable::from_rate_points,
        )
    }

    /// Borrow rates over `[start, end)`, keyed by asset.
    pub fn historical_borrow_rates(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        assets: &[String],
        availability: Option<&AvailabilityMatrix>,
    ) -> WideTable {
        let resolved;
        let matrix = match availability {
            Some(m) => m,
            None => {
                resolved = self.borrowable_assets();
                &resolved
            }
        };
        let results = self.fan_out(|source| {
            let scoped = availability::assets_for(matrix, source.id(), assets);
            if scoped.is_empty() {
                return Ok(Vec::new());
            }
            source.historical_borrow_rates(&scoped, start, end)
        });
        self.merge_results(
            WideTable::for_rates(self.source_ids()),
            results,
            WideTable::from_borrow_points,
        )
    }

    /// The latest borrow rate per asset per source.
    pub fn current_borrow_rates(
        &self,
        assets: &[String],
        availability: Option<&AvailabilityMatrix>,
    ) -> WideTable {
        let resolved;
        let matrix = match availability {
            Some(m) => m,
            None => {
                resolved = self.borrowable_assets();
                &resolved
            }
        };
        let results = self.fan_out(|source| {
            let scoped = availability::assets_for(matrix, source.id(), assets);
            if scoped.is_empty() {
                return Ok(Vec::new());
            }
            source.current_borrow_rates(&scoped)
        });
        self.merge_results(
            WideTable::for_rates(self.source_ids()),
            results,
            WideTable::from_borrow_points,
        )
    }

    /// OHLC candles over `[start, end)` for one instrument kind, with
    /// `{open,high,low,close}_{source}` columns. The availability scope
    /// follows the kind: spot listings for spot, perp listings for perp.
    pub fn historical_prices(
        &self,
        kind: InstrumentKind,
        interval: &Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bases: &[String],
        quotes: &[String],
        availability: Option<&AvailabilityMatrix>,
    ) -> WideTable {
        let resolved;
        let matrix = match availability {
            Some(m) => m,
            None => {
                resolved = match kind {
                    InstrumentKind::Spot => self.spot_pairs(),
                    InstrumentKind::Perp => self.perp_pairs(),
                };
                &resolved
            }
        };
        let results = self.fan_out(|source| {
            let pairs = availability::pairs_for(matrix, source.id(), bases, quotes);
            if pairs.is_empty() {
                return Ok(Vec::new());
            }
            source.historical_prices(&pairs, kind, interval, start, end)
        });
        self.merge_results(
            WideTable::for_prices(self.source_ids()),
            results,
            WideTable::from_price_points,
        )
    }

    // ── Cache surface ───────────────────────────────────────────────

    pub fn save_funding_rates(&self, table: &WideTable) -> Result<(), CacheError> {
        self.cache.save_funding_rates(table)
    }

    pub fn load_funding_rates(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &[String],
    ) -> Result<WideTable, CacheError> {
        self.cache.load_funding_rates(start, end, filter)
    }

    pub fn save_borrow_rates(&self, table: &WideTable) -> Result<(), CacheError> {
        self.cache.save_borrow_rates(table)
    }

    pub fn load_borrow_rates(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        assets: &[String],
    ) -> Result<WideTable, CacheError> {
        self.cache.load_borrow_rates(start, end, assets)
    }

    pub fn save_prices(
        &self,
        table: &WideTable,
        kind: InstrumentKind,
        interval: &Interval,
    ) -> Result<(), CacheError> {
        self.cache.save_prices(table, kind, interval)
    }

    pub fn load_prices(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kind: InstrumentKind,
        interval: &Interval,
        filter: &[String],
    ) -> Result<WideTable, CacheError> {
        self.cache.load_prices(start, end, kind, interval, filter)
    }

    /// Cached range and row count per dataset, from the meta sidecars.
    pub fn cache_status(&self) -> Vec<CacheStatus> {
        self.cache.status()
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Run one fetch per source on the pool and join them all.
    fn fan_out<T, F>(&self, fetch: F) -> Vec<(SourceId, Result<T, SourceError>)>
    where
        T: Send,
        F: Fn(&dyn ExchangeSource) -> Result<T, SourceError> + Sync,
    {
        self.pool.install(|| {
            self.sources
                .par_iter()
                .map(|source| (source.id().clone(), fetch(source.as_ref())))
                .collect()
        })
    }

    /// Fold joined fetch results into the accumulator table. Failures
    /// are logged and omitted; an unsupported capability is routine and
    /// only logged at debug.
    fn merge_results<P>(
        &self,
        mut acc: WideTable,
        results: Vec<(SourceId, Result<Vec<P>, SourceError>)>,
        to_table: impl Fn(&SourceId, &[P]) -> WideTable,
    ) -> WideTable {
        for (id, result) in results {
            match result {
                Ok(points) => {
                    if points.is_empty() {
                        continue;
                    }
                    acc.merge(&to_table(&id, &points));
                }
                Err(SourceError::Unsupported { capability, .. }) => {
                    debug!(source = %id, capability, "capability not served, source skipped");
                }
                Err(e) => {
                    warn!(source = %id, error = %e, "source fetch failed, omitted from merge");
                }
            }
        }
        acc
    }
}
