//! Raw per-source time-series observations, as returned by source adapters
//! before harmonization into a wide table.

use super::instrument::{Asset, Identity, Pair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One funding-rate observation for a perpetual pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    pub timestamp: DateTime<Utc>,
    pub pair: Pair,
    pub rate: f64,
}

impl RatePoint {
    pub fn identity(&self) -> Identity {
        Identity::Pair(self.pair.clone())
    }
}

/// One borrow-rate observation for a single asset. Venues set these daily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowPoint {
    pub timestamp: DateTime<Utc>,
    pub asset: Asset,
    pub rate: f64,
}

impl BorrowPoint {
    pub fn identity(&self) -> Identity {
        Identity::Asset(self.asset.clone())
    }
}

/// One candle for a pair at some granularity.
///
/// `open_time` is the canonical row timestamp: candles join across venues on
/// the bar's open boundary, which is crisp, while venue-reported close times
/// carry per-venue millisecond offsets. `close_time` rides along as the venue
/// reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub pair: Pair,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PricePoint {
    /// Canonical row timestamp used for partitioning and joining.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.open_time
    }

    pub fn identity(&self) -> Identity {
        Identity::Pair(self.pair.clone())
    }

    /// Field values in wide-table field order.
    pub fn values(&self) -> [f64; 4] {
        [self.open, self.high, self.low, self.close]
    }
}

/// Wide-table value field names for rate data.
pub const RATE_FIELDS: [&str; 1] = ["rate"];

/// Wide-table value field names for price data, in column order.
pub const PRICE_FIELDS: [&str; 4] = ["open", "high", "low", "close"];
