//! Exchange source trait and structured error types.
//!
//! The ExchangeSource trait abstracts over venue REST APIs (Binance,
//! Bybit, OKX) so the engine can fan out one query to every configured
//! venue and mock sources in tests. Venues differ in what they serve;
//! capabilities a venue lacks report [`SourceError::Unsupported`] from
//! the default method bodies.

pub mod binance;
pub mod bybit;
pub mod http;
pub mod okx;

use chrono::{DateTime, Utc};
use std::fmt;

use crate::domain::{
    Asset, BorrowPoint, InstrumentKind, Interval, Pair, PricePoint, RatePoint, SourceId,
};

pub use self::binance::BinanceSource;
pub use self::bybit::BybitSource;
pub use self::http::RestClient;
pub use self::okx::OkxSource;

/// API key pair for venue endpoints that require signing.
#[derive(Debug, Clone, Default)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}

/// Structured error types for venue operations.
#[derive(Debug)]
pub enum SourceError {
    Transport(String),

    RateLimited { retry_after_secs: u64 },

    Status { status: u16, url: String },

    Decode(String),

    Auth(String),

    Venue { code: String, message: String },

    Unsupported {
        source: SourceId,
        capability: &'static str,
    },

    BadInterval(String),
}

// Hand-written: the `Unsupported.source` field is a venue id, not an error
// chain, which the thiserror derive's implicit `source` rule cannot express.
impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Transport(msg) => write!(f, "network unreachable: {msg}"),
            SourceError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited by venue (retry after {retry_after_secs}s)")
            }
            SourceError::Status { status, url } => write!(f, "HTTP {status} from {url}"),
            SourceError::Decode(msg) => write!(f, "response format changed: {msg}"),
            SourceError::Auth(msg) => write!(f, "authentication failed: {msg}"),
            SourceError::Venue { code, message } => write!(f, "venue error {code}: {message}"),
            SourceError::Unsupported { source, capability } => {
                write!(f, "{source} does not serve {capability}")
            }
            SourceError::BadInterval(msg) => write!(f, "unusable interval: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    fn unsupported(source: &SourceId, capability: &'static str) -> Self {
        SourceError::Unsupported {
            source: source.clone(),
            capability,
        }
    }
}

/// Millisecond epoch timestamp as reported by the venues.
pub(crate) fn parse_millis(ms: i64) -> Result<DateTime<Utc>, SourceError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SourceError::Decode(format!("timestamp out of range: {ms}")))
}

/// Decimal carried as a JSON string, e.g. `"0.00044160"`.
pub(crate) fn parse_decimal(s: &str, what: &str) -> Result<f64, SourceError> {
    s.parse()
        .map_err(|_| SourceError::Decode(format!("bad {what}: '{s}'")))
}

/// Trait for exchange data sources.
///
/// Implementations handle the specifics of one venue's REST API. The
/// engine layer sits above this trait; sources know nothing about the
/// cache or about each other. Every method is a capability: the default
/// bodies decline, adapters override what their venue serves.
pub trait ExchangeSource: Send + Sync {
    /// Identifier of this source, e.g. "binance".
    fn id(&self) -> &SourceId;

    /// Whether the venue currently responds at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Spot pairs the venue lists for trading.
    fn spot_pairs(&self) -> Result<Vec<Pair>, SourceError> {
        Err(SourceError::unsupported(self.id(), "spot pair listing"))
    }

    /// Perpetual pairs the venue lists for trading.
    fn perp_pairs(&self) -> Result<Vec<Pair>, SourceError> {
        Err(SourceError::unsupported(self.id(), "perp pair listing"))
    }

    /// Assets that can be borrowed for margin trading.
    fn borrowable_assets(&self) -> Result<Vec<Asset>, SourceError> {
        Err(SourceError::unsupported(
            self.id(),
            "borrowable asset listing",
        ))
    }

    /// The upcoming (not yet settled) funding rate per requested pair.
    fn predicted_funding_rates(&self, pairs: &[Pair]) -> Result<Vec<RatePoint>, SourceError> {
        let _ = pairs;
        Err(SourceError::unsupported(
            self.id(),
            "predicted funding rates",
        ))
    }

    /// Settled funding rates for the requested pairs over `[start, end)`.
    fn historical_funding_rates(
        &self,
        pairs: &[Pair],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>, SourceError> {
        let _ = (pairs, start, end);
        Err(SourceError::unsupported(
            self.id(),
            "historical funding rates",
        ))
    }

    /// The latest borrow rate per requested asset.
    fn current_borrow_rates(&self, assets: &[Asset]) -> Result<Vec<BorrowPoint>, SourceError> {
        let _ = assets;
        Err(SourceError::unsupported(self.id(), "current borrow rates"))
    }

    /// Borrow rates for the requested assets over `[start, end)`.
    fn historical_borrow_rates(
        &self,
        assets: &[Asset],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BorrowPoint>, SourceError> {
        let _ = (assets, start, end);
        Err(SourceError::unsupported(
            self.id(),
            "historical borrow rates",
        ))
    }

    /// OHLC candles for the requested pairs over `[start, end)`.
    fn historical_prices(
        &self,
        pairs: &[Pair],
        kind: InstrumentKind,
        interval: &Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, SourceError> {
        let _ = (pairs, kind, interval, start, end);
        Err(SourceError::unsupported(self.id(), "historical prices"))
    }
}
