//! Binance venue adapter.
//!
//! Spans three hosts: the spot API, the USDT-margined futures API (fapi)
//! and the coin-margined futures API (dapi). Coin-margined contracts
//! quote in USD and carry a `_PERP` symbol suffix; both futures hosts
//! also list expiring contracts, which are filtered out everywhere.
//!
//! Margin (borrow) endpoints are private and need signed requests.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::http::{self, RestClient};
use super::{parse_decimal, parse_millis, ApiCredentials, ExchangeSource, SourceError};
use crate::domain::{
    Asset, BorrowPoint, InstrumentKind, Interval, Pair, PricePoint, RatePoint, SourceId,
};

const SPOT_API: &str = "https://api.binance.com";
const USDT_FUTURES_API: &str = "https://fapi.binance.com/fapi";
const COIN_FUTURES_API: &str = "https://dapi.binance.com/dapi";

/// Quote currencies served by the coin-margined futures host.
const COIN_MARGIN_QUOTES: [&str; 1] = ["USD"];

/// Rows per paged request (venue maximum).
const PAGE_LIMIT: u32 = 1000;

/// Candle intervals the venue accepts, in seconds.
const KLINE_INTERVALS: [(u64, &str); 15] = [
    (60, "1m"),
    (180, "3m"),
    (300, "5m"),
    (900, "15m"),
    (1_800, "30m"),
    (3_600, "1h"),
    (7_200, "2h"),
    (14_400, "4h"),
    (21_600, "6h"),
    (28_800, "8h"),
    (43_200, "12h"),
    (86_400, "1d"),
    (259_200, "3d"),
    (604_800, "1w"),
    (2_628_000, "1M"),
];

// ── Response shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SpotExchangeInfo {
    symbols: Vec<SpotSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotSymbol {
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct FuturesExchangeInfo {
    symbols: Vec<FuturesSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesSymbol {
    contract_type: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    symbol: String,
    /// Only the coin-margined host sends this, e.g. `BTCUSD` for
    /// symbol `BTCUSD_PERP`.
    #[serde(default)]
    pair: String,
    /// Empty string on newly listed contracts.
    last_funding_rate: String,
    next_funding_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    funding_time: i64,
    funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginAsset {
    asset_name: String,
    is_borrowable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterestRateEntry {
    asset: String,
    daily_interest_rate: String,
    timestamp: i64,
}

/// One kline row: open time, OHLCV as strings, close time and volume
/// fields we do not keep.
type Kline = (
    i64,    // open time (ms)
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time (ms)
    String, // quote asset volume
    i64,    // number of trades
    String, // taker buy base volume
    String, // taker buy quote volume
    String, // ignore
);

// ── Adapter ─────────────────────────────────────────────────────────

/// Binance data source.
pub struct BinanceSource {
    id: SourceId,
    http: RestClient,
    credentials: Option<ApiCredentials>,
}

impl BinanceSource {
    pub fn new(http: RestClient, credentials: Option<ApiCredentials>) -> Self {
        Self {
            id: SourceId::new("binance"),
            http,
            credentials,
        }
    }

    /// Current server time in epoch milliseconds, used for signing.
    fn server_time(&self) -> Result<i64, SourceError> {
        let resp: ServerTime = self
            .http
            .get_json(&format!("{SPOT_API}/api/v3/time"), &[], &[])?;
        Ok(resp.server_time)
    }

    fn credentials(&self) -> Result<&ApiCredentials, SourceError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| SourceError::Auth("binance api credentials not configured".into()))
    }

    /// Signed GET against a private endpoint. The signature covers the
    /// query string in parameter order; the API key rides in a header.
    fn get_signed<T: DeserializeOwned>(
        &self,
        url: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<T, SourceError> {
        let creds = self.credentials()?;
        params.push(("recvWindow", "60000".into()));
        params.push(("timestamp", self.server_time()?.to_string()));
        let signature = http::sign(&creds.secret, &http::query_string(&params));
        params.push(("signature", signature));
        let headers = [("X-MBX-APIKEY", creds.key.clone())];
        self.http.get_json(url, &params, &headers)
    }

    fn interest_rate_history(
        &self,
        asset: &Asset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<InterestRateEntry>, SourceError> {
        let params = vec![
            ("asset", asset.as_str().to_string()),
            ("startTime", start.timestamp_millis().to_string()),
            ("endTime", end.timestamp_millis().to_string()),
        ];
        self.get_signed(
            &format!("{SPOT_API}/sapi/v1/margin/interestRateHistory"),
            params,
        )
    }
}

impl ExchangeSource for BinanceSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn is_available(&self) -> bool {
        self.server_time().is_ok()
    }

    fn spot_pairs(&self) -> Result<Vec<Pair>, SourceError> {
        let info: SpotExchangeInfo = self
            .http
            .get_json(&format!("{SPOT_API}/api/v3/exchangeInfo"), &[], &[])?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| Pair::new(&s.base_asset, &s.quote_asset))
            .collect())
    }

    fn perp_pairs(&self) -> Result<Vec<Pair>, SourceError> {
        let mut pairs = Vec::new();
        for host in [USDT_FUTURES_API, COIN_FUTURES_API] {
            let info: FuturesExchangeInfo =
                self.http
                    .get_json(&format!("{host}/v1/exchangeInfo"), &[], &[])?;
            pairs.extend(
                info.symbols
                    .into_iter()
                    .filter(|s| s.contract_type == "PERPETUAL")
                    .map(|s| Pair::new(&s.base_asset, &s.quote_asset)),
            );
        }
        Ok(pairs)
    }

    fn borrowable_assets(&self) -> Result<Vec<Asset>, SourceError> {
        let assets: Vec<MarginAsset> =
            self.get_signed(&format!("{SPOT_API}/sapi/v1/margin/allAssets"), Vec::new())?;
        Ok(assets
            .into_iter()
            .filter(|a| a.is_borrowable)
            .map(|a| Asset::new(&a.asset_name))
            .collect())
    }

    fn predicted_funding_rates(&self, pairs: &[Pair]) -> Result<Vec<RatePoint>, SourceError> {
        let lookup: HashMap<String, Pair> =
            pairs.iter().map(|p| (p.symbol(), p.clone())).collect();
        let mut points = Vec::new();

        // USDT-margined: match on the concatenated symbol.
        let linear: Vec<PremiumIndex> =
            self.http
                .get_json(&format!("{USDT_FUTURES_API}/v1/premiumIndex"), &[], &[])?;
        for entry in &linear {
            if is_expiring_future(&entry.symbol) {
                continue;
            }
            let Some(pair) = lookup.get(&entry.symbol) else {
                continue;
            };
            collect_premium(&mut points, entry, pair)?;
        }

        // Coin-margined: symbols end in `_PERP`, match on the pair field.
        let inverse: Vec<PremiumIndex> =
            self.http
                .get_json(&format!("{COIN_FUTURES_API}/v1/premiumIndex"), &[], &[])?;
        for entry in &inverse {
            if !entry.symbol.ends_with("_PERP") {
                continue;
            }
            let Some(pair) = lookup.get(&entry.pair) else {
                continue;
            };
            collect_premium(&mut points, entry, pair)?;
        }

        Ok(points)
    }

    fn historical_funding_rates(
        &self,
        pairs: &[Pair],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>, SourceError> {
        // Funding settles every eight hours, so one page covers
        // PAGE_LIMIT settlements.
        let window = Duration::hours(8 * PAGE_LIMIT as i64);
        let mut points = Vec::new();

        for pair in pairs {
            let (url, symbol) = if pair.quote == "USDT" {
                (format!("{USDT_FUTURES_API}/v1/fundingRate"), pair.symbol())
            } else if COIN_MARGIN_QUOTES.contains(&pair.quote.as_str()) {
                (
                    format!("{COIN_FUTURES_API}/v1/fundingRate"),
                    format!("{}_PERP", pair.symbol()),
                )
            } else {
                warn!(%pair, "unrecognised quote currency for funding rates");
                continue;
            };

            let mut cursor = start;
            while cursor < end {
                let window_end = (cursor + window).min(end);
                let params = [
                    ("symbol", symbol.clone()),
                    ("startTime", cursor.timestamp_millis().to_string()),
                    ("endTime", window_end.timestamp_millis().to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ];
                let rows: Vec<FundingEntry> = self.http.get_json(&url, &params, &[])?;
                for row in rows {
                    points.push(RatePoint {
                        timestamp: parse_millis(row.funding_time)?,
                        pair: pair.clone(),
                        rate: parse_decimal(&row.funding_rate, "funding rate")?,
                    });
                }
                cursor = window_end;
            }
        }
        Ok(points)
    }

    fn current_borrow_rates(&self, assets: &[Asset]) -> Result<Vec<BorrowPoint>, SourceError> {
        let now = Utc::now();
        let mut points = Vec::new();
        for asset in assets {
            // The venue reports daily rates; the latest row within the
            // last two days is the current one.
            let rows = match self.interest_rate_history(asset, now - Duration::days(2), now) {
                Ok(rows) => rows,
                Err(e @ SourceError::Auth(_)) => return Err(e),
                Err(e) => {
                    debug!(%asset, error = %e, "no borrow rate for asset");
                    continue;
                }
            };
            let Some(latest) = rows.first() else {
                continue;
            };
            points.push(BorrowPoint {
                timestamp: parse_millis(latest.timestamp)?,
                asset: Asset::new(&latest.asset),
                rate: parse_decimal(&latest.daily_interest_rate, "interest rate")?,
            });
        }
        Ok(points)
    }

    fn historical_borrow_rates(
        &self,
        assets: &[Asset],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BorrowPoint>, SourceError> {
        // The endpoint serves at most 30 days per request.
        let window = Duration::days(30);
        let mut points = Vec::new();
        for asset in assets {
            let mut cursor = start;
            while cursor < end {
                let window_end = (cursor + window).min(end);
                let rows = match self.interest_rate_history(asset, cursor, window_end) {
                    Ok(rows) => rows,
                    Err(e @ SourceError::Auth(_)) => return Err(e),
                    Err(e) => {
                        debug!(%asset, error = %e, "no borrow rates for asset");
                        cursor = window_end;
                        continue;
                    }
                };
                for row in rows {
                    points.push(BorrowPoint {
                        timestamp: parse_millis(row.timestamp)?,
                        asset: Asset::new(&row.asset),
                        rate: parse_decimal(&row.daily_interest_rate, "interest rate")?,
                    });
                }
                cursor = window_end;
            }
        }
        Ok(points)
    }

    fn historical_prices(
        &self,
        pairs: &[Pair],
        kind: InstrumentKind,
        interval: &Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, SourceError> {
        let (secs, venue_interval) = snap_interval(interval)?;
        let window = Duration::seconds((secs * PAGE_LIMIT as u64) as i64);
        let mut points = Vec::new();

        for pair in pairs {
            let (url, symbol) = match kind {
                InstrumentKind::Spot => (format!("{SPOT_API}/api/v3/klines"), pair.symbol()),
                InstrumentKind::Perp if COIN_MARGIN_QUOTES.contains(&pair.quote.as_str()) => (
                    format!("{COIN_FUTURES_API}/v1/klines"),
                    format!("{}_PERP", pair.symbol()),
                ),
                InstrumentKind::Perp => (format!("{USDT_FUTURES_API}/v1/klines"), pair.symbol()),
            };

            let mut cursor = start;
            while cursor < end {
                let window_end = (cursor + window).min(end);
                let params = [
                    ("symbol", symbol.clone()),
                    ("interval", venue_interval.to_string()),
                    ("startTime", cursor.timestamp_millis().to_string()),
                    ("endTime", window_end.timestamp_millis().to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ];
                let rows: Vec<Kline> = self.http.get_json(&url, &params, &[])?;
                for k in rows {
                    let open_time = parse_millis(k.0)?;
                    // The venue rounds to interval boundaries; keep only
                    // candles opening inside the requested range.
                    if open_time < start || open_time >= end {
                        continue;
                    }
                    points.push(PricePoint {
                        open_time,
                        close_time: parse_millis(k.6)?,
                        pair: pair.clone(),
                        open: parse_decimal(&k.1, "open")?,
                        high: parse_decimal(&k.2, "high")?,
                        low: parse_decimal(&k.3, "low")?,
                        close: parse_decimal(&k.4, "close")?,
                    });
                }
                cursor = window_end;
            }
        }
        Ok(points)
    }
}

/// Append one premium-index entry as a rate point. Newly listed
/// contracts publish an empty rate and are skipped.
fn collect_premium(
    points: &mut Vec<RatePoint>,
    entry: &PremiumIndex,
    pair: &Pair,
) -> Result<(), SourceError> {
    if entry.last_funding_rate.is_empty() {
        return Ok(());
    }
    points.push(RatePoint {
        timestamp: parse_millis(entry.next_funding_time)?,
        pair: pair.clone(),
        rate: parse_decimal(&entry.last_funding_rate, "funding rate")?,
    });
    Ok(())
}

/// Expiring futures carry a date suffix, e.g. `ETHUSDT_210625`.
fn is_expiring_future(symbol: &str) -> bool {
    symbol
        .split_once('_')
        .is_some_and(|(_, suffix)| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
}

/// Snap a requested interval to the nearest venue-accepted one.
fn snap_interval(interval: &Interval) -> Result<(u64, &'static str), SourceError> {
    let secs = interval
        .seconds()
        .ok_or_else(|| SourceError::BadInterval(interval.to_string()))?;
    Ok(KLINE_INTERVALS
        .iter()
        .copied()
        .min_by_key(|(accepted, _)| accepted.abs_diff(secs))
        .expect("interval table is not empty"))
}
